//! Scripted MQTT 3.1.1 peer for tests that need a real socket.
//!
//! It speaks just enough of the protocol to accept a client, answer its
//! CONNECT and push packets at it.

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

pub(crate) const CONNECT: u8 = 0x10;
pub(crate) const SUBSCRIBE: u8 = 0x82;

pub(crate) struct TestBroker {
    listener: TcpListener,
}

impl TestBroker {
    pub(crate) async fn bind() -> Self {
        Self {
            listener: TcpListener::bind("127.0.0.1:0").await.unwrap(),
        }
    }

    pub(crate) fn port(&self) -> u16 {
        self.listener.local_addr().unwrap().port()
    }

    /// Accepts the next client, reads its CONNECT and answers with a CONNACK
    /// carrying `return_code`. The socket stays open while the stream lives.
    pub(crate) async fn accept(&self, return_code: u8) -> TcpStream {
        let (mut socket, _) = self.listener.accept().await.unwrap();
        let (header, _) = read_packet(&mut socket).await;
        assert_eq!(header, CONNECT, "client did not open with CONNECT");
        socket.write_all(&[0x20, 0x02, 0x00, return_code]).await.unwrap();
        socket
    }
}

/// Reads one packet, returning its fixed header byte and its body.
pub(crate) async fn read_packet(socket: &mut TcpStream) -> (u8, Vec<u8>) {
    let header = socket.read_u8().await.unwrap();

    let mut remaining = 0usize;
    let mut shift = 0;
    loop {
        let byte = socket.read_u8().await.unwrap();
        remaining |= usize::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }

    let mut body = vec![0; remaining];
    socket.read_exact(&mut body).await.unwrap();
    (header, body)
}

/// QoS 0 PUBLISH frame. Small packets only: the length must fit one byte.
pub(crate) fn publish_frame(topic: &str, payload: &[u8]) -> Vec<u8> {
    let remaining = 2 + topic.len() + payload.len();
    assert!(remaining < 128, "frame too large for a one-byte length");

    let mut frame = vec![0x30, remaining as u8];
    frame.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    frame.extend_from_slice(topic.as_bytes());
    frame.extend_from_slice(payload);
    frame
}

pub(crate) fn contains(haystack: &[u8], needle: &str) -> bool {
    haystack
        .windows(needle.len())
        .any(|window| window == needle.as_bytes())
}
