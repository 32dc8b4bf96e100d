//! Alert inbox: messages the monitoring dashboard sends to this device.
//!
//! ```json
//! {"tipo":"alerta_medica","mensaje":"Revisar paciente","timestamp":1700000000,"prioridad":"alta"}
//! ```
//!
//! Every field is optional. High-priority alerts are logged at WARN, the rest
//! at INFO; payloads that are not a JSON object are logged and skipped.

use cardiosim_mqtt::IncomingMessage;
use serde::Deserialize;
use tokio::{sync::broadcast, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Alert {
    pub tipo: Option<String>,
    pub mensaje: Option<String>,
    pub timestamp: Option<i64>,
    pub prioridad: Option<String>,
}

impl Alert {
    pub fn is_high_priority(&self) -> bool {
        self.prioridad
            .as_deref()
            .is_some_and(|p| p.eq_ignore_ascii_case("alta"))
    }
}

pub struct AlertListener {
    topic: String,
    incoming: broadcast::Receiver<IncomingMessage>,
    cancel: CancellationToken,
}

impl AlertListener {
    /// `topic` is the full topic as seen on the broker, base topic included.
    pub fn new(
        topic: impl Into<String>,
        incoming: broadcast::Receiver<IncomingMessage>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            topic: topic.into(),
            incoming,
            cancel,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                received = self.incoming.recv() => match received {
                    Ok(message) if message.topic == self.topic => {
                        handle_alert(&message.payload);
                    }
                    Ok(message) => debug!("Ignoring message on {}", message.topic),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Alert inbox fell behind, {} message(s) skipped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        debug!("Alert listener for {} stopped", self.topic);
    }
}

/// Parses and logs one alert. Returns the alert when the payload was usable.
pub fn handle_alert(payload: &[u8]) -> Option<Alert> {
    let alert: Alert = match serde_json::from_slice(payload) {
        Ok(alert) => alert,
        Err(e) => {
            warn!(
                "Ignoring malformed alert ({}): {}",
                e,
                String::from_utf8_lossy(payload)
            );
            return None;
        }
    };

    let text = alert.mensaje.as_deref().unwrap_or("<no message>");
    let kind = alert.tipo.as_deref().unwrap_or("alert");
    if alert.is_high_priority() {
        warn!(kind = %kind, "High priority alert received: {}", text);
    } else {
        info!(kind = %kind, "Alert received: {}", text);
    }
    Some(alert)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use cardiosim_mqtt::MqttManager;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
    };
    use tracing_test::traced_test;

    use super::*;

    /// Plays the broker for one client: takes its CONNECT and accepts it.
    async fn accept_session(listener: &TcpListener) -> TcpStream {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut connect = [0u8; 512];
        let n = socket.read(&mut connect).await.unwrap();
        assert!(n > 0 && connect[0] == 0x10, "expected CONNECT");
        socket.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();
        socket
    }

    fn publish_frame(topic: &str, payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![0x30, (2 + topic.len() + payload.len()) as u8];
        frame.extend_from_slice(&(topic.len() as u16).to_be_bytes());
        frame.extend_from_slice(topic.as_bytes());
        frame.extend_from_slice(payload);
        frame
    }

    #[test]
    fn test_dashboard_alert_parses() {
        let payload = br#"{"tipo":"alerta_medica","mensaje":"Revisar paciente","timestamp":1700000000,"prioridad":"alta"}"#;
        let alert = handle_alert(payload).unwrap();
        assert_eq!(alert.tipo.as_deref(), Some("alerta_medica"));
        assert_eq!(alert.timestamp, Some(1_700_000_000));
        assert!(alert.is_high_priority());
    }

    #[test]
    fn test_partial_alert_parses() {
        let alert = handle_alert(br#"{"mensaje":"hola"}"#).unwrap();
        assert_eq!(alert.mensaje.as_deref(), Some("hola"));
        assert!(!alert.is_high_priority());
    }

    #[test]
    #[traced_test]
    fn test_malformed_alert_is_skipped() {
        assert!(handle_alert(b"not json").is_none());
        assert!(handle_alert(b"[1,2,3]").is_none());
        assert!(logs_contain("Ignoring malformed alert"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_listener_logs_alerts_for_its_topic_only() {
        let (tx, rx) = broadcast::channel(8);

        tx.send(IncomingMessage {
            topic: "dispositivos/w2/alertas".into(),
            payload: br#"{"mensaje":"para otro"}"#.to_vec(),
        })
        .unwrap();
        tx.send(IncomingMessage {
            topic: "dispositivos/w1/alertas".into(),
            payload: br#"{"mensaje":"Revisar paciente","prioridad":"alta"}"#.to_vec(),
        })
        .unwrap();
        // Buffered messages are still delivered before the listener sees the close.
        drop(tx);

        tokio::time::timeout(
            Duration::from_secs(1),
            AlertListener::new("dispositivos/w1/alertas", rx, CancellationToken::new()).run(),
        )
        .await
        .expect("listener did not stop");

        assert!(logs_contain("High priority alert received: Revisar paciente"));
        assert!(!logs_contain("para otro"));
    }

    #[tokio::test]
    async fn test_listener_stops_on_cancel() {
        let (_tx, rx) = broadcast::channel::<IncomingMessage>(1);
        let cancel = CancellationToken::new();
        let handle = AlertListener::new("a/b", rx, cancel.clone()).spawn();
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("listener did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_listener_stops_when_channel_closes() {
        let (tx, rx) = broadcast::channel::<IncomingMessage>(1);
        let handle = AlertListener::new("a/b", rx, CancellationToken::new()).spawn();
        drop(tx);

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("listener did not stop")
            .unwrap();
    }

    #[tokio::test]
    #[traced_test]
    async fn test_alert_published_by_broker_is_logged() {
        let topic = "dispositivos/w1/alertas";
        let broker = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let instance = MqttManager::new("127.0.0.1", broker.local_addr().unwrap().port())
            .unwrap()
            .build_and_start()
            .await
            .unwrap();

        let listener = AlertListener::new(topic, instance.incoming(), instance.cancel_token()).run();
        tokio::pin!(listener);

        let mut socket = accept_session(&broker).await;
        let mut state_rx = instance.state_receiver();
        tokio::time::timeout(Duration::from_secs(5), state_rx.wait_for(|s| s.is_connected()))
            .await
            .expect("never connected")
            .unwrap();

        let payload = br#"{"mensaje":"Revisar paciente","prioridad":"alta"}"#;
        socket.write_all(&publish_frame(topic, payload)).await.unwrap();

        // The listener runs on this task so its logs land in this test's span.
        for _ in 0..250 {
            if logs_contain("High priority alert received: Revisar paciente") {
                break;
            }
            tokio::select! {
                _ = &mut listener => panic!("alert listener stopped early"),
                _ = tokio::time::sleep(Duration::from_millis(20)) => {}
            }
        }
        assert!(logs_contain("High priority alert received: Revisar paciente"));

        instance.shutdown().await;
    }
}
