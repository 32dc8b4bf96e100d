//! JSON wire format of a reading.
//!
//! ```json
//! {"dispositivo":"watch1","ritmo_cardiaco":75,"unidad":"bpm","timestamp":1700000000}
//! ```
//!
//! The legacy style names the device key `sensor` instead of `dispositivo`.
//! A reading is encoded once per tick and the same bytes go to every sink.

use serde::{ser::SerializeStruct, Deserialize, Serialize, Serializer};

use super::reading::Reading;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadStyle {
    #[default]
    Dispositivo,
    Sensor,
}

impl PayloadStyle {
    pub fn device_key(self) -> &'static str {
        match self {
            PayloadStyle::Dispositivo => "dispositivo",
            PayloadStyle::Sensor => "sensor",
        }
    }
}

struct WireReading<'a> {
    reading: &'a Reading,
    style: PayloadStyle,
}

impl Serialize for WireReading<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Reading", 4)?;
        state.serialize_field(self.style.device_key(), &self.reading.device_id)?;
        state.serialize_field("ritmo_cardiaco", &self.reading.heart_rate.get())?;
        state.serialize_field("unidad", Reading::UNIT)?;
        state.serialize_field("timestamp", &self.reading.timestamp)?;
        state.end()
    }
}

/// A reading together with its serialized body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedReading {
    pub reading: Reading,
    pub body: Vec<u8>,
}

impl EncodedReading {
    pub fn encode(reading: Reading, style: PayloadStyle) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(&WireReading {
            reading: &reading,
            style,
        })?;
        Ok(Self { reading, body })
    }

    /// The body as text, for logging.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.body).unwrap_or("<non-utf8 payload>")
    }
}
