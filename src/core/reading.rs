//! Heart-rate values and the readings built from them.

use std::fmt;

use rand::{rngs::StdRng, Rng, SeedableRng};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReadingError {
    #[error("Heart rate {0} bpm is outside {min}..={max}", min = HeartRate::MIN, max = HeartRate::MAX)]
    OutOfRange(u16),
}

/// A heart rate in beats per minute, always within `MIN..=MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct HeartRate(u16);

impl HeartRate {
    pub const MIN: u16 = 30;
    pub const MAX: u16 = 130;

    /// Readings below this are bradycardia.
    pub const BRADYCARDIA_BELOW: u16 = 60;

    /// Distance below the alert limit from which a reading counts as elevated.
    pub const ELEVATED_MARGIN: u16 = 20;

    pub fn new(bpm: u16) -> Result<Self, ReadingError> {
        if (Self::MIN..=Self::MAX).contains(&bpm) {
            Ok(Self(bpm))
        } else {
            Err(ReadingError::OutOfRange(bpm))
        }
    }

    pub fn get(self) -> u16 {
        self.0
    }

    /// Classifies the value against a tachycardia limit.
    pub fn assess(self, alert_limit: u16) -> Rhythm {
        let bpm = self.0;
        if bpm < Self::BRADYCARDIA_BELOW {
            Rhythm::Bradycardia
        } else if bpm > alert_limit {
            Rhythm::Tachycardia
        } else if bpm > alert_limit.saturating_sub(Self::ELEVATED_MARGIN) {
            Rhythm::Elevated
        } else {
            Rhythm::Normal
        }
    }
}

impl fmt::Display for HeartRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bpm", self.0)
    }
}

/// Clinical reading of a heart rate against the alert limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rhythm {
    Bradycardia,
    Normal,
    Elevated,
    Tachycardia,
}

impl Rhythm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rhythm::Bradycardia => "bradycardia",
            Rhythm::Normal => "normal",
            Rhythm::Elevated => "elevated",
            Rhythm::Tachycardia => "tachycardia",
        }
    }

    pub fn is_dangerous(&self) -> bool {
        matches!(self, Rhythm::Bradycardia | Rhythm::Tachycardia)
    }
}

impl fmt::Display for Rhythm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Produces one heart rate per tick.
pub trait HeartRateSource: Send {
    fn next_heart_rate(&mut self) -> HeartRate;
}

/// Uniform over `HeartRate::MIN..=HeartRate::MAX`.
pub struct RandomHeartRate<R: Rng + Send = StdRng> {
    rng: R,
}

impl RandomHeartRate<StdRng> {
    /// Seeded from OS entropy.
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }
}

impl<R: Rng + Send> RandomHeartRate<R> {
    pub fn with_rng(rng: R) -> Self {
        Self { rng }
    }
}

impl<R: Rng + Send> HeartRateSource for RandomHeartRate<R> {
    fn next_heart_rate(&mut self) -> HeartRate {
        HeartRate(self.rng.gen_range(HeartRate::MIN..=HeartRate::MAX))
    }
}

/// Always the same value.
#[derive(Debug, Clone, Copy)]
pub struct FixedHeartRate(pub HeartRate);

impl HeartRateSource for FixedHeartRate {
    fn next_heart_rate(&mut self) -> HeartRate {
        self.0
    }
}

/// One sample, immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reading {
    pub device_id: String,
    pub heart_rate: HeartRate,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
}

impl Reading {
    pub const UNIT: &'static str = "bpm";

    pub fn new(device_id: impl Into<String>, heart_rate: HeartRate, timestamp: i64) -> Self {
        Self {
            device_id: device_id.into(),
            heart_rate,
            timestamp,
        }
    }
}
