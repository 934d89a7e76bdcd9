//! Session timing data: types and loading.
//!
//! A [`Session`] holds every timed lap of one F1 session together with tyre
//! and weather information. Sessions come from a [`SessionSource`] (the
//! OpenF1 API or a local file) and are cached in storage by the
//! [`SessionLoader`].

mod file;
mod loader;
mod openf1;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use file::FileSource;
pub use loader::SessionLoader;
pub use openf1::OpenF1Source;

/// The kind of session within a race weekend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionKind {
    /// First free practice.
    FP1,
    /// Second free practice.
    FP2,
    /// Third free practice.
    FP3,
    /// Qualifying.
    Q,
    /// Sprint qualifying (sprint shootout).
    SQ,
    /// Sprint race.
    S,
    /// Grand prix race.
    R,
}

impl SessionKind {
    /// All kinds in weekend order.
    pub const ALL: [SessionKind; 7] = [
        Self::FP1,
        Self::FP2,
        Self::FP3,
        Self::Q,
        Self::SQ,
        Self::S,
        Self::R,
    ];

    /// Short code as used on the command line.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::FP1 => "FP1",
            Self::FP2 => "FP2",
            Self::FP3 => "FP3",
            Self::Q => "Q",
            Self::SQ => "SQ",
            Self::S => "S",
            Self::R => "R",
        }
    }

    /// Session names used by the timing service for this kind.
    ///
    /// Sprint qualifying was called "Sprint Shootout" in 2023.
    #[must_use]
    pub fn official_names(self) -> &'static [&'static str] {
        match self {
            Self::FP1 => &["Practice 1"],
            Self::FP2 => &["Practice 2"],
            Self::FP3 => &["Practice 3"],
            Self::Q => &["Qualifying"],
            Self::SQ => &["Sprint Qualifying", "Sprint Shootout"],
            Self::S => &["Sprint"],
            Self::R => &["Race"],
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for SessionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|k| k.code().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                Error::invalid_input(format!(
                    "unknown session '{s}' (expected one of FP1, FP2, FP3, Q, SQ, S, R)"
                ))
            })
    }
}

/// Identifies one session: season, grand prix and session kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId {
    /// Season year.
    pub year: i32,
    /// Grand prix as given by the user (e.g. "Bahrain", "Monaco").
    pub grand_prix: String,
    /// Session kind.
    pub kind: SessionKind,
}

impl SessionId {
    /// Create a new session id.
    #[must_use]
    pub fn new(year: i32, grand_prix: impl Into<String>, kind: SessionKind) -> Self {
        Self {
            year,
            grand_prix: grand_prix.into(),
            kind,
        }
    }

    /// Grand prix normalised for cache lookups.
    #[must_use]
    pub fn grand_prix_key(&self) -> String {
        self.grand_prix.trim().to_lowercase()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.year, self.grand_prix.trim(), self.kind)
    }
}

/// Tyre compound fitted for a lap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Compound {
    /// Hard slick.
    Hard,
    /// Intermediate.
    Intermediate,
    /// Medium slick.
    Medium,
    /// Soft slick.
    Soft,
    /// Full wet.
    Wet,
    /// Reported but not recognised.
    Unknown,
}

impl Compound {
    /// Parse a compound name; anything unrecognised maps to `Unknown`.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_uppercase().as_str() {
            "SOFT" => Self::Soft,
            "MEDIUM" => Self::Medium,
            "HARD" => Self::Hard,
            "INTERMEDIATE" => Self::Intermediate,
            "WET" => Self::Wet,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for Compound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Soft => "SOFT",
            Self::Medium => "MEDIUM",
            Self::Hard => "HARD",
            Self::Intermediate => "INTERMEDIATE",
            Self::Wet => "WET",
            Self::Unknown => "?",
        };
        f.write_str(s)
    }
}

/// A single timed lap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lap {
    /// Three-letter driver code.
    pub driver: String,
    /// Lap number within the session.
    pub lap_number: u32,
    /// Lap time in seconds, if recorded.
    pub lap_time_s: Option<f64>,
    /// Sector 1 time in seconds.
    pub sector1_s: Option<f64>,
    /// Sector 2 time in seconds.
    pub sector2_s: Option<f64>,
    /// Sector 3 time in seconds.
    pub sector3_s: Option<f64>,
    /// Tyre compound, if known.
    pub compound: Option<Compound>,
    /// Stint number, if known.
    pub stint: Option<u32>,
    /// Whether the lap started in the pit lane.
    #[serde(default)]
    pub pit_out_lap: bool,
}

/// Aggregated weather over a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeatherSummary {
    /// Number of weather samples aggregated.
    pub samples: usize,
    /// Mean air temperature in °C.
    pub air_temp_avg_c: Option<f64>,
    /// Mean track temperature in °C.
    pub track_temp_avg_c: Option<f64>,
    /// Mean relative humidity in %.
    pub humidity_avg: Option<f64>,
    /// Whether any sample reported rain.
    pub rainfall: bool,
}

/// A loaded session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Which session this is.
    pub id: SessionId,
    /// Event name, e.g. "Bahrain Grand Prix".
    pub event_name: String,
    /// Session name, e.g. "Qualifying".
    pub session_name: String,
    /// All laps of all drivers.
    pub laps: Vec<Lap>,
    /// Weather, when available.
    #[serde(default)]
    pub weather: Option<WeatherSummary>,
}

impl Session {
    /// Human-readable one-line description.
    #[must_use]
    pub fn describe(&self) -> String {
        format!(
            "{} {} ({})",
            self.event_name, self.session_name, self.id.year
        )
    }

    /// Sorted distinct driver codes.
    #[must_use]
    pub fn drivers(&self) -> Vec<String> {
        let mut drivers: Vec<String> = self.laps.iter().map(|l| l.driver.clone()).collect();
        drivers.sort();
        drivers.dedup();
        drivers
    }

    /// Laps of one driver in stored order.
    pub fn laps_for<'a>(&'a self, driver: &'a str) -> impl Iterator<Item = &'a Lap> + 'a {
        let driver = normalize_driver(driver);
        self.laps.iter().filter(move |l| l.driver == driver)
    }
}

/// Normalise a driver code (trimmed, upper-case).
#[must_use]
pub fn normalize_driver(code: &str) -> String {
    code.trim().to_uppercase()
}

/// A provider of session data.
#[async_trait]
pub trait SessionSource: Send + Sync {
    /// The name of this source (for logging and errors).
    fn name(&self) -> &'static str;

    /// Fetch a complete session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionNotFound`] if the session does not exist, or
    /// a transport/parse error if the data cannot be obtained.
    async fn fetch(&self, id: &SessionId) -> Result<Session>;
}
