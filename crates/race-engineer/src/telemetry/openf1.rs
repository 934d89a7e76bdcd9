//! OpenF1 HTTP data source.
//!
//! Resolves a [`SessionId`] to an OpenF1 `session_key`, then pulls laps,
//! stints, drivers and weather for that key and joins them into a
//! [`Session`].

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use super::{Compound, Lap, Session, SessionId, SessionSource, WeatherSummary};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::http::HttpClient;

const SOURCE_NAME: &str = "openf1";

#[derive(Debug, Clone, Deserialize)]
struct ApiSession {
    session_key: u64,
    session_name: String,
    meeting_key: u64,
    #[serde(default)]
    country_name: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    circuit_short_name: Option<String>,
    #[serde(default)]
    date_start: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiMeeting {
    meeting_key: u64,
    #[serde(default)]
    meeting_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiDriver {
    driver_number: u32,
    #[serde(default)]
    name_acronym: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiLap {
    driver_number: u32,
    lap_number: u32,
    #[serde(default)]
    lap_duration: Option<f64>,
    #[serde(default)]
    duration_sector_1: Option<f64>,
    #[serde(default)]
    duration_sector_2: Option<f64>,
    #[serde(default)]
    duration_sector_3: Option<f64>,
    #[serde(default)]
    is_pit_out_lap: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiStint {
    driver_number: u32,
    stint_number: u32,
    #[serde(default)]
    compound: Option<String>,
    #[serde(default)]
    lap_start: Option<u32>,
    #[serde(default)]
    lap_end: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiWeather {
    #[serde(default)]
    air_temperature: Option<f64>,
    #[serde(default)]
    track_temperature: Option<f64>,
    #[serde(default)]
    humidity: Option<f64>,
    #[serde(default)]
    rainfall: Option<f64>,
}

/// Session source backed by the public OpenF1 API.
#[derive(Debug, Clone)]
pub struct OpenF1Source {
    client: HttpClient,
    base_url: String,
}

impl OpenF1Source {
    /// Create a source from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            client: HttpClient::from_config(config)?,
            base_url: config.openf1.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let url = format!("{}/{endpoint}", self.base_url);
        self.client.get_json(&url, query).await
    }
}

#[async_trait]
impl SessionSource for OpenF1Source {
    fn name(&self) -> &'static str {
        SOURCE_NAME
    }

    async fn fetch(&self, id: &SessionId) -> Result<Session> {
        let year = [("year", id.year.to_string())];
        let sessions: Vec<ApiSession> = self.get("sessions", &year).await?;
        let meetings: Vec<ApiMeeting> = self.get("meetings", &year).await?;
        let meeting_names: HashMap<u64, String> = meetings
            .into_iter()
            .filter_map(|m| m.meeting_name.map(|n| (m.meeting_key, n)))
            .collect();

        let found = find_session(&sessions, &meeting_names, id).ok_or_else(|| {
            Error::SessionNotFound {
                year: id.year,
                grand_prix: id.grand_prix.clone(),
                kind: id.kind.to_string(),
            }
        })?;
        info!(
            session_key = found.session_key,
            "Resolved {} to {}",
            id,
            found.session_name
        );

        let key = [("session_key", found.session_key.to_string())];
        let drivers: Vec<ApiDriver> = self.get("drivers", &key).await?;
        let laps: Vec<ApiLap> = self.get("laps", &key).await?;
        let stints: Vec<ApiStint> = self.get("stints", &key).await?;
        let weather: Vec<ApiWeather> = self.get("weather", &key).await?;
        debug!(
            drivers = drivers.len(),
            laps = laps.len(),
            stints = stints.len(),
            weather = weather.len(),
            "Fetched session payloads"
        );

        if laps.is_empty() {
            return Err(Error::data_source(
                SOURCE_NAME,
                format!("session {} has no lap data yet", found.session_key),
            ));
        }

        let event_name = meeting_names
            .get(&found.meeting_key)
            .cloned()
            .or_else(|| {
                found
                    .country_name
                    .as_ref()
                    .map(|c| format!("{c} Grand Prix"))
            })
            .unwrap_or_else(|| id.grand_prix.clone());

        Ok(Session {
            id: id.clone(),
            event_name,
            session_name: found.session_name.clone(),
            laps: assemble_laps(&drivers, &laps, &stints),
            weather: summarize_weather(&weather),
        })
    }
}

/// Pick the session matching the requested grand prix and kind.
///
/// A match on meeting name, location or circuit beats a match on country
/// (several grands prix share a country); ties go to the earliest session.
fn find_session<'a>(
    sessions: &'a [ApiSession],
    meeting_names: &HashMap<u64, String>,
    id: &SessionId,
) -> Option<&'a ApiSession> {
    let wanted = id.grand_prix.trim().to_lowercase();
    let names = id.kind.official_names();
    let eq = |field: Option<&String>| field.is_some_and(|v| v.trim().to_lowercase() == wanted);

    sessions
        .iter()
        .filter(|s| names.iter().any(|n| n.eq_ignore_ascii_case(&s.session_name)))
        .filter_map(|s| {
            let meeting = meeting_names.get(&s.meeting_key).map(|n| n.to_lowercase());
            let meeting_match = meeting.is_some_and(|m| {
                m == wanted || m == format!("{wanted} grand prix")
            });
            let score = if meeting_match
                || eq(s.location.as_ref())
                || eq(s.circuit_short_name.as_ref())
            {
                2
            } else if eq(s.country_name.as_ref()) {
                1
            } else {
                0
            };
            (score > 0).then_some((score, s))
        })
        .min_by(|(sa, a), (sb, b)| sb.cmp(sa).then_with(|| a.date_start.cmp(&b.date_start)))
        .map(|(_, s)| s)
}

/// Join raw laps with driver acronyms and stint information.
fn assemble_laps(drivers: &[ApiDriver], laps: &[ApiLap], stints: &[ApiStint]) -> Vec<Lap> {
    let acronyms: HashMap<u32, String> = drivers
        .iter()
        .filter_map(|d| d.name_acronym.as_ref().map(|a| (d.driver_number, a.to_uppercase())))
        .collect();

    let mut out: Vec<Lap> = laps
        .iter()
        .map(|l| {
            let stint = stints.iter().find(|s| {
                s.driver_number == l.driver_number
                    && s.lap_start.is_some_and(|start| start <= l.lap_number)
                    && s.lap_end.map_or(true, |end| l.lap_number <= end)
            });
            Lap {
                driver: acronyms
                    .get(&l.driver_number)
                    .cloned()
                    .unwrap_or_else(|| l.driver_number.to_string()),
                lap_number: l.lap_number,
                lap_time_s: l.lap_duration,
                sector1_s: l.duration_sector_1,
                sector2_s: l.duration_sector_2,
                sector3_s: l.duration_sector_3,
                compound: stint
                    .and_then(|s| s.compound.as_deref())
                    .map(Compound::parse),
                stint: stint.map(|s| s.stint_number),
                pit_out_lap: l.is_pit_out_lap.unwrap_or(false),
            }
        })
        .collect();
    out.sort_by(|a, b| a.driver.cmp(&b.driver).then(a.lap_number.cmp(&b.lap_number)));
    out
}

fn summarize_weather(samples: &[ApiWeather]) -> Option<WeatherSummary> {
    if samples.is_empty() {
        return None;
    }
    let mean = |values: Vec<f64>| {
        if values.is_empty() {
            None
        } else {
            #[allow(clippy::cast_precision_loss)]
            Some(values.iter().sum::<f64>() / values.len() as f64)
        }
    };
    Some(WeatherSummary {
        samples: samples.len(),
        air_temp_avg_c: mean(samples.iter().filter_map(|w| w.air_temperature).collect()),
        track_temp_avg_c: mean(samples.iter().filter_map(|w| w.track_temperature).collect()),
        humidity_avg: mean(samples.iter().filter_map(|w| w.humidity).collect()),
        rainfall: samples.iter().any(|w| w.rainfall.is_some_and(|r| r > 0.0)),
    })
}
