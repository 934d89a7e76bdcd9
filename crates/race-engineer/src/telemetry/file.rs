//! Local file data source.
//!
//! Reads laps from a CSV export or a JSON session dump, so analysis works
//! offline and on data from other timing tools (e.g. sim racing).
//!
//! CSV columns: `Driver,LapNumber,LapTime_s,S1_s,S2_s,S3_s,Compound,Stint`.
//! Only `Driver` and `LapNumber` are required; empty cells are missing values.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{normalize_driver, Compound, Lap, Session, SessionId, SessionSource};
use crate::error::{Error, Result};

const SOURCE_NAME: &str = "file";

#[derive(Debug, Deserialize)]
struct CsvLap {
    #[serde(rename = "Driver")]
    driver: String,
    #[serde(rename = "LapNumber")]
    lap_number: u32,
    #[serde(rename = "LapTime_s", default)]
    lap_time_s: Option<f64>,
    #[serde(rename = "S1_s", default)]
    s1_s: Option<f64>,
    #[serde(rename = "S2_s", default)]
    s2_s: Option<f64>,
    #[serde(rename = "S3_s", default)]
    s3_s: Option<f64>,
    #[serde(rename = "Compound", default)]
    compound: Option<String>,
    #[serde(rename = "Stint", default)]
    stint: Option<u32>,
}

/// Session source reading a local `.csv` or `.json` file.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    /// Create a source for the given file.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path this source reads from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_json(&self) -> bool {
        self.path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("json"))
    }
}

#[async_trait]
impl SessionSource for FileSource {
    fn name(&self) -> &'static str {
        SOURCE_NAME
    }

    async fn fetch(&self, id: &SessionId) -> Result<Session> {
        debug!("Reading session data from {}", self.path.display());
        let text = tokio::fs::read_to_string(&self.path).await?;
        if self.is_json() {
            let mut session: Session = serde_json::from_str(&text)?;
            session.id = id.clone();
            return Ok(session);
        }

        let laps = parse_csv(&text)?;
        let stem = self
            .path
            .file_stem()
            .map_or_else(|| "Imported".to_string(), |s| s.to_string_lossy().into_owned());
        Ok(Session {
            id: id.clone(),
            event_name: format!("{} Grand Prix", id.grand_prix.trim()),
            session_name: format!("{} ({stem})", id.kind),
            laps,
            weather: None,
        })
    }
}

fn parse_csv(text: &str) -> Result<Vec<Lap>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let mut laps = Vec::new();
    for record in reader.deserialize::<CsvLap>() {
        let row = record?;
        let driver = normalize_driver(&row.driver);
        if driver.is_empty() {
            return Err(Error::data_source(
                SOURCE_NAME,
                format!("lap {} has an empty driver code", row.lap_number),
            ));
        }
        laps.push(Lap {
            driver,
            lap_number: row.lap_number,
            lap_time_s: row.lap_time_s,
            sector1_s: row.s1_s,
            sector2_s: row.s2_s,
            sector3_s: row.s3_s,
            compound: row
                .compound
                .as_deref()
                .filter(|c| !c.is_empty())
                .map(Compound::parse),
            stint: row.stint,
            pit_out_lap: false,
        });
    }
    Ok(laps)
}
