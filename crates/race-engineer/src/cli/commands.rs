//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

use crate::telemetry::{SessionId, SessionKind};

/// Session selection shared by every command that needs telemetry.
#[derive(Debug, Clone, Args)]
pub struct SessionArgs {
    /// Season
    #[arg(long, default_value_t = 2024, value_parser = clap::value_parser!(i32).range(2018..))]
    pub year: i32,

    /// Grand prix name (e.g. "Bahrain", "Monaco")
    #[arg(long, default_value = "Bahrain")]
    pub gp: String,

    /// Session: FP1, FP2, FP3, Q, SQ, S or R
    #[arg(long, default_value = "Q", value_parser = parse_session_kind)]
    pub session: SessionKind,

    /// Read laps from a CSV or JSON file instead of the timing service
    #[arg(long, value_name = "PATH")]
    pub from_file: Option<PathBuf>,

    /// Ignore the cached copy and fetch again
    #[arg(long)]
    pub refresh: bool,
}

impl SessionArgs {
    /// The session these arguments select.
    #[must_use]
    pub fn id(&self) -> SessionId {
        SessionId::new(self.year, self.gp.clone(), self.session)
    }
}

fn parse_session_kind(s: &str) -> Result<SessionKind, String> {
    s.parse().map_err(|e: crate::Error| e.to_string())
}

/// Lap table arguments.
#[derive(Debug, Args)]
pub struct LapsCommand {
    /// Driver code (e.g. VER)
    pub driver: String,

    /// Number of final laps to show
    #[arg(short, long, default_value = "8")]
    pub tail: usize,

    #[command(flatten)]
    pub session: SessionArgs,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

/// Stint table arguments.
#[derive(Debug, Args)]
pub struct StintsCommand {
    /// Driver code (e.g. VER)
    pub driver: String,

    #[command(flatten)]
    pub session: SessionArgs,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

/// Lap delta arguments.
#[derive(Debug, Args)]
pub struct DeltaCommand {
    /// First driver
    pub driver_a: String,

    /// Second driver
    pub driver_b: String,

    /// Number of final laps to show
    #[arg(short, long, default_value = "12")]
    pub tail: usize,

    #[command(flatten)]
    pub session: SessionArgs,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

/// Pit window arguments.
#[derive(Debug, Args)]
pub struct PitCommand {
    /// Driver code (e.g. VER)
    pub driver: String,

    /// Pit lane time loss in seconds (defaults to the configured value)
    #[arg(long, value_name = "SECONDS")]
    pub pit_loss: Option<f64>,

    #[command(flatten)]
    pub session: SessionArgs,

    /// Output format
    #[arg(short, long, value_enum, default_value = "plain")]
    pub format: OutputFormat,
}

/// Undercut check arguments.
#[derive(Debug, Args)]
pub struct UndercutCommand {
    /// Driver who pits first
    pub attacker: String,

    /// Driver who stays out
    pub defender: String,

    /// Pit lane time loss in seconds (defaults to the configured value)
    #[arg(long, value_name = "SECONDS")]
    pub pit_loss: Option<f64>,

    #[command(flatten)]
    pub session: SessionArgs,

    /// Output format
    #[arg(short, long, value_enum, default_value = "plain")]
    pub format: OutputFormat,
}

/// One-shot question arguments.
#[derive(Debug, Args)]
pub struct AskCommand {
    /// The question, e.g. "lap summary VER" or "VER vs LEC"
    pub question: String,

    #[command(flatten)]
    pub session: SessionArgs,
}

/// Interactive chat arguments.
#[derive(Debug, Args)]
pub struct ChatCommand {
    #[command(flatten)]
    pub session: SessionArgs,
}

/// Knowledge base commands.
#[derive(Debug, Subcommand)]
pub enum KbCommand {
    /// Index the knowledge base documents
    Index {
        /// Re-embed even if the documents are unchanged
        #[arg(short, long)]
        force: bool,
    },

    /// Ask the knowledge base a question
    Ask {
        /// The question
        question: String,
    },

    /// Show knowledge base status
    Status {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Drop the stored chunks and embeddings
    Clear,
}

/// Session cache commands.
#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// List cached sessions
    List {
        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Remove one cached session
    Remove {
        /// Season
        #[arg(long)]
        year: i32,

        /// Grand prix name
        #[arg(long)]
        gp: String,

        /// Session: FP1, FP2, FP3, Q, SQ, S or R
        #[arg(long, value_parser = parse_session_kind)]
        session: SessionKind,
    },

    /// Remove every cached session
    Clear,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Output format for commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Plain text output
    #[default]
    Plain,
    /// Formatted table
    Table,
    /// JSON output
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_args() -> SessionArgs {
        SessionArgs {
            year: 2023,
            gp: "Monaco".to_string(),
            session: SessionKind::R,
            from_file: None,
            refresh: false,
        }
    }

    #[test]
    fn test_session_args_id() {
        let id = session_args().id();
        assert_eq!(id.year, 2023);
        assert_eq!(id.grand_prix, "Monaco");
        assert_eq!(id.kind, SessionKind::R);
    }

    #[test]
    fn test_parse_session_kind() {
        assert_eq!(parse_session_kind("fp2"), Ok(SessionKind::FP2));
        let err = parse_session_kind("warmup").unwrap_err();
        assert!(err.contains("unknown session 'warmup'"), "{err}");
    }

    #[test]
    fn test_output_format_default() {
        assert_eq!(OutputFormat::default(), OutputFormat::Plain);
    }

    #[test]
    fn test_laps_command_debug() {
        let cmd = LapsCommand {
            driver: "VER".to_string(),
            tail: 8,
            session: session_args(),
            format: OutputFormat::Table,
        };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("driver"));
        assert!(debug_str.contains("Monaco"));
    }

    #[test]
    fn test_kb_command_debug() {
        let cmd = KbCommand::Index { force: true };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("Index"));
        assert!(debug_str.contains("force"));
    }

    #[test]
    fn test_config_command_debug() {
        let cmd = ConfigCommand::Show { json: false };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("Show"));
    }

    #[test]
    fn test_output_format_debug() {
        let format = OutputFormat::Json;
        let debug_str = format!("{format:?}");
        assert_eq!(debug_str, "Json");
    }
}
