//! Command-line interface for race-engineer.
//!
//! This module provides the CLI structure for the `raceeng` binary. The
//! command handlers live in the binary itself.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    AskCommand, CacheCommand, ChatCommand, ConfigCommand, DeltaCommand, KbCommand, LapsCommand,
    OutputFormat, PitCommand, SessionArgs, StintsCommand, UndercutCommand,
};

/// raceeng - An AI race engineer for F1 timing data
///
/// Loads a session, summarises laps and stints, compares drivers, suggests
/// pit windows and answers strategy questions from a local knowledge base.
#[derive(Debug, Parser)]
#[command(name = "raceeng")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load a session and show its drivers and weather
    Load(SessionArgs),

    /// Show the last laps of a driver
    Laps(LapsCommand),

    /// Show a driver's stints
    Stints(StintsCommand),

    /// Compare two drivers lap by lap
    Delta(DeltaCommand),

    /// Suggest a pit lap for a driver
    Pit(PitCommand),

    /// Check whether an undercut would work
    Undercut(UndercutCommand),

    /// Ask the race engineer one question
    Ask(AskCommand),

    /// Chat with the race engineer
    Chat(ChatCommand),

    /// Manage the knowledge base
    #[command(subcommand)]
    Kb(KbCommand),

    /// Manage cached sessions
    #[command(subcommand)]
    Cache(CacheCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => crate::logging::Verbosity::Normal,
                1 => crate::logging::Verbosity::Verbose,
                _ => crate::logging::Verbosity::Trace,
            }
        }
    }
}
