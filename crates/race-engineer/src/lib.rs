//! `race-engineer` - An AI race engineer for Formula 1 timing data
//!
//! This library loads F1 sessions from the OpenF1 timing service (or local
//! files), analyses laps, stints and head-to-head pace, and answers strategy
//! questions through a ReAct agent backed by a local LLM and a small
//! retrieval-augmented knowledge base.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod agent;
pub mod analysis;
pub mod cli;
pub mod config;
pub mod error;
pub mod http;
pub mod kb;
pub mod llm;
pub mod logging;
pub mod report;
pub mod storage;
pub mod telemetry;

pub use agent::{ChatSession, KnowledgeSource, ToolKind, Toolbox};
pub use config::Config;
pub use error::{Error, Result};
pub use logging::init_logging;
pub use storage::{Storage, StorageStats};
pub use telemetry::{Session, SessionId, SessionKind};
