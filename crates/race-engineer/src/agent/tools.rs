//! Tools the race engineer can call.
//!
//! Every tool takes free text and answers with text. Failures are reported
//! in the answer so the agent can read them as observations.

use std::fmt;
use std::sync::{Arc, OnceLock};

use regex::Regex;

use crate::analysis::{
    best_lap, evaluate_undercut, lap_delta, lap_summary, mean_delta, mean_lap, stint_summary,
    suggest_pit_lap,
};
use crate::config::StrategyConfig;
use crate::kb::KnowledgeBase;
use crate::report::stint_table;
use crate::telemetry::{normalize_driver, Session};

/// Answer from the knowledge base tool when no notes are indexed.
pub const KB_EMPTY: &str = "KB empty. Put .md files in kb/.";

const DEFAULT_DRIVER: &str = "VER";

fn vs_separator() -> &'static Regex {
    static VS: OnceLock<Regex> = OnceLock::new();
    VS.get_or_init(|| Regex::new(r"(?i)\bvs\b").expect("Invalid regex pattern"))
}

/// The tools available to the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    /// Best and average lap of one driver.
    TelemetryQuery,
    /// Stint table of one driver.
    StintSummary,
    /// Mean lap delta between two drivers.
    DeltaCompare,
    /// Pit lap recommendation.
    StrategySimulator,
    /// Question to the knowledge base.
    KbAsk,
    /// Undercut viability between two drivers.
    UndercutEvaluator,
}

impl ToolKind {
    /// All tools in prompt order.
    pub const ALL: [ToolKind; 6] = [
        Self::TelemetryQuery,
        Self::StintSummary,
        Self::DeltaCompare,
        Self::StrategySimulator,
        Self::KbAsk,
        Self::UndercutEvaluator,
    ];

    /// Name the model uses to call the tool.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::TelemetryQuery => "telemetry_query",
            Self::StintSummary => "stint_summary",
            Self::DeltaCompare => "delta_compare",
            Self::StrategySimulator => "strategy_simulator",
            Self::KbAsk => "kb_ask",
            Self::UndercutEvaluator => "undercut_evaluator",
        }
    }

    /// Description shown to the model.
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::TelemetryQuery => "Lap summary for one driver, e.g. 'lap summary VER'",
            Self::StintSummary => "Stint summary for one driver, e.g. 'stint summary VER'",
            Self::DeltaCompare => "Compare two drivers lap by lap, e.g. 'VER vs LEC'",
            Self::StrategySimulator => "Simulate a pit stop, e.g. 'VER pit loss 20'",
            Self::KbAsk => "General race engineering knowledge, e.g. 'When do we use soft tyres?'",
            Self::UndercutEvaluator => "Quick undercut check, format 'VER vs LEC pit loss 20'",
        }
    }

    /// Look a tool up by name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL.into_iter().find(|t| t.name() == name)
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where the knowledge base tool gets its answers.
#[derive(Debug, Clone)]
pub enum KnowledgeSource {
    /// An indexed knowledge base.
    Ready(Arc<KnowledgeBase>),
    /// No notes to index.
    Empty,
    /// The knowledge base could not be built.
    Unavailable(String),
}

/// The tool set bound to one loaded session.
#[derive(Debug, Clone)]
pub struct Toolbox {
    session: Arc<Session>,
    strategy: StrategyConfig,
    knowledge: KnowledgeSource,
}

impl Toolbox {
    /// Bind the tools to a session.
    #[must_use]
    pub fn new(session: Arc<Session>, strategy: StrategyConfig, knowledge: KnowledgeSource) -> Self {
        Self {
            session,
            strategy,
            knowledge,
        }
    }

    /// The session the tools analyse.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Run a tool on raw input.
    pub async fn run(&self, tool: ToolKind, input: &str) -> String {
        let input = clean_input(input);
        match tool {
            ToolKind::TelemetryQuery => self.telemetry_query(input),
            ToolKind::StintSummary => self.stint_summary(input),
            ToolKind::DeltaCompare => self.delta_compare(input),
            ToolKind::StrategySimulator => self.strategy_simulator(input),
            ToolKind::KbAsk => self.kb_ask(input).await,
            ToolKind::UndercutEvaluator => self.undercut_evaluator(input),
        }
    }

    fn telemetry_query(&self, input: &str) -> String {
        let Some(driver) = last_token(input) else {
            return "Format: 'lap summary VER'".to_string();
        };
        let rows = lap_summary(&self.session, &driver);
        match (best_lap(&rows), mean_lap(&rows)) {
            (Some(best), Some(avg)) => format!("Driver {driver}: best={best:.3}s avg={avg:.3}s"),
            _ => format!("No laps for {driver}"),
        }
    }

    fn stint_summary(&self, input: &str) -> String {
        let Some(driver) = last_token(input) else {
            return "Format: 'stint summary VER'".to_string();
        };
        let rows = stint_summary(&self.session, &driver);
        if rows.is_empty() {
            format!("No stints for {driver}")
        } else {
            stint_table(&rows).to_string()
        }
    }

    fn delta_compare(&self, input: &str) -> String {
        let Some((a, b)) = split_pair(input) else {
            return "Format: 'AAA vs BBB'".to_string();
        };
        let rows = lap_delta(&self.session, &a, &b);
        match mean_delta(&rows) {
            Some(mean) => format!("Δ(A-B) mean={mean:.3}s, samples={}", rows.len()),
            None => format!("No aligned laps for {a} vs {b}"),
        }
    }

    fn strategy_simulator(&self, input: &str) -> String {
        let tokens: Vec<&str> = input.split_whitespace().collect();
        let driver = tokens
            .first()
            .map_or_else(|| DEFAULT_DRIVER.to_string(), |t| normalize_driver(t));
        let strategy = StrategyConfig {
            pit_loss_s: tokens
                .last()
                .and_then(|t| parse_seconds(t))
                .unwrap_or(self.strategy.pit_loss_s),
            ..self.strategy.clone()
        };
        suggest_pit_lap(&self.session, &driver, &strategy).to_string()
    }

    async fn kb_ask(&self, input: &str) -> String {
        match &self.knowledge {
            KnowledgeSource::Empty => KB_EMPTY.to_string(),
            KnowledgeSource::Unavailable(reason) => format!("KB unavailable: {reason}"),
            KnowledgeSource::Ready(_) if input.is_empty() => {
                "Format: ask a question, e.g. 'When do we use soft tyres?'".to_string()
            }
            KnowledgeSource::Ready(kb) => match kb.ask(input).await {
                Ok(answer) => answer,
                Err(e) => format!("KB error: {e}"),
            },
        }
    }

    fn undercut_evaluator(&self, input: &str) -> String {
        let tokens: Vec<&str> = input.split_whitespace().collect();
        if tokens.len() < 3 || !tokens[1].eq_ignore_ascii_case("vs") {
            return "Format: 'VER vs LEC pit loss 20'".to_string();
        }
        let strategy = StrategyConfig {
            pit_loss_s: tokens
                .iter()
                .rev()
                .find_map(|t| parse_seconds(t))
                .unwrap_or(self.strategy.pit_loss_s),
            ..self.strategy.clone()
        };
        evaluate_undercut(&self.session, tokens[0], tokens[2], &strategy).to_string()
    }
}

/// Strip surrounding whitespace and quotes.
#[must_use]
pub fn clean_input(input: &str) -> &str {
    input
        .trim()
        .trim_matches(|c| matches!(c, '\'' | '"' | '`'))
        .trim()
}

fn last_token(input: &str) -> Option<String> {
    input.split_whitespace().last().map(normalize_driver)
}

/// `"... AAA vs BBB ..."` → the driver codes either side of `vs`.
fn split_pair(input: &str) -> Option<(String, String)> {
    let parts: Vec<&str> = vs_separator().split(input).collect();
    if parts.len() != 2 {
        return None;
    }
    let a = parts[0].split_whitespace().last()?;
    let b = parts[1].split_whitespace().next()?;
    Some((normalize_driver(a), normalize_driver(b)))
}

/// A non-negative number of seconds, optionally suffixed with `s`.
fn parse_seconds(token: &str) -> Option<f64> {
    let token = token.trim_end_matches(['s', 'S', '?', '.', ',']);
    token
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
}
