//! Conversational front end.
//!
//! Common prompt shapes ("lap summary VER", "VER vs LEC", "VER pit loss 20")
//! are routed straight to the matching tool; everything else goes to the
//! agent. Routing happens before the model is involved, so the quick
//! commands also work with the LLM switched off.

use std::sync::Arc;

use tracing::debug;

use super::react::Agent;
use super::tools::{KnowledgeSource, ToolKind, Toolbox};
use crate::config::StrategyConfig;
use crate::llm::ChatMessage;
use crate::telemetry::{normalize_driver, Session};

/// Answer when no session is loaded.
pub const NO_SESSION: &str = "Load a session first.";

/// Answer for free-form questions when the LLM is disabled.
pub const NO_LLM_HINT: &str = "LLM is disabled (DEMO_NO_LLM). Try 'lap summary VER', \
'stint summary VER', 'VER vs LEC', 'VER pit loss 20' or 'VER vs LEC pit loss 20 undercut'.";

const KB_KEYWORDS: [&str; 6] = ["undercut", "overcut", "tyre", "ยาง", "intermediate", "full wet"];

/// Where a prompt is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Run one tool with the given input.
    Tool(ToolKind, String),
    /// Let the agent decide.
    Agent,
}

/// Pick the route for a prompt.
#[must_use]
pub fn route(prompt: &str) -> Route {
    let q = prompt.trim();
    let lower = q.to_lowercase();
    let last_driver = || q.split_whitespace().last().map(normalize_driver).unwrap_or_default();

    if lower.contains(" vs ") && lower.contains("pit loss") && lower.contains("under") {
        Route::Tool(ToolKind::UndercutEvaluator, q.to_string())
    } else if lower.starts_with("lap summary") {
        Route::Tool(ToolKind::TelemetryQuery, last_driver())
    } else if lower.contains(" vs ") {
        Route::Tool(ToolKind::DeltaCompare, q.replace("VS", "vs"))
    } else if lower.starts_with("stint summary") {
        Route::Tool(ToolKind::StintSummary, last_driver())
    } else if lower.contains("pit loss") && (lower.contains("undercut") || lower.contains("overcut")) {
        Route::Tool(ToolKind::KbAsk, q.to_string())
    } else if lower.contains("pit loss") {
        Route::Tool(ToolKind::StrategySimulator, q.to_string())
    } else if KB_KEYWORDS.iter().any(|k| lower.contains(k)) {
        Route::Tool(ToolKind::KbAsk, q.to_string())
    } else {
        Route::Agent
    }
}

/// A chat with the race engineer about one loaded session.
#[derive(Debug)]
pub struct ChatSession {
    toolbox: Option<Toolbox>,
    agent: Option<Agent>,
    strategy: StrategyConfig,
    knowledge: KnowledgeSource,
    history: Vec<ChatMessage>,
}

impl ChatSession {
    /// Create a chat. Without an agent, only routed prompts are answered.
    #[must_use]
    pub fn new(agent: Option<Agent>, strategy: StrategyConfig, knowledge: KnowledgeSource) -> Self {
        Self {
            toolbox: None,
            agent,
            strategy,
            knowledge,
            history: Vec::new(),
        }
    }

    /// Switch to a new session. The history is cleared.
    pub fn load(&mut self, session: Session) {
        debug!("Chat bound to {}", session.describe());
        self.toolbox = Some(Toolbox::new(
            Arc::new(session),
            self.strategy.clone(),
            self.knowledge.clone(),
        ));
        self.history.clear();
    }

    /// The loaded session, if any.
    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.toolbox.as_ref().map(Toolbox::session)
    }

    /// Messages exchanged since the session was loaded.
    #[must_use]
    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Answer one prompt and record both sides in the history.
    pub async fn ask(&mut self, prompt: &str) -> String {
        let answer = self.answer(prompt).await;
        self.history.push(ChatMessage::user(prompt));
        self.history.push(ChatMessage::assistant(answer.clone()));
        answer
    }

    async fn answer(&self, prompt: &str) -> String {
        let Some(toolbox) = &self.toolbox else {
            return NO_SESSION.to_string();
        };
        let route = route(prompt);
        debug!(?route, "routing prompt");

        match (&self.agent, route) {
            (Some(agent), Route::Tool(tool, input)) => {
                let directive = format!("Use tool {} with input '{input}'", tool.name());
                agent_answer(agent, toolbox, &directive).await
            }
            (Some(agent), Route::Agent) => agent_answer(agent, toolbox, prompt.trim()).await,
            (None, Route::Tool(tool, input)) => toolbox.run(tool, &input).await,
            (None, Route::Agent) => NO_LLM_HINT.to_string(),
        }
    }
}

async fn agent_answer(agent: &Agent, toolbox: &Toolbox, input: &str) -> String {
    match agent.run(toolbox, input).await {
        Ok(answer) => answer,
        Err(e) => format!("Agent error: {e}"),
    }
}
