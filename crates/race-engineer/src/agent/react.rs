//! Zero-shot ReAct loop.
//!
//! The model is shown the tools and asked to answer in
//! `Thought / Action / Action Input` steps. Each action is executed and its
//! result appended as an `Observation`, until the model gives a
//! `Final Answer` or the iteration limit is reached.

use std::fmt::Write as _;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::{debug, warn};

use super::tools::{ToolKind, Toolbox};
use crate::error::Result;
use crate::llm::{ChatMessage, ChatModel};

/// Answer when the model never reaches a final answer.
pub const ITERATION_LIMIT_ANSWER: &str = "Agent stopped due to iteration limit.";

const STOP_SEQUENCE: &str = "\nObservation:";

const PREFIX: &str = "You are an AI Race Engineer.\n\
RULES:\n\
1) For lap/sector/stint/delta/pit questions → use the right tool.\n\
2) For theory/undercut/tyres/weather → use kb_ask.\n\
3) Never answer directly without calling a tool first.\n\
4) Mention which tool you used.\n";

const FORMAT_INSTRUCTIONS: &str = "Use the following format:

Question: the input question you must answer
Thought: you should always think about what to do
Action: the action to take, should be one of [{tool_names}]
Action Input: the input to the action
Observation: the result of the action
... (this Thought/Action/Action Input/Observation can repeat N times)
Thought: I now know the final answer
Final Answer: the final answer to the original input question";

const FINAL_ANSWER: &str = "Final Answer:";

/// One parsed model reply.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Final(String),
    Action { tool: String, input: String },
    Invalid(&'static str),
}

/// A ReAct agent over a chat model.
#[derive(Clone)]
pub struct Agent {
    llm: Arc<dyn ChatModel>,
    max_iterations: usize,
}

impl Agent {
    /// Create an agent allowed `max_iterations` model calls per question.
    #[must_use]
    pub fn new(llm: Arc<dyn ChatModel>, max_iterations: usize) -> Self {
        Self {
            llm,
            max_iterations,
        }
    }

    /// Answer `question` using the tools.
    ///
    /// # Errors
    ///
    /// Returns an error if the chat model fails. Tool failures and
    /// malformed replies are fed back to the model instead.
    pub async fn run(&self, toolbox: &Toolbox, question: &str) -> Result<String> {
        let header = build_prompt(question);
        let mut scratchpad = String::new();

        for iteration in 0..self.max_iterations {
            let prompt = format!("{header}{scratchpad}");
            let reply = self
                .llm
                .complete(&[ChatMessage::user(prompt)], &[STOP_SEQUENCE])
                .await?;
            debug!(iteration, reply = %reply, "agent step");

            let observation = match parse_step(&reply) {
                Step::Final(answer) => return Ok(answer),
                Step::Action { tool, input } => match ToolKind::from_name(&tool) {
                    Some(kind) => {
                        debug!(tool = %kind, input = %input, "running tool");
                        toolbox.run(kind, &input).await
                    }
                    None => {
                        warn!("Model asked for unknown tool '{}'", tool);
                        format!("{tool} is not a valid tool, try one of [{}].", tool_names())
                    }
                },
                Step::Invalid(message) => message.to_string(),
            };

            let _ = write!(
                scratchpad,
                "{}\nObservation: {observation}\nThought:",
                reply.trim_end()
            );
        }

        warn!("Agent hit the iteration limit ({})", self.max_iterations);
        Ok(ITERATION_LIMIT_ANSWER.to_string())
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("model", &self.llm.model_name())
            .field("max_iterations", &self.max_iterations)
            .finish()
    }
}

fn tool_names() -> String {
    ToolKind::ALL
        .iter()
        .map(|t| t.name())
        .collect::<Vec<_>>()
        .join(", ")
}

fn build_prompt(question: &str) -> String {
    let tools = ToolKind::ALL
        .iter()
        .map(|t| format!("{}: {}", t.name(), t.description()))
        .collect::<Vec<_>>()
        .join("\n");
    let format = FORMAT_INSTRUCTIONS.replace("{tool_names}", &tool_names());
    format!("{PREFIX}\n{tools}\n\n{format}\n\nBegin!\n\nQuestion: {question}\nThought:")
}

fn action_pattern() -> &'static Regex {
    static ACTION: OnceLock<Regex> = OnceLock::new();
    ACTION.get_or_init(|| {
        Regex::new(r"(?s)Action\s*\d*\s*:[\s]*(.*?)[\s]*Action\s*\d*\s*Input\s*\d*\s*:[\s]*(.*)")
            .expect("Invalid regex pattern")
    })
}

fn parse_step(reply: &str) -> Step {
    if let Some(pos) = reply.find(FINAL_ANSWER) {
        return Step::Final(reply[pos + FINAL_ANSWER.len()..].trim().to_string());
    }

    if let Some(caps) = action_pattern().captures(reply) {
        let tool = caps[1].trim().trim_matches('`').trim().to_string();
        let input = caps[2].trim().trim_matches('"').to_string();
        if tool.is_empty() {
            return Step::Invalid("Invalid Format: Missing 'Action:' after 'Thought:'");
        }
        return Step::Action { tool, input };
    }

    if reply.contains("Action:") {
        Step::Invalid("Invalid Format: Missing 'Action Input:' after 'Action:'")
    } else {
        Step::Invalid("Invalid Format: Missing 'Action:' after 'Thought:'")
    }
}
