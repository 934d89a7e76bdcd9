//! The race engineer agent: analysis tools, a ReAct loop over the chat
//! model, and prompt routing for the chat.

mod chat;
mod react;
mod tools;

pub use chat::{route, ChatSession, Route, NO_LLM_HINT, NO_SESSION};
pub use react::{Agent, ITERATION_LIMIT_ANSWER};
pub use tools::{clean_input, KnowledgeSource, ToolKind, Toolbox, KB_EMPTY};
