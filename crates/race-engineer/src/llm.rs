//! Language model access.
//!
//! The agent and the knowledge base depend on the [`ChatModel`] and
//! [`Embedder`] traits only. [`OllamaClient`] implements both against a
//! local Ollama server.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::http::HttpClient;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions for the model.
    System,
    /// The human side.
    User,
    /// The model side.
    Assistant,
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message author.
    pub role: Role,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// An assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A chat completion model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Complete the conversation, stopping at any of `stop`.
    ///
    /// # Errors
    ///
    /// Returns an error if the model cannot be reached or answers with
    /// something unusable.
    async fn complete(&self, messages: &[ChatMessage], stop: &[&str]) -> Result<String>;

    /// Name of the chat model.
    fn model_name(&self) -> &str;
}

/// A text embedding model.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed each text; the result has one vector per input, in order.
    ///
    /// # Errors
    ///
    /// Returns an error if the model cannot be reached or the number of
    /// vectors does not match the input.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Name of the embedding model.
    fn model(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: ChatOptions<'a>,
}

#[derive(Debug, Serialize)]
struct ChatOptions<'a> {
    temperature: f32,
    #[serde(skip_serializing_if = "is_empty")]
    stop: &'a [&'a str],
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_empty(stop: &&[&str]) -> bool {
    stop.is_empty()
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

/// Client for the Ollama HTTP API.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: HttpClient,
    base_url: String,
    model: String,
    embedding_model: String,
    temperature: f32,
}

impl OllamaClient {
    /// Create a client from the `[llm]` configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            http: HttpClient::from_config(config)?,
            base_url: config.llm.base_url.trim_end_matches('/').to_string(),
            model: config.llm.model.clone(),
            embedding_model: config.llm.embedding_model.clone(),
            temperature: config.llm.temperature,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/api/{endpoint}", self.base_url)
    }
}

#[async_trait]
impl ChatModel for OllamaClient {
    async fn complete(&self, messages: &[ChatMessage], stop: &[&str]) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            stream: false,
            options: ChatOptions {
                temperature: self.temperature,
                stop,
            },
        };
        debug!(model = %self.model, messages = messages.len(), "chat completion");
        let response: ChatResponse = self.http.post_json(&self.url("chat"), &request).await?;
        response
            .message
            .map(|m| m.content)
            .ok_or_else(|| Error::llm_response("chat response has no message"))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Embedder for OllamaClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let request = EmbedRequest {
            model: &self.embedding_model,
            input: texts,
        };
        debug!(model = %self.embedding_model, inputs = texts.len(), "embedding");
        let response: EmbedResponse = self.http.post_json(&self.url("embed"), &request).await?;
        if response.embeddings.len() != texts.len() {
            return Err(Error::llm_response(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                response.embeddings.len()
            )));
        }
        Ok(response.embeddings)
    }

    fn model(&self) -> &str {
        &self.embedding_model
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client_for(server: &MockServer) -> OllamaClient {
        let mut config = Config::default();
        config.llm.base_url = format!("{}/", server.uri());
        config.http.max_retries = 0;
        OllamaClient::from_config(&config).unwrap()
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let msg = ChatMessage::assistant("hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json, json!({"role": "assistant", "content": "hi"}));
    }

    #[tokio::test]
    async fn test_complete_sends_stop_and_temperature() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(json!({
                "model": "llama3:8b",
                "stream": false,
                "options": {"temperature": 0.0, "stop": ["\nObservation:"]}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "llama3:8b",
                "message": {"role": "assistant", "content": "Final Answer: box now"},
                "done": true
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let answer = client
            .complete(&[ChatMessage::user("pit?")], &["\nObservation:"])
            .await
            .unwrap();
        assert_eq!(answer, "Final Answer: box now");
        assert_eq!(client.model_name(), "llama3:8b");
    }

    #[tokio::test]
    async fn test_complete_missing_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"done": true})))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .complete(&[ChatMessage::user("x")], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LlmResponse(_)));
    }

    #[tokio::test]
    async fn test_complete_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(404).set_body_string("model not found"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .complete(&[ChatMessage::user("x")], &[])
            .await
            .unwrap_err();
        match err {
            Error::HttpStatus { status, body, .. } => {
                assert_eq!(status, 404);
                assert_eq!(body, "model not found");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_embed_batch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .and(body_partial_json(json!({"model": "nomic-embed-text"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "embeddings": [[0.1, 0.2], [0.3, 0.4]]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let vectors = client
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![0.1, 0.2], vec![0.3, 0.4]]);
        assert_eq!(Embedder::model(&client), "nomic-embed-text");
    }

    #[tokio::test]
    async fn test_embed_count_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "embeddings": [[0.1, 0.2]]
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("expected 2 embeddings, got 1"));
    }

    #[tokio::test]
    async fn test_embed_empty_input_skips_request() {
        let server = MockServer::start().await;
        let vectors = client_for(&server).embed(&[]).await.unwrap();
        assert!(vectors.is_empty());
    }
}
