//! The external model runtime: the trait the router dispatches through and
//! its Ollama-compatible HTTP implementation.

mod bootstrap;
mod ollama;

pub use bootstrap::{ensure_model_available, is_installed, ModelAvailability, RetryPolicy};
pub use ollama::{OllamaClient, DEFAULT_ENDPOINT};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure talking to the model runtime.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// Connection refused, timeout, broken stream.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Runtime returned HTTP {code}: {body}")]
    Status { code: u16, body: String },

    #[error("Malformed runtime response: {0}")]
    Decode(String),

    /// The runtime reported an error in its response body.
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// A stream ended before the runtime marked it done.
    #[error("Stream ended before completion")]
    Truncated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Sampling parameters sent with every chat request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 2048,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub options: GenerationOptions,
}

/// A model the runtime has installed locally.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteModel {
    pub name: String,
}

/// Lazily produced response fragments. Dropping it releases the connection.
pub type FragmentStream = Box<dyn Iterator<Item = Result<String, RuntimeError>> + Send>;

/// Operations the core needs from a model runtime. Implementations block.
pub trait ModelRuntime: Send + Sync {
    fn list_models(&self) -> Result<Vec<RemoteModel>, RuntimeError>;

    fn pull(&self, model: &str) -> Result<(), RuntimeError>;

    /// Complete a chat in one response.
    fn chat(&self, request: &ChatRequest) -> Result<String, RuntimeError>;

    /// Start a streamed chat. Errors before the first fragment are returned
    /// directly; later ones arrive as stream items.
    fn chat_stream(&self, request: &ChatRequest) -> Result<FragmentStream, RuntimeError>;
}
