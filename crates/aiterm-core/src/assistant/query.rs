use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::snapshot::ContextSnapshot;
use super::stream::QueryStream;

/// Identifies one query so streamed fragments reach the right consumer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryId(pub String);

impl QueryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for QueryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A request to the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    #[serde(default)]
    pub id: QueryId,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_override: Option<String>,
    #[serde(default)]
    pub streaming: bool,
}

impl Query {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            id: QueryId::new(),
            prompt: prompt.into(),
            context: None,
            model_override: None,
            streaming: false,
        }
    }

    pub fn with_context(mut self, context: ContextSnapshot) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model_override = Some(model.into());
        self
    }

    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }
}

/// Outcome of [`QueryRouter::execute`](super::QueryRouter::execute).
#[derive(Debug)]
pub enum QueryResponse {
    Completion {
        query_id: QueryId,
        model: String,
        text: String,
    },
    Stream(QueryStream),
}

impl QueryResponse {
    pub fn query_id(&self) -> &QueryId {
        match self {
            QueryResponse::Completion { query_id, .. } => query_id,
            QueryResponse::Stream(stream) => stream.id(),
        }
    }
}
