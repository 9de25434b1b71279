//! Dispatches queries to the model runtime.

use std::sync::Arc;

use super::catalog::ModelCatalog;
use super::error::QueryError;
use super::prompt::build_system_prompt;
use super::query::{Query, QueryId, QueryResponse};
use super::snapshot::ContextSnapshot;
use super::stream::QueryStream;
use crate::runtime::{ChatMessage, ChatRequest, GenerationOptions, ModelRuntime, RuntimeError};

/// Selects a model, builds the request and hands it to the runtime.
///
/// Holds no locks while the runtime is working, so any number of queries
/// may be in flight at once. Never changes catalog or session state.
pub struct QueryRouter {
    catalog: Arc<ModelCatalog>,
    runtime: Arc<dyn ModelRuntime>,
    options: GenerationOptions,
}

impl QueryRouter {
    pub fn new(catalog: Arc<ModelCatalog>, runtime: Arc<dyn ModelRuntime>) -> Self {
        Self {
            catalog,
            runtime,
            options: GenerationOptions::default(),
        }
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn catalog(&self) -> &Arc<ModelCatalog> {
        &self.catalog
    }

    pub fn runtime(&self) -> &Arc<dyn ModelRuntime> {
        &self.runtime
    }

    pub fn options(&self) -> GenerationOptions {
        self.options
    }

    /// The model a query would go to: the override if registered, else the
    /// active model.
    pub fn resolve_model(&self, model_override: Option<&str>) -> Result<String, QueryError> {
        match model_override {
            Some(id) if self.catalog.contains(id) => Ok(id.to_string()),
            Some(id) => Err(QueryError::UnknownModel(id.to_string())),
            None => self.catalog.active_id().ok_or(QueryError::NoActiveModel),
        }
    }

    /// Ask and wait for the whole answer.
    pub fn query(
        &self,
        prompt: &str,
        context: Option<&ContextSnapshot>,
        model_override: Option<&str>,
    ) -> Result<String, QueryError> {
        let request = self.prepare(prompt, context, model_override)?;
        self.complete(&QueryId::new(), &request)
    }

    /// Ask and receive the answer as it is generated.
    pub fn query_streaming(
        &self,
        prompt: &str,
        context: Option<&ContextSnapshot>,
        model_override: Option<&str>,
    ) -> Result<QueryStream, QueryError> {
        self.open_stream(QueryId::new(), prompt, context, model_override)
    }

    /// Run a [`Query`], streaming or not depending on `query.streaming`.
    pub fn execute(&self, query: Query) -> Result<QueryResponse, QueryError> {
        let context = query.context.as_ref();
        let model_override = query.model_override.as_deref();

        if query.streaming {
            let stream = self.open_stream(query.id.clone(), &query.prompt, context, model_override)?;
            return Ok(QueryResponse::Stream(stream));
        }

        let request = self.prepare(&query.prompt, context, model_override)?;
        let text = self.complete(&query.id, &request)?;
        Ok(QueryResponse::Completion {
            query_id: query.id,
            model: request.model,
            text,
        })
    }

    fn open_stream(
        &self,
        id: QueryId,
        prompt: &str,
        context: Option<&ContextSnapshot>,
        model_override: Option<&str>,
    ) -> Result<QueryStream, QueryError> {
        let request = self.prepare(prompt, context, model_override)?;
        log::debug!("Streaming query {} to {}", id, request.model);
        let fragments = self
            .runtime
            .chat_stream(&request)
            .map_err(|e| unavailable(&id, &request, e))?;
        Ok(QueryStream::new(id, request.model, fragments))
    }

    fn complete(&self, id: &QueryId, request: &ChatRequest) -> Result<String, QueryError> {
        log::debug!("Query {} to {}", id, request.model);
        self.runtime
            .chat(request)
            .map_err(|e| unavailable(id, request, e))
    }

    /// Validate and build the outbound request. No I/O.
    fn prepare(
        &self,
        prompt: &str,
        context: Option<&ContextSnapshot>,
        model_override: Option<&str>,
    ) -> Result<ChatRequest, QueryError> {
        if prompt.trim().is_empty() {
            return Err(QueryError::EmptyPrompt);
        }
        let model = self.resolve_model(model_override)?;
        Ok(ChatRequest {
            model,
            messages: vec![
                ChatMessage::system(build_system_prompt(context)),
                ChatMessage::user(prompt),
            ],
            options: self.options,
        })
    }
}

fn unavailable(id: &QueryId, request: &ChatRequest, error: RuntimeError) -> QueryError {
    log::warn!("Query {} to {} failed: {}", id, request.model, error);
    QueryError::ModelUnavailable(error.to_string())
}
