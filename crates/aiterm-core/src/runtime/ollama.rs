//! Blocking client for an Ollama-compatible HTTP API.

use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader};
use std::time::Duration;

use super::{ChatMessage, ChatRequest, FragmentStream, ModelRuntime, RemoteModel, RuntimeError};

pub const DEFAULT_ENDPOINT: &str = "http://localhost:11434";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Serialize)]
struct WireOptions {
    temperature: f32,
    top_p: f32,
    num_predict: u32,
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    options: WireOptions,
    stream: bool,
}

impl<'a> ChatBody<'a> {
    fn new(request: &'a ChatRequest) -> Self {
        Self {
            model: &request.model,
            messages: &request.messages,
            options: WireOptions {
                temperature: request.options.temperature,
                top_p: request.options.top_p,
                num_predict: request.options.max_tokens,
            },
            // The read timeout bounds the gap between fragments.
            stream: true,
        }
    }
}

#[derive(Deserialize, Default)]
struct WireMessage {
    #[serde(default)]
    content: String,
}

/// One NDJSON line of a chat response.
#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<WireMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<RemoteModel>,
}

/// One NDJSON line of a pull response.
#[derive(Deserialize)]
struct PullStatus {
    #[serde(default)]
    status: String,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP client for `/api/tags`, `/api/pull` and `/api/chat`.
#[derive(Clone)]
pub struct OllamaClient {
    endpoint: String,
    agent: ureq::Agent,
}

impl OllamaClient {
    pub fn new(endpoint: &str) -> Self {
        Self::with_timeouts(endpoint, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT)
    }

    /// `read` bounds each socket read, so a stream that goes quiet for
    /// longer than that fails with a transport error.
    pub fn with_timeouts(endpoint: &str, connect: Duration, read: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(connect)
            .timeout_read(read)
            .build();
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            agent,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    fn post_chat(&self, request: &ChatRequest) -> Result<ChatChunks<impl BufRead>, RuntimeError> {
        log::debug!(
            "POST /api/chat model={} messages={}",
            request.model,
            request.messages.len()
        );
        let response = self
            .agent
            .post(&self.url("/api/chat"))
            .send_json(ChatBody::new(request))
            .map_err(from_ureq)?;
        Ok(ChatChunks::new(BufReader::new(response.into_reader())))
    }
}

impl ModelRuntime for OllamaClient {
    fn list_models(&self) -> Result<Vec<RemoteModel>, RuntimeError> {
        let response = self.agent.get(&self.url("/api/tags")).call().map_err(from_ureq)?;
        let tags: TagsResponse = response
            .into_json()
            .map_err(|e| RuntimeError::Decode(e.to_string()))?;
        Ok(tags.models)
    }

    fn pull(&self, model: &str) -> Result<(), RuntimeError> {
        log::info!("Pulling model {}", model);
        // Progress lines keep each read within the read timeout.
        let response = self
            .agent
            .post(&self.url("/api/pull"))
            .send_json(serde_json::json!({ "model": model, "stream": true }))
            .map_err(from_ureq)?;
        follow_pull(BufReader::new(response.into_reader()), model)
    }

    fn chat(&self, request: &ChatRequest) -> Result<String, RuntimeError> {
        self.post_chat(request)?.collect()
    }

    fn chat_stream(&self, request: &ChatRequest) -> Result<FragmentStream, RuntimeError> {
        Ok(Box::new(self.post_chat(request)?))
    }
}

/// Read pull progress until the `success` status. A body that ends before
/// it is a truncated pull.
fn follow_pull<R: BufRead>(reader: R, model: &str) -> Result<(), RuntimeError> {
    let mut last_status = String::new();
    for line in reader.lines() {
        let line = line.map_err(|e| RuntimeError::Transport(e.to_string()))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let update: PullStatus =
            serde_json::from_str(line).map_err(|e| RuntimeError::Decode(e.to_string()))?;
        if let Some(error) = update.error {
            return Err(RuntimeError::Runtime(error));
        }
        if update.status == "success" {
            log::info!("Pulled model {}", model);
            return Ok(());
        }
        if update.status != last_status {
            log::debug!("Pull {}: {}", model, update.status);
            last_status = update.status;
        }
    }
    Err(RuntimeError::Truncated)
}

fn from_ureq(error: ureq::Error) -> RuntimeError {
    match error {
        ureq::Error::Status(code, response) => RuntimeError::Status {
            code,
            body: response.into_string().unwrap_or_default(),
        },
        ureq::Error::Transport(transport) => RuntimeError::Transport(transport.to_string()),
    }
}

/// Iterator over the content fragments of an NDJSON chat stream.
///
/// Yields at most one error, after which it is exhausted.
pub(crate) struct ChatChunks<R> {
    reader: R,
    line: String,
    finished: bool,
}

impl<R: BufRead> ChatChunks<R> {
    pub(crate) fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
            finished: false,
        }
    }

    fn fail(&mut self, error: RuntimeError) -> Option<Result<String, RuntimeError>> {
        self.finished = true;
        Some(Err(error))
    }
}

impl<R: BufRead> Iterator for ChatChunks<R> {
    type Item = Result<String, RuntimeError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => return self.fail(RuntimeError::Truncated),
                Ok(_) => {}
                Err(e) => return self.fail(RuntimeError::Transport(e.to_string())),
            }

            let line = self.line.trim();
            if line.is_empty() {
                continue;
            }

            let chunk: ChatChunk = match serde_json::from_str(line) {
                Ok(chunk) => chunk,
                Err(e) => return self.fail(RuntimeError::Decode(e.to_string())),
            };
            if let Some(error) = chunk.error {
                return self.fail(RuntimeError::Runtime(error));
            }

            let content = chunk.message.map(|m| m.content).unwrap_or_default();
            if chunk.done {
                self.finished = true;
            }
            if !content.is_empty() {
                return Some(Ok(content));
            }
        }
        None
    }
}
