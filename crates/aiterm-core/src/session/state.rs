//! Per-session state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Prefix of every session identifier.
const ID_PREFIX: &str = "term-";

/// Unique identifier for a session.
///
/// Identifiers are allocated from a strictly increasing counter and are
/// never reused, even after the session is destroyed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Build the identifier for the `n`th session created by a registry.
    pub fn from_sequence(n: u64) -> Self {
        Self(format!("{}{}", ID_PREFIX, n))
    }

    /// The sequence number this identifier was allocated from, if it has one.
    pub fn sequence(&self) -> Option<u64> {
        self.0.strip_prefix(ID_PREFIX)?.parse().ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Lifecycle of a session. `Exited` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Starting,
    Running,
    Exited,
}

/// How a session's process ended.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionExit {
    /// Exit code, absent when the process was killed by a signal or the
    /// status could not be collected.
    pub code: Option<u32>,
    /// Name of the terminating signal, if any.
    pub signal: Option<String>,
}

/// A snapshot of one shell session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub id: SessionId,
    pub shell_path: String,
    pub args: Vec<String>,
    pub working_directory: String,
    pub environment: HashMap<String, String>,
    pub columns: u16,
    pub rows: u16,
    pub state: SessionState,
    pub exit_code: Option<u32>,
    pub exit_signal: Option<String>,
    pub pid: Option<u32>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// A new record in the `Starting` state.
    pub fn starting(
        id: SessionId,
        shell_path: String,
        args: Vec<String>,
        working_directory: String,
        environment: HashMap<String, String>,
        columns: u16,
        rows: u16,
    ) -> Self {
        Self {
            id,
            shell_path,
            args,
            working_directory,
            environment,
            columns,
            rows,
            state: SessionState::Starting,
            exit_code: None,
            exit_signal: None,
            pid: None,
            created_at: Utc::now(),
        }
    }

    /// Starting -> Running. Ignored once the session has exited.
    pub fn mark_running(&mut self, pid: Option<u32>) {
        if self.state == SessionState::Starting {
            self.state = SessionState::Running;
            self.pid = pid;
        }
    }

    /// Transition to `Exited`, recording the exit status. Only the first
    /// call has any effect.
    pub fn mark_exited(&mut self, exit: &SessionExit) {
        if self.state == SessionState::Exited {
            return;
        }
        self.state = SessionState::Exited;
        self.exit_code = exit.code;
        self.exit_signal = exit.signal.clone();
    }

    pub fn is_exited(&self) -> bool {
        self.state == SessionState::Exited
    }
}
