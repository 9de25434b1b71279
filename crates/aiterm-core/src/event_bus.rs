//! Framework-agnostic session event broadcasting.
//!
//! The EventBus fans session lifecycle events out to any number of consumers
//! (a desktop shell, a CLI host, a WebSocket bridge) from a single source.
//! Each event names the session it belongs to, so a consumer interested in
//! one session filters on [`SessionEvent::session_id`].
//!
//! # Example
//!
//! ```rust
//! use aiterm_core::event_bus::{EventBus, SessionEvent};
//! use aiterm_core::session::SessionId;
//!
//! let bus = EventBus::new();
//! let mut rx = bus.subscribe();
//!
//! bus.emit(SessionEvent::Created { session_id: SessionId::from_sequence(1) });
//!
//! let event = rx.try_recv().unwrap();
//! assert_eq!(event.event_type(), "session:created:term-1");
//! ```

use serde::Serialize;
use tokio::sync::broadcast;

use crate::session::{SessionExit, SessionId};

/// Default channel capacity for the event bus.
/// A subscriber that falls further behind than this loses the oldest events
/// and sees `RecvError::Lagged` on its next receive.
const DEFAULT_CAPACITY: usize = 1024;

/// A session lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    Created { session_id: SessionId },
    /// A chunk of raw process output, in process order.
    Data { session_id: SessionId, data: Vec<u8> },
    /// The process ended. No `Data` for this session follows it.
    Exit {
        session_id: SessionId,
        exit: SessionExit,
    },
    /// The session was removed from the registry.
    Destroyed { session_id: SessionId },
}

impl SessionEvent {
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::Created { session_id }
            | Self::Data { session_id, .. }
            | Self::Exit { session_id, .. }
            | Self::Destroyed { session_id } => session_id,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Data { .. } => "data",
            Self::Exit { .. } => "exit",
            Self::Destroyed { .. } => "destroyed",
        }
    }

    /// Channel name for IPC bridges, e.g. `session:data:term-1`.
    pub fn event_type(&self) -> String {
        format!("session:{}:{}", self.kind(), self.session_id())
    }
}

/// Broadcasts [`SessionEvent`]s to every subscriber.
///
/// Uses a tokio broadcast channel internally. Emitting never blocks; a slow
/// subscriber loses the oldest events rather than stalling the sessions.
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    /// Create a new EventBus with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a new EventBus with specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Emit an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, 0 when
    /// nobody is listening.
    pub fn emit(&self, event: SessionEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Subscribe to all future events. Past events are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
