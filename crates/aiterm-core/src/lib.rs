//! # aiterm-core
//!
//! Session and query core for AITerm, an AI-assisted terminal.
//!
//! This crate is UI-agnostic and can be used by:
//! - the `aiterm` command-line host
//! - a desktop shell (via IPC commands)
//! - any other frontend that consumes the [`event_bus::EventBus`]
//!
//! ## Key Concepts
//!
//! - **Session**: one interactive shell running in a pseudo-terminal
//! - **ContextSnapshot**: bounded view of a session attached to a query
//! - **QueryRouter**: picks a model and sends the prompt to the model runtime

pub mod assistant;
pub mod config;
pub mod context;
pub mod event_bus;
pub mod logging;
pub mod runtime;
pub mod session;
mod sync;

// Re-export commonly used types
pub use assistant::{
    ContextAssembler, ContextSnapshot, ModelCatalog, ModelDescriptor, Query, QueryError,
    QueryResponse, QueryRouter, QueryStream,
};
pub use config::{AppConfig, ConfigError};
pub use context::AppContext;
pub use event_bus::{EventBus, SessionEvent};
pub use runtime::{ModelRuntime, OllamaClient, RuntimeError};
pub use session::{Session, SessionError, SessionId, SessionOptions, SessionRegistry};
