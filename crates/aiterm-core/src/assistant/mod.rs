//! The assistant side: model catalog, context snapshots, prompt building and
//! query routing.

mod catalog;
mod error;
mod prompt;
mod query;
mod router;
mod snapshot;
mod stream;

pub use catalog::{default_models, ModelCatalog, ModelDescriptor, DEFAULT_MODEL_ID};
pub use error::QueryError;
pub use prompt::{build_system_prompt, PREAMBLE};
pub use query::{Query, QueryId, QueryResponse};
pub use router::QueryRouter;
pub use snapshot::{
    strip_ansi, ContextAssembler, ContextSnapshot, SessionObservation, DEFAULT_MAX_COMMANDS,
    DEFAULT_MAX_OUTPUT_CHARS,
};
pub use stream::{CancelHandle, QueryStream};
