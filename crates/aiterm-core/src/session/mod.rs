//! Shell sessions backed by pseudo-terminals.
//!
//! [`SessionRegistry`] is the only owner of session processes; everything
//! else refers to a session by its [`SessionId`].

mod activity;
mod error;
mod pty;
mod registry;
mod state;

pub use activity::{CommandTracker, OutputTail, SessionActivity};
pub use error::SessionError;
pub use pty::{PtyEvent, PtySession, PtySpawnConfig, EVENT_CHANNEL_CAPACITY};
pub use registry::{
    default_shell, default_working_directory, RegistrySettings, SessionOptions, SessionRegistry,
};
pub use state::{Session, SessionExit, SessionId, SessionState};
