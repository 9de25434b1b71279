use super::state::SessionId;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The shell process could not be started. Fatal to that session only.
    #[error("Failed to spawn session: {0}")]
    Spawn(String),

    #[error("Session not found: {0}")]
    NotFound(SessionId),

    #[error("Invalid terminal size {cols}x{rows}: both dimensions must be positive")]
    InvalidSize { cols: u16, rows: u16 },

    #[error("Session I/O failed: {0}")]
    Io(String),
}

/// Reject zero-sized terminals.
pub(crate) fn validate_size(cols: u16, rows: u16) -> Result<(), SessionError> {
    if cols == 0 || rows == 0 {
        return Err(SessionError::InvalidSize { cols, rows });
    }
    Ok(())
}
