//! Make sure the runtime has a model installed before the first query.

use std::thread;
use std::time::Duration;

use super::{ModelRuntime, RemoteModel, RuntimeError};

/// Bounded retry with a fixed delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelAvailability {
    /// Already installed.
    Present,
    /// Installed by this call.
    Pulled,
    /// Every attempt failed; carries the last error.
    Unreachable(String),
}

impl ModelAvailability {
    pub fn is_available(&self) -> bool {
        !matches!(self, ModelAvailability::Unreachable(_))
    }
}

/// Whether `installed` contains `model`. A bare name matches its `:latest` tag.
pub fn is_installed(installed: &[RemoteModel], model: &str) -> bool {
    installed.iter().any(|m| {
        m.name == model || (!model.contains(':') && m.name == format!("{}:latest", model))
    })
}

/// List the runtime's models and pull `model` if it is missing.
///
/// Never fails: exhausting `policy` yields [`ModelAvailability::Unreachable`].
pub fn ensure_model_available(
    runtime: &dyn ModelRuntime,
    model: &str,
    policy: RetryPolicy,
) -> ModelAvailability {
    let attempts = policy.attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match try_ensure(runtime, model) {
            Ok(availability) => return availability,
            Err(e) => {
                log::warn!(
                    "Model {} not available (attempt {}/{}): {}",
                    model,
                    attempt,
                    attempts,
                    e
                );
                last_error = e.to_string();
            }
        }
        if attempt < attempts {
            thread::sleep(policy.backoff);
        }
    }

    ModelAvailability::Unreachable(last_error)
}

fn try_ensure(runtime: &dyn ModelRuntime, model: &str) -> Result<ModelAvailability, RuntimeError> {
    let installed = runtime.list_models()?;
    if is_installed(&installed, model) {
        log::debug!("Model {} already installed", model);
        return Ok(ModelAvailability::Present);
    }
    runtime.pull(model)?;
    log::info!("Pulled model {}", model);
    Ok(ModelAvailability::Pulled)
}
