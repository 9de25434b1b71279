//! Application configuration.
//!
//! Loaded from a JSON file in which every field is optional. Missing fields
//! take the defaults below; hosts may override individual fields afterwards
//! (the `aiterm` binary does so for its command-line flags).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::assistant::{
    default_models, ContextAssembler, ModelCatalog, ModelDescriptor, DEFAULT_MAX_COMMANDS,
    DEFAULT_MAX_OUTPUT_CHARS, DEFAULT_MODEL_ID,
};
use crate::runtime::{GenerationOptions, OllamaClient, RetryPolicy, DEFAULT_ENDPOINT};
use crate::session::{default_shell, default_working_directory, RegistrySettings};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Cannot parse shell command line: {0:?}")]
    InvalidShell(String),
}

/// Limits applied when building context snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextLimits {
    pub max_output_chars: usize,
    pub max_commands: usize,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            max_output_chars: DEFAULT_MAX_OUTPUT_CHARS,
            max_commands: DEFAULT_MAX_COMMANDS,
        }
    }
}

/// Startup check that the default model is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub enabled: bool,
    pub attempts: u32,
    pub backoff_ms: u64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            attempts: 3,
            backoff_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Shell command line, split with shell-word rules. `None` means `$SHELL`.
    pub shell: Option<String>,
    /// `None` means `$HOME`.
    pub working_directory: Option<String>,
    pub environment: HashMap<String, String>,
    pub columns: u16,
    pub rows: u16,
    pub model_endpoint: String,
    pub default_model: String,
    /// Replaces the built-in model table when set.
    pub models: Option<Vec<ModelDescriptor>>,
    pub generation: GenerationOptions,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub destroy_grace_ms: u64,
    pub context: ContextLimits,
    pub output_buffer_bytes: usize,
    pub command_history_len: usize,
    pub transcript_dir: Option<PathBuf>,
    pub bootstrap: BootstrapConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            shell: None,
            working_directory: None,
            environment: HashMap::new(),
            columns: 80,
            rows: 24,
            model_endpoint: DEFAULT_ENDPOINT.to_string(),
            default_model: DEFAULT_MODEL_ID.to_string(),
            models: None,
            generation: GenerationOptions::default(),
            request_timeout_secs: 120,
            connect_timeout_secs: 5,
            destroy_grace_ms: 2000,
            context: ContextLimits::default(),
            output_buffer_bytes: 64 * 1024,
            command_history_len: 100,
            transcript_dir: None,
            bootstrap: BootstrapConfig::default(),
        }
    }
}

impl AppConfig {
    /// Read and parse a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// [`load`](Self::load) when a path is given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Shell path and arguments, e.g. `"zsh -l"` gives `("zsh", ["-l"])`.
    pub fn shell_command(&self) -> Result<(String, Vec<String>), ConfigError> {
        let Some(ref line) = self.shell else {
            return Ok((default_shell(), Vec::new()));
        };
        let mut words = shlex::split(line)
            .filter(|words| !words.is_empty())
            .ok_or_else(|| ConfigError::InvalidShell(line.clone()))?
            .into_iter();
        let shell = words.next().ok_or_else(|| ConfigError::InvalidShell(line.clone()))?;
        Ok((shell, words.collect()))
    }

    pub fn registry_settings(&self) -> Result<RegistrySettings, ConfigError> {
        let (shell, args) = self.shell_command()?;
        Ok(RegistrySettings {
            default_shell: shell,
            default_args: args,
            default_working_directory: self
                .working_directory
                .clone()
                .unwrap_or_else(default_working_directory),
            default_environment: self.environment.clone(),
            default_columns: self.columns,
            default_rows: self.rows,
            destroy_grace: Duration::from_millis(self.destroy_grace_ms),
            output_buffer_bytes: self.output_buffer_bytes,
            command_history_len: self.command_history_len,
            assembler: ContextAssembler::new(
                self.context.max_output_chars,
                self.context.max_commands,
            ),
            transcript_dir: self.transcript_dir.clone(),
        })
    }

    /// Catalog from `models` (or the built-in table) with `default_model`
    /// active when it is registered.
    pub fn catalog(&self) -> ModelCatalog {
        let models = self.models.clone().unwrap_or_else(default_models);
        let catalog = ModelCatalog::new(models);
        catalog.activate_or_warn(&self.default_model);
        catalog
    }

    pub fn ollama_client(&self) -> OllamaClient {
        OllamaClient::with_timeouts(
            &self.model_endpoint,
            Duration::from_secs(self.connect_timeout_secs),
            Duration::from_secs(self.request_timeout_secs),
        )
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.bootstrap.attempts,
            backoff: Duration::from_millis(self.bootstrap.backoff_ms),
        }
    }
}
