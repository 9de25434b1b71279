//! AppContext - the shared state a host holds.
//!
//! ```text
//!                 ┌──────────────────────────┐
//!                 │        AppContext        │
//!                 ├──────────────────────────┤
//!                 │  - EventBus              │
//!                 │  - SessionRegistry ──────┼──► EventBus
//!                 │  - ModelCatalog          │
//!                 │  - QueryRouter ──────────┼──► ModelCatalog, ModelRuntime
//!                 └────────────┬─────────────┘
//!                              │
//!               ┌──────────────┴──────────────┐
//!               ▼                             ▼
//!        ┌─────────────┐               ┌─────────────┐
//!        │  aiterm CLI │               │   UI / IPC  │
//!        └─────────────┘               └─────────────┘
//! ```
//!
//! Cloning the context clones the pointers, not the state.

use std::sync::Arc;

use crate::assistant::{ContextSnapshot, ModelCatalog, QueryRouter};
use crate::config::{AppConfig, ConfigError};
use crate::event_bus::EventBus;
use crate::runtime::{
    ensure_model_available, GenerationOptions, ModelAvailability, ModelRuntime, OllamaClient,
    RetryPolicy, DEFAULT_ENDPOINT,
};
use crate::session::{RegistrySettings, SessionId, SessionRegistry};

/// Assembles an [`AppContext`], filling unset parts with defaults.
#[derive(Default)]
pub struct AppContextBuilder {
    event_bus: Option<Arc<EventBus>>,
    registry_settings: Option<RegistrySettings>,
    catalog: Option<Arc<ModelCatalog>>,
    runtime: Option<Arc<dyn ModelRuntime>>,
    generation: Option<GenerationOptions>,
    retry_policy: Option<RetryPolicy>,
    bootstrap_enabled: Option<bool>,
}

impl AppContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an existing EventBus.
    pub fn event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn registry_settings(mut self, settings: RegistrySettings) -> Self {
        self.registry_settings = Some(settings);
        self
    }

    pub fn catalog(mut self, catalog: Arc<ModelCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Use a specific model runtime (a fake one in tests).
    pub fn runtime(mut self, runtime: Arc<dyn ModelRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn generation(mut self, options: GenerationOptions) -> Self {
        self.generation = Some(options);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn bootstrap_enabled(mut self, enabled: bool) -> Self {
        self.bootstrap_enabled = Some(enabled);
        self
    }

    pub fn build(self) -> AppContext {
        let event_bus = self.event_bus.unwrap_or_else(|| Arc::new(EventBus::new()));
        let registry = Arc::new(SessionRegistry::with_settings(
            Arc::clone(&event_bus),
            self.registry_settings.unwrap_or_default(),
        ));
        let catalog = self
            .catalog
            .unwrap_or_else(|| Arc::new(ModelCatalog::with_defaults()));
        let runtime: Arc<dyn ModelRuntime> = match self.runtime {
            Some(runtime) => runtime,
            None => Arc::new(OllamaClient::new(DEFAULT_ENDPOINT)),
        };
        let router = Arc::new(
            QueryRouter::new(Arc::clone(&catalog), runtime)
                .with_options(self.generation.unwrap_or_default()),
        );

        AppContext {
            event_bus,
            registry,
            catalog,
            router,
            retry_policy: self.retry_policy.unwrap_or_default(),
            bootstrap_enabled: self.bootstrap_enabled.unwrap_or(true),
        }
    }
}

/// Event bus, session registry, model catalog and query router, wired
/// together.
#[derive(Clone)]
pub struct AppContext {
    pub event_bus: Arc<EventBus>,
    pub registry: Arc<SessionRegistry>,
    pub catalog: Arc<ModelCatalog>,
    pub router: Arc<QueryRouter>,
    retry_policy: RetryPolicy,
    bootstrap_enabled: bool,
}

impl AppContext {
    pub fn builder() -> AppContextBuilder {
        AppContextBuilder::new()
    }

    /// Build everything from `config`, talking to the configured Ollama
    /// endpoint.
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        Ok(Self::builder()
            .registry_settings(config.registry_settings()?)
            .catalog(Arc::new(config.catalog()))
            .runtime(Arc::new(config.ollama_client()))
            .generation(config.generation)
            .retry_policy(config.retry_policy())
            .bootstrap_enabled(config.bootstrap.enabled)
            .build())
    }

    /// Make sure the active model is installed in the runtime.
    ///
    /// Returns `None` when bootstrap is disabled or no model is active.
    /// Failures are logged and reported, never fatal.
    pub fn bootstrap(&self) -> Option<ModelAvailability> {
        if !self.bootstrap_enabled {
            log::debug!("Model bootstrap disabled");
            return None;
        }
        let Some(model) = self.catalog.active_id() else {
            log::warn!("No active model; skipping bootstrap");
            return None;
        };
        let availability =
            ensure_model_available(self.router.runtime().as_ref(), &model, self.retry_policy);
        if let ModelAvailability::Unreachable(ref reason) = availability {
            log::warn!("Model runtime unavailable, queries will fail until it is up: {}", reason);
        }
        Some(availability)
    }

    /// Context for a query about `session`, or `None` if it is unknown.
    pub fn snapshot_for(&self, session: &SessionId) -> Option<ContextSnapshot> {
        self.registry.context_snapshot(session)
    }

    /// Destroy every session.
    pub fn shutdown(&self) {
        self.registry.shutdown();
    }
}

impl Default for AppContext {
    fn default() -> Self {
        Self::builder().build()
    }
}
