//! The table of selectable models and the process-wide active model.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::RwLock;

use super::error::QueryError;
use crate::sync::{read, write};

/// Model used when nothing else is configured.
pub const DEFAULT_MODEL_ID: &str = "llama3.2:70b";

/// Static metadata about a selectable model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescriptor {
    pub id: String,
    pub display_name: String,
    /// Parameter count class, e.g. "70B".
    pub size_class: String,
    #[serde(default)]
    pub capability_tags: BTreeSet<String>,
    pub max_context_tokens: u32,
}

impl ModelDescriptor {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        size_class: impl Into<String>,
        capability_tags: &[&str],
        max_context_tokens: u32,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            size_class: size_class.into(),
            capability_tags: capability_tags.iter().map(|t| t.to_string()).collect(),
            max_context_tokens,
        }
    }

    pub fn has_capability(&self, tag: &str) -> bool {
        self.capability_tags.contains(tag)
    }
}

/// The built-in model table.
pub fn default_models() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor::new(
            "llama3.2:70b",
            "Llama 3.2 70B",
            "70B",
            &["general", "coding", "analysis"],
            128_000,
        ),
        ModelDescriptor::new(
            "codellama:34b",
            "Code Llama 34B",
            "34B",
            &["coding", "debugging", "refactoring"],
            100_000,
        ),
        ModelDescriptor::new(
            "mixtral:8x7b",
            "Mixtral 8x7B",
            "47B",
            &["general", "reasoning", "multi-task"],
            32_000,
        ),
        ModelDescriptor::new("phi-3:mini", "Phi-3 Mini", "3.8B", &["fast", "basic"], 4096),
    ]
}

/// Read-mostly table of models plus the single active model id.
///
/// The model list never changes after construction. The active id is swapped
/// under a lock that is never held across a network call, so switching
/// models does not affect queries already dispatched.
#[derive(Debug)]
pub struct ModelCatalog {
    models: Vec<ModelDescriptor>,
    active: RwLock<Option<String>>,
}

impl ModelCatalog {
    /// Build a catalog from `models`, keeping the first of any duplicate ids.
    /// No model is active yet.
    pub fn new(models: Vec<ModelDescriptor>) -> Self {
        let mut unique: Vec<ModelDescriptor> = Vec::with_capacity(models.len());
        for model in models {
            if unique.iter().any(|m| m.id == model.id) {
                log::warn!("Ignoring duplicate model id {}", model.id);
                continue;
            }
            unique.push(model);
        }
        Self {
            models: unique,
            active: RwLock::new(None),
        }
    }

    /// The built-in table with [`DEFAULT_MODEL_ID`] active.
    pub fn with_defaults() -> Self {
        let catalog = Self::new(default_models());
        catalog.activate_or_warn(DEFAULT_MODEL_ID);
        catalog
    }

    /// Make `id` active if it is registered; otherwise log and leave the
    /// catalog without an active model.
    pub fn activate_or_warn(&self, id: &str) {
        if let Err(e) = self.set_active(id) {
            log::warn!("Default model not activated: {}", e);
        }
    }

    /// All models in insertion order.
    pub fn list(&self) -> &[ModelDescriptor] {
        &self.models
    }

    pub fn get(&self, id: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Models carrying `tag`, in catalog order.
    pub fn find_by_capability(&self, tag: &str) -> Vec<&ModelDescriptor> {
        self.models.iter().filter(|m| m.has_capability(tag)).collect()
    }

    /// Switch the active model. Fails without changing anything if `id` is
    /// not registered. Does not check that the runtime can serve it.
    pub fn set_active(&self, id: &str) -> Result<(), QueryError> {
        if !self.contains(id) {
            return Err(QueryError::UnknownModel(id.to_string()));
        }
        *write(&self.active) = Some(id.to_string());
        Ok(())
    }

    pub fn active_id(&self) -> Option<String> {
        read(&self.active).clone()
    }

    pub fn get_active(&self) -> Option<ModelDescriptor> {
        let id = self.active_id()?;
        self.get(&id).cloned()
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::with_defaults()
    }
}
