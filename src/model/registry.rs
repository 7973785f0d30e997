//! Model registry
//!
//! Populated once at startup; bulk operations iterate it in registration
//! order when the caller does not pass an explicit model list.

use super::ModelDescriptor;
use std::collections::HashMap;

/// Registered model descriptors, keyed by qualified table name
#[derive(Debug, Default, Clone)]
pub struct ModelRegistry {
    models: Vec<ModelDescriptor>,
    name_to_idx: HashMap<String, usize>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model, replacing any earlier one for the same table
    pub fn register(&mut self, model: ModelDescriptor) -> &mut Self {
        let key = model.table_ref().to_string();
        match self.name_to_idx.get(&key) {
            Some(&idx) => {
                tracing::warn!("Model for {} registered twice, replacing", key);
                self.models[idx] = model;
            }
            None => {
                self.name_to_idx.insert(key, self.models.len());
                self.models.push(model);
            }
        }
        self
    }

    /// Builder method: register and return self
    pub fn with(mut self, model: ModelDescriptor) -> Self {
        self.register(model);
        self
    }

    /// Get a model by table name (`table` or `schema.table`)
    pub fn get(&self, name: &str) -> Option<&ModelDescriptor> {
        self.name_to_idx
            .get(name)
            .and_then(|&idx| self.models.get(idx))
    }

    /// All models in registration order
    pub fn iter(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.iter()
    }

    /// Models flagged as hypertables, in registration order
    pub fn hypertables(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.iter().filter(|m| m.hypertable)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
