use std::collections::HashMap;
use std::sync::Arc;

use super::step::{Step, StepId};
use crate::error::{BrokerError, Result};
use crate::steps;

/// Lookup from [`StepId`] to its implementation
#[derive(Clone, Default)]
pub struct StepRegistry {
    steps: HashMap<StepId, Arc<dyn Step>>,
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&StepId> = self.steps.keys().collect();
        ids.sort();
        f.debug_struct("StepRegistry").field("steps", &ids).finish()
    }
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in step
    pub fn standard() -> Self {
        let mut registry = Self::new();
        steps::register_all(&mut registry);
        registry
    }

    /// Register a step, replacing any earlier one with the same id
    pub fn register(&mut self, step: Arc<dyn Step>) -> &mut Self {
        self.steps.insert(step.id(), step);
        self
    }

    pub fn get(&self, id: StepId) -> Result<Arc<dyn Step>> {
        self.steps
            .get(&id)
            .cloned()
            .ok_or_else(|| BrokerError::invalid_state(format!("no step registered for {id}")))
    }

    pub fn contains(&self, id: StepId) -> bool {
        self.steps.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
