use serde::{Deserialize, Serialize};

use super::step::StepId;
use crate::models::{InstanceKind, OperationAction};

/// The fixed, ordered chain of steps one operation runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    pub action: OperationAction,
    pub kind: InstanceKind,
    pub steps: Vec<StepId>,
}

impl Pipeline {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn contains(&self, step: StepId) -> bool {
        self.steps.contains(&step)
    }

    /// Position of the first occurrence of `step`
    pub fn position(&self, step: StepId) -> Option<usize> {
        self.steps.iter().position(|s| *s == step)
    }
}

#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    action: OperationAction,
    kind: InstanceKind,
    steps: Vec<StepId>,
}

impl PipelineBuilder {
    pub fn new(action: OperationAction, kind: InstanceKind) -> Self {
        Self {
            action,
            kind,
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: StepId) -> Self {
        self.steps.push(step);
        self
    }

    pub fn steps(mut self, steps: impl IntoIterator<Item = StepId>) -> Self {
        self.steps.extend(steps);
        self
    }

    /// Append steps only when `condition` holds
    pub fn steps_if(self, condition: bool, steps: impl IntoIterator<Item = StepId>) -> Self {
        if condition {
            self.steps(steps)
        } else {
            self
        }
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            action: self.action,
            kind: self.kind,
            steps: self.steps,
        }
    }
}
