use serde::{Deserialize, Serialize};
use std::fmt;

/// Operation lifecycle states
///
/// Cancellation is not a state: it is the orthogonal `canceled_at` flag on
/// an operation that is still `InProgress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    /// Initial state; the pipeline is running or waiting in the queue
    InProgress,
    /// The pipeline's final step committed
    Succeeded,
    /// A step failed permanently or exhausted its retry budget
    Failed,
}

impl OperationState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in progress" | "in_progress" => Ok(Self::InProgress),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid operation state: {s}")),
        }
    }
}

impl Default for OperationState {
    fn default() -> Self {
        Self::InProgress
    }
}

/// Certificate rotation state of a service instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationState {
    /// No certificate yet (before the first issuance completes)
    Unissued,
    /// `current_certificate` set, `new_certificate` empty
    Stable,
    /// `new_certificate` set and not yet attached to the front-end
    Rotating,
}

impl RotationState {
    pub fn from_linkage(current: Option<i64>, new: Option<i64>) -> Self {
        match (current, new) {
            (_, Some(_)) => Self::Rotating,
            (Some(_), None) => Self::Stable,
            (None, None) => Self::Unissued,
        }
    }
}

impl fmt::Display for RotationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unissued => write!(f, "unissued"),
            Self::Stable => write!(f, "stable"),
            Self::Rotating => write!(f, "rotating"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_state_terminal_check() {
        assert!(OperationState::Succeeded.is_terminal());
        assert!(OperationState::Failed.is_terminal());
        assert!(!OperationState::InProgress.is_terminal());
    }

    #[test]
    fn test_state_string_conversion() {
        assert_eq!(OperationState::InProgress.to_string(), "in progress");
        assert_eq!(
            "succeeded".parse::<OperationState>().unwrap(),
            OperationState::Succeeded
        );
        assert!("complete".parse::<OperationState>().is_err());
    }

    #[test]
    fn test_state_serde() {
        let json = serde_json::to_string(&OperationState::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        let parsed: OperationState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, OperationState::InProgress);
    }

    #[test]
    fn test_rotation_state_from_linkage() {
        assert_eq!(RotationState::from_linkage(None, None), RotationState::Unissued);
        assert_eq!(RotationState::from_linkage(None, Some(1)), RotationState::Rotating);
        assert_eq!(RotationState::from_linkage(Some(1), Some(2)), RotationState::Rotating);
        assert_eq!(RotationState::from_linkage(Some(1), None), RotationState::Stable);
    }
}
