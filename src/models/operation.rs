use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Row};
use std::fmt;

use super::InstanceKind;
use crate::error::{BrokerError, Result};
use crate::state_machine::OperationState;

/// Kind of pipeline an operation runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationAction {
    Provision,
    Deprovision,
    Update,
    Renew,
    PlanMigration,
}

impl OperationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provision => "Provision",
            Self::Deprovision => "Deprovision",
            Self::Update => "Update",
            Self::Renew => "Renew",
            Self::PlanMigration => "Plan Migration",
        }
    }

    /// Actions a deprovision request cancels when they are still running
    pub fn is_cancelable_by_deprovision(&self) -> bool {
        matches!(self, Self::Provision | Self::Update | Self::Renew)
    }
}

impl fmt::Display for OperationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Provision" => Ok(Self::Provision),
            "Deprovision" => Ok(Self::Deprovision),
            "Update" => Ok(Self::Update),
            "Renew" => Ok(Self::Renew),
            "Plan Migration" => Ok(Self::PlanMigration),
            _ => Err(format!("Invalid operation action: {s}")),
        }
    }
}

/// One pipeline run against a service instance
/// Maps to `operations` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: i64,
    pub service_instance_id: String,
    pub state: OperationState,
    pub action: OperationAction,
    /// Target kind of a plan migration
    pub migration_target: Option<InstanceKind>,
    /// Human-readable progress, updated before each step runs
    pub step_description: Option<String>,
    /// Last failure, for operators
    pub error_message: Option<String>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New Operation for creation (without generated fields)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOperation {
    pub service_instance_id: String,
    pub action: OperationAction,
    pub migration_target: Option<InstanceKind>,
}

impl NewOperation {
    pub fn new(service_instance_id: impl Into<String>, action: OperationAction) -> Self {
        Self {
            service_instance_id: service_instance_id.into(),
            action,
            migration_target: None,
        }
    }

    pub fn with_migration_target(mut self, target: InstanceKind) -> Self {
        self.migration_target = Some(target);
        self
    }
}

impl Operation {
    pub fn from_new(id: i64, new_operation: NewOperation) -> Self {
        let now = Utc::now();
        Self {
            id,
            service_instance_id: new_operation.service_instance_id,
            state: OperationState::InProgress,
            action: new_operation.action,
            migration_target: new_operation.migration_target,
            step_description: None,
            error_message: None,
            canceled_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled_at.is_some()
    }

    /// Create a new operation in the `in progress` state
    pub async fn create(pool: &PgPool, new_operation: NewOperation) -> Result<Operation> {
        let operation = sqlx::query_as::<_, Operation>(
            r#"
            INSERT INTO operations
                (service_instance_id, state, action, migration_target, created_at, updated_at)
            VALUES ($1, $2, $3, $4, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(&new_operation.service_instance_id)
        .bind(OperationState::InProgress.as_str())
        .bind(new_operation.action.as_str())
        .bind(new_operation.migration_target.map(|kind| kind.as_str()))
        .fetch_one(pool)
        .await?;

        Ok(operation)
    }

    /// Find an operation by ID
    pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<Operation>> {
        let operation = sqlx::query_as::<_, Operation>("SELECT * FROM operations WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;

        Ok(operation)
    }

    /// Operations of an instance, newest first
    pub async fn list_for_instance(
        pool: &PgPool,
        service_instance_id: &str,
    ) -> Result<Vec<Operation>> {
        let operations = sqlx::query_as::<_, Operation>(
            r#"
            SELECT * FROM operations
            WHERE service_instance_id = $1
            ORDER BY id DESC
            "#,
        )
        .bind(service_instance_id)
        .fetch_all(pool)
        .await?;

        Ok(operations)
    }

    /// Persist state, progress and cancellation; a cancellation is never undone
    pub async fn update(pool: &PgPool, operation: &Operation) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE operations
            SET state = $2,
                step_description = $3,
                error_message = $4,
                canceled_at = COALESCE(canceled_at, $5),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(operation.id)
        .bind(operation.state.as_str())
        .bind(&operation.step_description)
        .bind(&operation.error_message)
        .bind(operation.canceled_at)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BrokerError::not_found("operation", operation.id));
        }
        Ok(())
    }
}

impl<'r> FromRow<'r, PgRow> for Operation {
    fn from_row(row: &'r PgRow) -> std::result::Result<Self, sqlx::Error> {
        let state: String = row.try_get("state")?;
        let action: String = row.try_get("action")?;
        let migration_target: Option<String> = row.try_get("migration_target")?;

        Ok(Self {
            id: row.try_get("id")?,
            service_instance_id: row.try_get("service_instance_id")?,
            state: state.parse().map_err(|e: String| sqlx::Error::Decode(e.into()))?,
            action: action.parse().map_err(|e: String| sqlx::Error::Decode(e.into()))?,
            migration_target: migration_target
                .map(|kind| kind.parse::<InstanceKind>())
                .transpose()
                .map_err(|e| sqlx::Error::Decode(e.into()))?,
            step_description: row.try_get("step_description")?,
            error_message: row.try_get("error_message")?,
            canceled_at: row.try_get("canceled_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_string_conversion() {
        for action in [
            OperationAction::Provision,
            OperationAction::Deprovision,
            OperationAction::Update,
            OperationAction::Renew,
            OperationAction::PlanMigration,
        ] {
            assert_eq!(action.as_str().parse::<OperationAction>().unwrap(), action);
        }
    }

    #[test]
    fn test_new_operation_starts_in_progress() {
        let op = Operation::from_new(9, NewOperation::new("4321", OperationAction::Provision));
        assert_eq!(op.state, OperationState::InProgress);
        assert!(!op.is_canceled());
        assert!(op.step_description.is_none());
    }

    #[test]
    fn test_deprovision_cancels_only_issuing_actions() {
        assert!(OperationAction::Provision.is_cancelable_by_deprovision());
        assert!(OperationAction::Renew.is_cancelable_by_deprovision());
        assert!(!OperationAction::Deprovision.is_cancelable_by_deprovision());
        assert!(!OperationAction::PlanMigration.is_cancelable_by_deprovision());
    }
}
