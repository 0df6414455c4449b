use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::error::{BrokerError, Result};

/// Load balancer in the dedicated capacity pool
/// Maps to `dedicated_albs` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct DedicatedAlb {
    pub id: i64,
    pub alb_arn: String,
    /// Once set, never reassigned
    pub dedicated_org: Option<String>,
    pub dedicated_waf_web_acl_id: Option<String>,
    pub dedicated_waf_web_acl_arn: Option<String>,
    pub dedicated_waf_web_acl_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// HTTPS listener of a dedicated load balancer
/// Maps to `dedicated_alb_listeners` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct DedicatedAlbListener {
    pub id: i64,
    pub listener_arn: String,
    pub alb_arn: String,
    /// Once set, never reassigned
    pub dedicated_org: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DedicatedAlb {
    pub fn new(id: i64, alb_arn: impl Into<String>, dedicated_org: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            alb_arn: alb_arn.into(),
            dedicated_org,
            dedicated_waf_web_acl_id: None,
            dedicated_waf_web_acl_arn: None,
            dedicated_waf_web_acl_name: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_web_acl(&self) -> bool {
        self.dedicated_waf_web_acl_arn.is_some()
    }

    /// Insert unless the load balancer is already known; an unowned one is
    /// bound to `dedicated_org`
    pub async fn create_if_missing(
        pool: &PgPool,
        alb_arn: &str,
        dedicated_org: Option<&str>,
    ) -> Result<DedicatedAlb> {
        sqlx::query(
            r#"
            INSERT INTO dedicated_albs (alb_arn, dedicated_org, created_at, updated_at)
            VALUES ($1, $2, NOW(), NOW())
            ON CONFLICT (alb_arn) DO UPDATE
            SET dedicated_org = COALESCE(dedicated_albs.dedicated_org, EXCLUDED.dedicated_org),
                updated_at = NOW()
            "#,
        )
        .bind(alb_arn)
        .bind(dedicated_org)
        .execute(pool)
        .await?;

        Self::find_by_arn(pool, alb_arn)
            .await?
            .ok_or_else(|| BrokerError::not_found("dedicated alb", alb_arn))
    }

    pub async fn find_by_arn(pool: &PgPool, alb_arn: &str) -> Result<Option<DedicatedAlb>> {
        let alb = sqlx::query_as::<_, DedicatedAlb>("SELECT * FROM dedicated_albs WHERE alb_arn = $1")
            .bind(alb_arn)
            .fetch_optional(pool)
            .await?;

        Ok(alb)
    }

    pub async fn list_all(pool: &PgPool) -> Result<Vec<DedicatedAlb>> {
        let albs = sqlx::query_as::<_, DedicatedAlb>("SELECT * FROM dedicated_albs ORDER BY id")
            .fetch_all(pool)
            .await?;

        Ok(albs)
    }

    /// Persist web ACL state; the org is only written when still unset
    pub async fn update(pool: &PgPool, alb: &DedicatedAlb) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE dedicated_albs
            SET dedicated_org = COALESCE(dedicated_org, $2),
                dedicated_waf_web_acl_id = $3,
                dedicated_waf_web_acl_arn = $4,
                dedicated_waf_web_acl_name = $5,
                updated_at = NOW()
            WHERE alb_arn = $1
            "#,
        )
        .bind(&alb.alb_arn)
        .bind(&alb.dedicated_org)
        .bind(&alb.dedicated_waf_web_acl_id)
        .bind(&alb.dedicated_waf_web_acl_arn)
        .bind(&alb.dedicated_waf_web_acl_name)
        .execute(pool)
        .await?;

        Ok(())
    }
}

impl DedicatedAlbListener {
    pub fn new(
        id: i64,
        listener_arn: impl Into<String>,
        alb_arn: impl Into<String>,
        dedicated_org: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            listener_arn: listener_arn.into(),
            alb_arn: alb_arn.into(),
            dedicated_org,
            created_at: now,
            updated_at: now,
        }
    }

    /// Insert unless the listener is already known; returns whether a row was added
    pub async fn create_if_missing(
        pool: &PgPool,
        listener_arn: &str,
        alb_arn: &str,
        dedicated_org: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO dedicated_alb_listeners (listener_arn, alb_arn, dedicated_org, created_at, updated_at)
            VALUES ($1, $2, $3, NOW(), NOW())
            ON CONFLICT (listener_arn) DO NOTHING
            "#,
        )
        .bind(listener_arn)
        .bind(alb_arn)
        .bind(dedicated_org)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn list_all(pool: &PgPool) -> Result<Vec<DedicatedAlbListener>> {
        let listeners = sqlx::query_as::<_, DedicatedAlbListener>(
            "SELECT * FROM dedicated_alb_listeners ORDER BY id",
        )
        .fetch_all(pool)
        .await?;

        Ok(listeners)
    }

    /// Bind an unbound listener to an org; returns false if another org got it first
    pub async fn assign_org(pool: &PgPool, listener_arn: &str, org: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE dedicated_alb_listeners
            SET dedicated_org = $2, updated_at = NOW()
            WHERE listener_arn = $1 AND (dedicated_org IS NULL OR dedicated_org = $2)
            "#,
        )
        .bind(listener_arn)
        .bind(org)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
