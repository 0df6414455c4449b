use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::error::Result;

/// ACME account registered for a service instance
/// Maps to `acme_users` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct AcmeUser {
    pub id: i64,
    pub email: String,
    pub uri: String,
    /// Encrypted with the broker's at-rest key
    #[serde(skip_serializing)]
    pub private_key_pem: String,
    pub registration_json: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New AcmeUser for creation (without generated fields)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAcmeUser {
    pub email: String,
    pub uri: String,
    pub private_key_pem: String,
    pub registration_json: String,
}

impl AcmeUser {
    pub fn from_new(id: i64, new_user: NewAcmeUser) -> Self {
        let now = Utc::now();
        Self {
            id,
            email: new_user.email,
            uri: new_user.uri,
            private_key_pem: new_user.private_key_pem,
            registration_json: new_user.registration_json,
            created_at: now,
            updated_at: now,
        }
    }

    pub async fn create(pool: &PgPool, new_user: NewAcmeUser) -> Result<AcmeUser> {
        let user = sqlx::query_as::<_, AcmeUser>(
            r#"
            INSERT INTO acme_users (email, uri, private_key_pem, registration_json, created_at, updated_at)
            VALUES ($1, $2, $3, $4, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(&new_user.email)
        .bind(&new_user.uri)
        .bind(&new_user.private_key_pem)
        .bind(&new_user.registration_json)
        .fetch_one(pool)
        .await?;

        Ok(user)
    }

    pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<AcmeUser>> {
        let user = sqlx::query_as::<_, AcmeUser>("SELECT * FROM acme_users WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;

        Ok(user)
    }
}
