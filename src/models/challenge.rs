use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::error::{BrokerError, Result};

/// DNS-01 challenge for one domain of a certificate
/// Maps to `challenges` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Challenge {
    pub id: i64,
    pub certificate_id: i64,
    pub domain: String,
    /// `_acme-challenge.<domain>`
    pub validation_domain: String,
    pub validation_contents: String,
    /// Opaque CA challenge body
    pub body_json: String,
    pub answered: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New Challenge for creation (without generated fields)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewChallenge {
    pub certificate_id: i64,
    pub domain: String,
    pub validation_domain: String,
    pub validation_contents: String,
    pub body_json: String,
}

impl Challenge {
    pub fn from_new(id: i64, new_challenge: NewChallenge) -> Self {
        let now = Utc::now();
        Self {
            id,
            certificate_id: new_challenge.certificate_id,
            domain: new_challenge.domain,
            validation_domain: new_challenge.validation_domain,
            validation_contents: new_challenge.validation_contents,
            body_json: new_challenge.body_json,
            answered: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a new challenge
    pub async fn create(pool: &PgPool, new_challenge: NewChallenge) -> Result<Challenge> {
        let challenge = sqlx::query_as::<_, Challenge>(
            r#"
            INSERT INTO challenges
                (certificate_id, domain, validation_domain, validation_contents, body_json,
                 answered, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, false, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(new_challenge.certificate_id)
        .bind(&new_challenge.domain)
        .bind(&new_challenge.validation_domain)
        .bind(&new_challenge.validation_contents)
        .bind(&new_challenge.body_json)
        .fetch_one(pool)
        .await?;

        Ok(challenge)
    }

    /// Challenges of a certificate in creation order
    pub async fn list_for_certificate(pool: &PgPool, certificate_id: i64) -> Result<Vec<Challenge>> {
        let challenges = sqlx::query_as::<_, Challenge>(
            r#"
            SELECT * FROM challenges
            WHERE certificate_id = $1
            ORDER BY id
            "#,
        )
        .bind(certificate_id)
        .fetch_all(pool)
        .await?;

        Ok(challenges)
    }

    /// Mark a challenge answered
    pub async fn mark_answered(pool: &PgPool, id: i64) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE challenges SET answered = true, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BrokerError::not_found("challenge", id));
        }
        Ok(())
    }
}
