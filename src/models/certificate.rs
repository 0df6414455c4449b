use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::error::{BrokerError, Result};

/// Certificate issued (or being issued) for one service instance
/// Maps to `certificates` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Certificate {
    pub id: i64,
    pub service_instance_id: String,
    pub subject_alternative_names: Vec<String>,
    /// Encrypted with the broker's at-rest key
    #[serde(skip_serializing)]
    pub private_key_pem: Option<String>,
    pub csr_pem: Option<String>,
    pub leaf_pem: Option<String>,
    pub fullchain_pem: Option<String>,
    /// Opaque CA order state
    pub order_json: Option<String>,
    pub iam_server_certificate_id: Option<String>,
    pub iam_server_certificate_name: Option<String>,
    pub iam_server_certificate_arn: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New Certificate for creation (without generated fields)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCertificate {
    pub service_instance_id: String,
    pub subject_alternative_names: Vec<String>,
    pub private_key_pem: String,
    pub csr_pem: String,
}

impl Certificate {
    pub fn from_new(id: i64, new_certificate: NewCertificate) -> Self {
        let now = Utc::now();
        Self {
            id,
            service_instance_id: new_certificate.service_instance_id,
            subject_alternative_names: new_certificate.subject_alternative_names,
            private_key_pem: Some(new_certificate.private_key_pem),
            csr_pem: Some(new_certificate.csr_pem),
            leaf_pem: None,
            fullchain_pem: None,
            order_json: None,
            iam_server_certificate_id: None,
            iam_server_certificate_name: None,
            iam_server_certificate_arn: None,
            expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Leaf and chain have been retrieved from the CA
    pub fn is_complete(&self) -> bool {
        self.leaf_pem.is_some() && self.fullchain_pem.is_some() && self.expires_at.is_some()
    }

    /// The certificate store holds this certificate
    pub fn is_uploaded(&self) -> bool {
        self.iam_server_certificate_arn.is_some()
    }

    /// Chain part of the full chain (everything after the leaf)
    pub fn chain_pem(&self) -> Option<String> {
        self.fullchain_pem
            .as_deref()
            .map(|fullchain| crate::crypto::split_fullchain(fullchain).1)
    }

    /// Create a new certificate
    pub async fn create(pool: &PgPool, new_certificate: NewCertificate) -> Result<Certificate> {
        let certificate = sqlx::query_as::<_, Certificate>(
            r#"
            INSERT INTO certificates
                (service_instance_id, subject_alternative_names, private_key_pem, csr_pem,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(&new_certificate.service_instance_id)
        .bind(&new_certificate.subject_alternative_names)
        .bind(&new_certificate.private_key_pem)
        .bind(&new_certificate.csr_pem)
        .fetch_one(pool)
        .await?;

        Ok(certificate)
    }

    /// Find a certificate by ID
    pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<Certificate>> {
        let certificate =
            sqlx::query_as::<_, Certificate>("SELECT * FROM certificates WHERE id = $1")
                .bind(id)
                .fetch_optional(pool)
                .await?;

        Ok(certificate)
    }

    /// All certificates of a service instance, oldest first
    pub async fn list_for_instance(
        pool: &PgPool,
        service_instance_id: &str,
    ) -> Result<Vec<Certificate>> {
        let certificates = sqlx::query_as::<_, Certificate>(
            r#"
            SELECT * FROM certificates
            WHERE service_instance_id = $1
            ORDER BY id
            "#,
        )
        .bind(service_instance_id)
        .fetch_all(pool)
        .await?;

        Ok(certificates)
    }

    /// Persist every mutable field
    pub async fn update(pool: &PgPool, certificate: &Certificate) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE certificates
            SET subject_alternative_names = $2,
                private_key_pem = $3,
                csr_pem = $4,
                leaf_pem = $5,
                fullchain_pem = $6,
                order_json = $7,
                iam_server_certificate_id = $8,
                iam_server_certificate_name = $9,
                iam_server_certificate_arn = $10,
                expires_at = $11,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(certificate.id)
        .bind(&certificate.subject_alternative_names)
        .bind(&certificate.private_key_pem)
        .bind(&certificate.csr_pem)
        .bind(&certificate.leaf_pem)
        .bind(&certificate.fullchain_pem)
        .bind(&certificate.order_json)
        .bind(&certificate.iam_server_certificate_id)
        .bind(&certificate.iam_server_certificate_name)
        .bind(&certificate.iam_server_certificate_arn)
        .bind(certificate.expires_at)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BrokerError::not_found("certificate", certificate.id));
        }
        Ok(())
    }

    /// Delete a certificate and its challenges
    pub async fn delete(pool: &PgPool, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM certificates WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
