use async_trait::async_trait;
use std::time::Duration;

use crate::error::AdapterResult;

/// A registered CA account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcmeAccount {
    pub uri: String,
    pub registration_json: String,
}

/// Account credentials a request is signed with
#[derive(Debug, Clone)]
pub struct AcmeCredentials {
    pub uri: String,
    pub private_key_pem: String,
}

/// DNS-01 challenge handed out for one domain of an order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dns01Challenge {
    /// Opaque challenge body, passed back when answering
    pub body_json: String,
    /// `_acme-challenge.<domain>`
    pub validation_domain: String,
    pub validation_contents: String,
}

/// ACME certificate authority client
///
/// Fails with [`crate::error::AdapterError::Transient`] on network trouble
/// and [`crate::error::AdapterError::Rejected`] when the CA refuses an order.
#[async_trait]
pub trait AcmeClient: Send + Sync {
    async fn register_account(&self, email: &str, account_key_pem: &str)
        -> AdapterResult<AcmeAccount>;

    /// Returns the opaque order state
    async fn submit_order(
        &self,
        account: &AcmeCredentials,
        csr_pem: &str,
        domains: &[String],
    ) -> AdapterResult<String>;

    async fn dns01_challenge(
        &self,
        account: &AcmeCredentials,
        order_json: &str,
        domain: &str,
    ) -> AdapterResult<Dns01Challenge>;

    async fn notify_challenge_ready(
        &self,
        account: &AcmeCredentials,
        challenge_body_json: &str,
    ) -> AdapterResult<()>;

    /// Finalize the order and poll until the full chain PEM is available
    async fn finalize_and_poll(
        &self,
        account: &AcmeCredentials,
        order_json: &str,
        csr_pem: &str,
        deadline: Duration,
    ) -> AdapterResult<String>;
}
