use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::AdapterResult;

/// Notification topic API
#[async_trait]
pub trait Notifications: Send + Sync {
    /// Returns the topic ARN; creating an existing name returns the same ARN
    async fn create_topic(&self, name: &str, tags: &BTreeMap<String, String>)
        -> AdapterResult<String>;

    async fn subscribe_email(&self, topic_arn: &str, email: &str) -> AdapterResult<()>;

    async fn delete_topic(&self, topic_arn: &str) -> AdapterResult<()>;
}
