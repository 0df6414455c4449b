use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::AdapterResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOperator {
    LessThanThreshold,
    GreaterThanOrEqualToThreshold,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricAlarm {
    pub name: String,
    pub namespace: String,
    pub metric_name: String,
    pub dimensions: BTreeMap<String, String>,
    pub statistic: String,
    pub comparison: ComparisonOperator,
    pub threshold: f64,
    pub period_seconds: u32,
    pub evaluation_periods: u32,
    /// Topics notified when the alarm fires
    pub alarm_actions: Vec<String>,
    pub tags: BTreeMap<String, String>,
}

impl MetricAlarm {
    /// Fires when a DNS health check reports the endpoint unhealthy
    pub fn health_check(name: String, health_check_id: &str, topic_arn: Option<&str>) -> Self {
        Self {
            name,
            namespace: "AWS/Route53".to_string(),
            metric_name: "HealthCheckStatus".to_string(),
            dimensions: BTreeMap::from([(
                "HealthCheckId".to_string(),
                health_check_id.to_string(),
            )]),
            statistic: "Minimum".to_string(),
            comparison: ComparisonOperator::LessThanThreshold,
            threshold: 1.0,
            period_seconds: 60,
            evaluation_periods: 1,
            alarm_actions: topic_arn.map(str::to_string).into_iter().collect(),
            tags: BTreeMap::new(),
        }
    }

    /// Fires when DDoS protection detects an attack on a resource
    pub fn ddos_detected(name: String, resource_arn: &str, topic_arn: Option<&str>) -> Self {
        Self {
            name,
            namespace: "AWS/DDoSProtection".to_string(),
            metric_name: "DDoSDetected".to_string(),
            dimensions: BTreeMap::from([("ResourceArn".to_string(), resource_arn.to_string())]),
            statistic: "Sum".to_string(),
            comparison: ComparisonOperator::GreaterThanOrEqualToThreshold,
            threshold: 1.0,
            period_seconds: 60,
            evaluation_periods: 1,
            alarm_actions: topic_arn.map(str::to_string).into_iter().collect(),
            tags: BTreeMap::new(),
        }
    }

    pub fn with_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.tags = tags;
        self
    }
}

/// Metric alarm API
#[async_trait]
pub trait Alarms: Send + Sync {
    async fn put_metric_alarm(&self, alarm: &MetricAlarm) -> AdapterResult<()>;

    async fn alarm_exists(&self, name: &str) -> AdapterResult<bool>;

    /// Missing names are ignored by the provider
    async fn delete_alarms(&self, names: &[String]) -> AdapterResult<()>;
}
