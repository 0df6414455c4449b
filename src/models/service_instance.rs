use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Row};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{BrokerError, Result};

/// Front-end/plan combination of a service instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceKind {
    /// Shared application load balancer
    Alb,
    /// Load balancer listener dedicated to one organization
    DedicatedAlb,
    /// CDN distribution
    Cdn,
    /// CDN distribution with its own web ACL, health checks and alarms
    CdnDedicatedWaf,
    /// Placeholder for an instance adopted from a legacy broker
    Migration,
}

impl InstanceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alb => "alb_service_instance",
            Self::DedicatedAlb => "dedicated_alb_service_instance",
            Self::Cdn => "cdn_service_instance",
            Self::CdnDedicatedWaf => "cdn_dedicated_waf_service_instance",
            Self::Migration => "migration_service_instance",
        }
    }

    pub fn is_alb(&self) -> bool {
        matches!(self, Self::Alb | Self::DedicatedAlb)
    }

    pub fn is_cdn(&self) -> bool {
        matches!(self, Self::Cdn | Self::CdnDedicatedWaf)
    }

    pub const ALL: [InstanceKind; 5] = [
        Self::Alb,
        Self::DedicatedAlb,
        Self::Cdn,
        Self::CdnDedicatedWaf,
        Self::Migration,
    ];
}

impl fmt::Display for InstanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for InstanceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("Invalid instance type: {s}"))
    }
}

/// Load balancer linkage (ALB variants)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbSettings {
    pub alb_arn: Option<String>,
    pub alb_listener_arn: Option<String>,
    /// Listener the instance is moving away from, until its certificate is removed
    pub previous_alb_arn: Option<String>,
    pub previous_alb_listener_arn: Option<String>,
}

/// Which cookies the CDN forwards to the origin
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CookiePolicy {
    #[default]
    All,
    None,
    Whitelist,
}

/// Distribution linkage and origin policy (CDN variants)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CdnSettings {
    pub distribution_id: Option<String>,
    pub distribution_arn: Option<String>,
    pub origin_hostname: Option<String>,
    pub origin_path: String,
    pub origin_protocol_policy: String,
    pub forward_cookie_policy: CookiePolicy,
    pub forwarded_cookies: Vec<String>,
    pub forwarded_headers: Vec<String>,
    /// HTTP error code → custom error page path
    pub error_responses: BTreeMap<String, String>,
}

/// A DNS health check created for one of the instance's domains
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckRecord {
    pub domain_name: String,
    pub health_check_id: String,
}

/// The health check registered with DDoS protection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShieldAssociation {
    pub domain_name: String,
    pub health_check_id: String,
    pub protection_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckAlarm {
    pub health_check_id: String,
    pub alarm_name: String,
}

/// Web ACL, health checks, protection and alarms (dedicated WAF variant)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedicatedWafSettings {
    pub web_acl_id: Option<String>,
    pub web_acl_arn: Option<String>,
    pub web_acl_name: Option<String>,
    pub health_checks: Vec<HealthCheckRecord>,
    pub shield_association: Option<ShieldAssociation>,
    pub health_check_alarms: Vec<HealthCheckAlarm>,
    pub ddos_detected_alarm_name: Option<String>,
    pub sns_notification_topic_arn: Option<String>,
    pub alarm_notification_email: Option<String>,
}

/// ServiceInstance is one customer-facing custom domain configuration
/// Maps to `service_instances` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub id: String,
    pub kind: InstanceKind,
    /// Lowercase, deduplicated, in request order
    pub domain_names: Vec<String>,
    pub org_id: Option<String>,
    pub acme_user_id: Option<i64>,
    /// Certificate attached to the front-end
    pub current_certificate_id: Option<i64>,
    /// Certificate being issued, not yet attached
    pub new_certificate_id: Option<i64>,
    /// DNS changes awaiting propagation, oldest first
    pub route53_change_ids: Vec<String>,
    /// Hostname of the front-end that alias records point to
    pub domain_internal: Option<String>,
    pub route53_alias_hosted_zone: Option<String>,
    pub alb: AlbSettings,
    pub cdn: CdnSettings,
    pub dedicated_waf: DedicatedWafSettings,
    pub tags: BTreeMap<String, String>,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Normalize requested domain names: trim, lowercase, drop a trailing dot,
/// drop duplicates while keeping request order
pub fn normalize_domain_names<I, S>(domains: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut normalized: Vec<String> = Vec::new();
    for domain in domains {
        let domain = domain.as_ref().trim().trim_end_matches('.').to_lowercase();
        if !domain.is_empty() && !normalized.contains(&domain) {
            normalized.push(domain);
        }
    }
    normalized
}

impl ServiceInstance {
    pub fn new(id: impl Into<String>, kind: InstanceKind, domain_names: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            kind,
            domain_names: normalize_domain_names(domain_names),
            org_id: None,
            acme_user_id: None,
            current_certificate_id: None,
            new_certificate_id: None,
            route53_change_ids: Vec::new(),
            domain_internal: None,
            route53_alias_hosted_zone: None,
            alb: AlbSettings::default(),
            cdn: CdnSettings::default(),
            dedicated_waf: DedicatedWafSettings::default(),
            tags: BTreeMap::new(),
            deactivated_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_deactivated(&self) -> bool {
        self.deactivated_at.is_some()
    }

    /// Record a DNS change to wait for
    pub fn push_change_id(&mut self, change_id: impl Into<String>) {
        let change_id = change_id.into();
        if !self.route53_change_ids.contains(&change_id) {
            self.route53_change_ids.push(change_id);
        }
    }

    /// Forget a DNS change once the provider confirmed it
    pub fn remove_change_id(&mut self, change_id: &str) {
        self.route53_change_ids.retain(|id| id != change_id);
    }

    /// Insert a new service instance
    pub async fn create(pool: &PgPool, instance: &ServiceInstance) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO service_instances
                (id, instance_type, domain_names, org_id, acme_user_id,
                 current_certificate_id, new_certificate_id, route53_change_ids,
                 domain_internal, route53_alias_hosted_zone,
                 alb_arn, alb_listener_arn, previous_alb_arn, previous_alb_listener_arn,
                 cdn, dedicated_waf, tags, deactivated_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                    $15, $16, $17, $18, NOW(), NOW())
            "#,
        )
        .bind(&instance.id)
        .bind(instance.kind.as_str())
        .bind(&instance.domain_names)
        .bind(&instance.org_id)
        .bind(instance.acme_user_id)
        .bind(instance.current_certificate_id)
        .bind(instance.new_certificate_id)
        .bind(&instance.route53_change_ids)
        .bind(&instance.domain_internal)
        .bind(&instance.route53_alias_hosted_zone)
        .bind(&instance.alb.alb_arn)
        .bind(&instance.alb.alb_listener_arn)
        .bind(&instance.alb.previous_alb_arn)
        .bind(&instance.alb.previous_alb_listener_arn)
        .bind(Json(&instance.cdn))
        .bind(Json(&instance.dedicated_waf))
        .bind(Json(&instance.tags))
        .bind(instance.deactivated_at)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Find a service instance by ID
    pub async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<ServiceInstance>> {
        let instance = sqlx::query_as::<_, ServiceInstance>(
            r#"
            SELECT * FROM service_instances WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(instance)
    }

    /// Persist every mutable field
    pub async fn update(pool: &PgPool, instance: &ServiceInstance) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE service_instances
            SET instance_type = $2,
                domain_names = $3,
                org_id = $4,
                acme_user_id = $5,
                current_certificate_id = $6,
                new_certificate_id = $7,
                route53_change_ids = $8,
                domain_internal = $9,
                route53_alias_hosted_zone = $10,
                alb_arn = $11,
                alb_listener_arn = $12,
                previous_alb_arn = $13,
                previous_alb_listener_arn = $14,
                cdn = $15,
                dedicated_waf = $16,
                tags = $17,
                deactivated_at = $18,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(&instance.id)
        .bind(instance.kind.as_str())
        .bind(&instance.domain_names)
        .bind(&instance.org_id)
        .bind(instance.acme_user_id)
        .bind(instance.current_certificate_id)
        .bind(instance.new_certificate_id)
        .bind(&instance.route53_change_ids)
        .bind(&instance.domain_internal)
        .bind(&instance.route53_alias_hosted_zone)
        .bind(&instance.alb.alb_arn)
        .bind(&instance.alb.alb_listener_arn)
        .bind(&instance.alb.previous_alb_arn)
        .bind(&instance.alb.previous_alb_listener_arn)
        .bind(Json(&instance.cdn))
        .bind(Json(&instance.dedicated_waf))
        .bind(Json(&instance.tags))
        .bind(instance.deactivated_at)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BrokerError::not_found("service instance", &instance.id));
        }
        Ok(())
    }

    /// Instances that are still live
    pub async fn list_active(pool: &PgPool) -> Result<Vec<ServiceInstance>> {
        let instances = sqlx::query_as::<_, ServiceInstance>(
            r#"
            SELECT * FROM service_instances
            WHERE deactivated_at IS NULL
            ORDER BY created_at
            "#,
        )
        .fetch_all(pool)
        .await?;

        Ok(instances)
    }

    /// Number of live instances attached to a listener
    pub async fn count_on_listener(pool: &PgPool, listener_arn: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM service_instances
            WHERE alb_listener_arn = $1 AND deactivated_at IS NULL
            "#,
        )
        .bind(listener_arn)
        .fetch_one(pool)
        .await?;

        Ok(count)
    }

    /// Instances of a kind holding more than one certificate besides the
    /// current one
    pub async fn find_with_duplicate_certificates(
        pool: &PgPool,
        kind: InstanceKind,
    ) -> Result<Vec<(String, i64)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT si.id, COUNT(c.id) AS duplicates
            FROM service_instances si
            JOIN certificates c ON c.service_instance_id = si.id
            WHERE si.instance_type = $1
              AND c.id IS DISTINCT FROM si.current_certificate_id
            GROUP BY si.id
            HAVING COUNT(c.id) > 1
            ORDER BY si.id
            "#,
        )
        .bind(kind.as_str())
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }
}

impl<'r> FromRow<'r, PgRow> for ServiceInstance {
    fn from_row(row: &'r PgRow) -> std::result::Result<Self, sqlx::Error> {
        let kind: String = row.try_get("instance_type")?;
        let kind = kind
            .parse::<InstanceKind>()
            .map_err(|e| sqlx::Error::Decode(e.into()))?;
        let cdn: Json<CdnSettings> = row.try_get("cdn")?;
        let dedicated_waf: Json<DedicatedWafSettings> = row.try_get("dedicated_waf")?;
        let tags: Json<BTreeMap<String, String>> = row.try_get("tags")?;

        Ok(Self {
            id: row.try_get("id")?,
            kind,
            domain_names: row.try_get("domain_names")?,
            org_id: row.try_get("org_id")?,
            acme_user_id: row.try_get("acme_user_id")?,
            current_certificate_id: row.try_get("current_certificate_id")?,
            new_certificate_id: row.try_get("new_certificate_id")?,
            route53_change_ids: row.try_get("route53_change_ids")?,
            domain_internal: row.try_get("domain_internal")?,
            route53_alias_hosted_zone: row.try_get("route53_alias_hosted_zone")?,
            alb: AlbSettings {
                alb_arn: row.try_get("alb_arn")?,
                alb_listener_arn: row.try_get("alb_listener_arn")?,
                previous_alb_arn: row.try_get("previous_alb_arn")?,
                previous_alb_listener_arn: row.try_get("previous_alb_listener_arn")?,
            },
            cdn: cdn.0,
            dedicated_waf: dedicated_waf.0,
            tags: tags.0,
            deactivated_at: row.try_get("deactivated_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_kind_round_trips_through_table_value() {
        for kind in InstanceKind::ALL {
            assert_eq!(kind.as_str().parse::<InstanceKind>().unwrap(), kind);
        }
        assert!("cdn".parse::<InstanceKind>().is_err());
    }

    #[test]
    fn test_domain_names_are_normalized() {
        let instance = ServiceInstance::new(
            "4321",
            InstanceKind::Cdn,
            vec![
                "Example.COM".to_string(),
                " foo.com. ".to_string(),
                "example.com".to_string(),
            ],
        );
        assert_eq!(instance.domain_names, vec!["example.com", "foo.com"]);
    }

    #[test]
    fn test_change_ids_are_ordered_and_unique() {
        let mut instance = ServiceInstance::new("1", InstanceKind::Alb, vec![]);
        instance.push_change_id("C1");
        instance.push_change_id("C2");
        instance.push_change_id("C1");
        assert_eq!(instance.route53_change_ids, vec!["C1", "C2"]);

        instance.remove_change_id("C1");
        assert_eq!(instance.route53_change_ids, vec!["C2"]);
    }

    proptest! {
        #[test]
        fn normalized_domains_are_lowercase_and_unique(domains in prop::collection::vec("[A-Za-z]{1,8}\\.[a-z]{2,3}\\.?", 0..8)) {
            let normalized = normalize_domain_names(&domains);
            for domain in &normalized {
                prop_assert_eq!(domain.clone(), domain.to_lowercase());
                prop_assert!(!domain.ends_with('.'));
                prop_assert_eq!(normalized.iter().filter(|d| *d == domain).count(), 1);
            }
        }
    }
}
