//! # System Constants
//!
//! Step descriptions, DNS record conventions and naming rules shared by the
//! pipeline steps.

/// Human-readable progress strings written to `Operation.step_description`
pub mod step_descriptions {
    pub const REGISTER_ACME_USER: &str = "Registering user for Let's Encrypt";
    pub const CREATE_CREDENTIALS: &str = "Creating credentials for Let's Encrypt";
    pub const INITIATE_CHALLENGES: &str = "Initiating Let's Encrypt challenges";
    pub const CREATE_TXT_RECORDS: &str = "Updating DNS TXT records";
    pub const WAIT_FOR_DNS: &str = "Waiting for DNS changes";
    pub const ANSWER_CHALLENGES: &str = "Answering Let's Encrypt challenges";
    pub const RETRIEVE_CERTIFICATE: &str = "Retrieving SSL certificate from Let's Encrypt";
    pub const UPLOAD_CERTIFICATE: &str = "Uploading SSL certificate to AWS";
    pub const CREATE_DISTRIBUTION: &str = "Creating CloudFront distribution";
    pub const WAIT_FOR_DISTRIBUTION: &str = "Waiting for CloudFront distribution";
    pub const UPDATE_DISTRIBUTION: &str = "Updating CloudFront distribution";
    pub const UPDATE_DISTRIBUTION_CERTIFICATE: &str = "Updating certificate on CloudFront distribution";
    pub const DISABLE_DISTRIBUTION: &str = "Disabling CloudFront distribution";
    pub const WAIT_FOR_DISABLED: &str = "Waiting for CloudFront distribution to disable";
    pub const DELETE_DISTRIBUTION: &str = "Deleting CloudFront distribution";
    pub const ADOPT_DISTRIBUTION: &str = "Adopting existing CloudFront distribution";
    pub const SELECT_ALB: &str = "Selecting load balancer";
    pub const ADD_CERTIFICATE_TO_ALB: &str = "Adding SSL certificate to load balancer";
    pub const WAIT_FOR_CERTIFICATE_PROPAGATION: &str = "Waiting for load balancer certificate propagation";
    pub const REMOVE_OLD_CERTIFICATE_FROM_ALB: &str = "Removing old SSL certificate from load balancer";
    pub const REMOVE_CERTIFICATE_FROM_ALB: &str = "Removing SSL certificate from load balancer";
    pub const ENSURE_ALB_WEB_ACL: &str = "Associating WAF web ACL with load balancer";
    pub const CREATE_ALIAS_RECORDS: &str = "Creating DNS ALIAS records";
    pub const REMOVE_ALIAS_RECORDS: &str = "Removing DNS ALIAS records";
    pub const REMOVE_TXT_RECORDS: &str = "Removing DNS TXT records";
    pub const DELETE_OLD_CERTIFICATE: &str = "Removing old SSL certificate";
    pub const DELETE_CERTIFICATES: &str = "Removing SSL certificates";
    pub const CREATE_WEB_ACL: &str = "Creating custom WAF web ACL";
    pub const WAIT_FOR_WEB_ACL: &str = "Waiting for custom WAF web ACL";
    pub const DELETE_WEB_ACL: &str = "Deleting custom WAF web ACL";
    pub const CREATE_HEALTH_CHECKS: &str = "Creating health checks";
    pub const DELETE_HEALTH_CHECKS: &str = "Deleting health checks";
    pub const ASSOCIATE_SHIELD: &str = "Associating health check with Shield";
    pub const DISASSOCIATE_SHIELD: &str = "Disassociating health check from Shield";
    pub const CREATE_SNS_TOPIC: &str = "Creating SNS notification topic";
    pub const SUBSCRIBE_SNS_TOPIC: &str = "Subscribing to SNS notification topic";
    pub const DELETE_SNS_TOPIC: &str = "Deleting SNS notification topic";
    pub const CREATE_HEALTH_CHECK_ALARMS: &str = "Creating health check alarms";
    pub const CREATE_DDOS_ALARM: &str = "Creating DDoS detection alarm";
    pub const DELETE_ALARMS: &str = "Deleting alarms";
    pub const SWITCH_INSTANCE_KIND: &str = "Migrating instance to new plan";
    pub const MARK_DEPROVISIONED: &str = "Marking instance deprovisioned";
    pub const COMPLETE: &str = "Complete!";
}

/// DNS record conventions
pub mod dns {
    /// Prefix of the DNS-01 validation record name
    pub const ACME_CHALLENGE_PREFIX: &str = "_acme-challenge";
    /// Change status reported once a change reached every authoritative server
    pub const CHANGE_INSYNC: &str = "INSYNC";
    pub const HEALTH_CHECK_PORT: u16 = 443;
    pub const HEALTH_CHECK_PATH: &str = "/";
}

/// Naming of resources created in the provider accounts
pub mod naming {
    /// Certificate store name for a certificate row
    pub fn certificate_name(service_instance_id: &str, certificate_id: i64) -> String {
        format!("{service_instance_id}-{certificate_id}")
    }

    /// Idempotency token of the distribution an operation creates
    pub fn distribution_caller_reference(service_instance_id: &str, operation_id: i64) -> String {
        format!("{service_instance_id}-{operation_id}")
    }

    pub fn web_acl_name(prefix: &str, service_instance_id: &str) -> String {
        format!("{prefix}-cdn-{service_instance_id}")
    }

    pub fn alb_web_acl_name(prefix: &str, alb_id: i64) -> String {
        format!("{prefix}-dedicated-alb-{alb_id}")
    }

    pub fn sns_topic_name(prefix: &str, service_instance_id: &str) -> String {
        format!("{prefix}-{service_instance_id}-notifications")
    }

    pub fn health_check_alarm_name(prefix: &str, service_instance_id: &str, health_check_id: &str) -> String {
        format!("{prefix}-{service_instance_id}-healthcheck-{health_check_id}")
    }

    pub fn ddos_alarm_name(prefix: &str, service_instance_id: &str) -> String {
        format!("{prefix}-{service_instance_id}-ddos-detected")
    }
}

/// Tag keys attached to provider resources
pub mod tags {
    pub const SERVICE_INSTANCE_ID: &str = "service_instance_id";
    pub const INSTANCE_TYPE: &str = "instance_type";
    pub const MANAGED_BY: &str = "managed_by";
    pub const MANAGED_BY_VALUE: &str = "domain-broker";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_names() {
        assert_eq!(naming::certificate_name("4321", 7), "4321-7");
        assert_eq!(naming::web_acl_name("broker", "4321"), "broker-cdn-4321");
        assert_eq!(
            naming::health_check_alarm_name("broker", "4321", "hc-1"),
            "broker-4321-healthcheck-hc-1"
        );
    }
}
