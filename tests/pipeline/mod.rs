mod cancellation;
mod dedicated_alb;
mod deprovision;
mod idempotence;
mod migration;
mod provision;
mod reconciliation;
mod retry;
mod rotation;

use domain_broker::broker::InstanceRequest;
use domain_broker::models::InstanceKind;

pub const DOMAINS: [&str; 2] = ["example.com", "foo.com"];

pub fn request(id: &str, kind: InstanceKind) -> InstanceRequest {
    InstanceRequest::new(id, kind, DOMAINS)
}
