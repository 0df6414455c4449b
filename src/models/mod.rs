//! # Persistent Domain Model
//!
//! Durable state shared between pipeline steps. Each model owns its SQL; the
//! [`crate::database`] stores decide where the rows live.

pub mod acme_user;
pub mod certificate;
pub mod challenge;
pub mod dedicated_alb;
pub mod operation;
pub mod service_instance;

pub use acme_user::{AcmeUser, NewAcmeUser};
pub use certificate::{Certificate, NewCertificate};
pub use challenge::{Challenge, NewChallenge};
pub use dedicated_alb::{DedicatedAlb, DedicatedAlbListener};
pub use operation::{NewOperation, Operation, OperationAction};
pub use service_instance::{
    normalize_domain_names, AlbSettings, CdnSettings, CookiePolicy, DedicatedWafSettings,
    HealthCheckAlarm, HealthCheckRecord, InstanceKind, ServiceInstance, ShieldAssociation,
};
