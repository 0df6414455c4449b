//! # Reconciliation Jobs
//!
//! Administrative jobs run on a schedule outside any pipeline: cleanup of
//! certificates a failed rotation left behind, sync of the dedicated
//! listener pool from the load balancer API, and the renewal scan.

pub mod duplicate_certificates;
pub mod listeners;
pub mod renewals;

pub use duplicate_certificates::{reconcile_duplicate_certificates, DuplicateCertificateReport};
pub use listeners::{sync_dedicated_listeners, ListenerSyncReport};
pub use renewals::scan_for_expiring_certificates;
