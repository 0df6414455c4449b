#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, ACME in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Domain Broker
//!
//! Provisioning pipeline engine for a service broker that puts customer
//! domains behind TLS, either on shared or dedicated application load
//! balancers or on CDN distributions.
//!
//! ## Overview
//!
//! Every broker request (provision, deprovision, update, renew, plan
//! migration) becomes an [`models::Operation`] running an ordered pipeline of
//! idempotent steps. Steps issue certificates through ACME DNS-01
//! challenges, publish DNS records, upload certificates, attach them to
//! listeners or distributions, and manage the firewall, DDoS protection and
//! alarm resources around them. A durable queue feeds the [`scheduler`],
//! which runs one step at a time per operation, retries transient failures
//! and honours cancellation.
//!
//! ## Module Organization
//!
//! - [`broker`] - Request entry points and operation status
//! - [`bootstrap`] - Wiring a Postgres-backed broker from configuration
//! - [`pipeline`] - Step contract, registry and pipeline templates
//! - [`steps`] - The built-in pipeline steps
//! - [`scheduler`] - Queue, retry policies and the step executor
//! - [`adapters`] - Contracts for every external collaborator
//! - [`models`] - Persistent records
//! - [`database`] - Postgres and in-memory stores
//! - [`state_machine`] - Operation lifecycle and certificate rotation
//! - [`reconciliation`] - Administrative repair and renewal jobs
//! - [`config`] - Layered configuration
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use domain_broker::broker::InstanceRequest;
//! use domain_broker::models::InstanceKind;
//! use domain_broker::test_helpers::TestHarness;
//!
//! # async fn example() -> domain_broker::Result<()> {
//! let harness = TestHarness::new()?;
//! let operation = harness
//!     .provision(InstanceRequest::new("4321", InstanceKind::Alb, ["example.com"]))
//!     .await?;
//! println!("{}: {}", operation.state, operation.step_description.unwrap_or_default());
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit and pipeline integration tests
//! ```

pub mod adapters;
pub mod bootstrap;
pub mod broker;
pub mod config;
pub mod constants;
pub mod crypto;
pub mod database;
pub mod error;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod reconciliation;
pub mod scheduler;
pub mod state_machine;
pub mod steps;
pub mod test_helpers;

pub use bootstrap::{BrokerBootstrap, BrokerSystem};
pub use broker::{BrokerService, InstanceRequest, OperationStatus, UpdateRequest};
pub use config::{BrokerConfig, ConfigManager};
pub use database::{BrokerStore, MemoryStore, PgStore};
pub use error::{AdapterError, AdapterResult, BrokerError, ErrorCategory, Result};
pub use models::{InstanceKind, Operation, OperationAction, ServiceInstance};
pub use pipeline::{pipeline_for, Pipeline, Step, StepContext, StepId, StepRegistry};
pub use scheduler::{JobOutcome, MemoryQueue, PgQueue, Scheduler, SchedulerHandle, TaskQueue};
pub use state_machine::OperationState;
