//! # Database Operations
//!
//! Persistence for the pipeline's durable state.
//!
//! - [`BrokerStore`] - the contract every step persists through
//! - [`PgStore`] - Postgres implementation over the model queries
//! - [`MemoryStore`] - in-process implementation for tests and local runs
//! - [`DatabaseConnection`] / [`DatabaseMigrations`] - pool and schema setup

pub mod connection;
pub mod memory;
pub mod migrations;
pub mod postgres;
pub mod store;

pub use connection::DatabaseConnection;
pub use memory::MemoryStore;
pub use migrations::DatabaseMigrations;
pub use postgres::PgStore;
pub use store::BrokerStore;
