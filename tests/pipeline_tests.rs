//! Pipeline integration tests
//!
//! Every test runs whole operations through the scheduler against the
//! in-memory store and queue and the fake collaborators in
//! `domain_broker::test_helpers`.

mod pipeline;
