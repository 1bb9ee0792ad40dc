//! Shared test utilities for integration tests.
//!
//! This module provides:
//! - An in-memory config store that records applies
//! - A loopback transport routing fetches into in-process changelog
//!   servers, so multi-node replication runs without sockets

pub mod loopback;
pub mod store;

pub use loopback::*;
pub use store::*;
