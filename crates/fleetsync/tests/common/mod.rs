//! Shared test utilities for fleetsync integration tests.
//!
//! This module provides:
//! - in-memory fakes for the git client, project provisioner, tunnel
//!   registry, docker engine and audit sink
//! - a local HTTP responder standing in for remote agents
//! - `TestHarness`, wiring every service over an in-memory database

pub mod fakes;
pub mod harness;
pub mod http;

pub use harness::*;
pub use http::{closed_port_url, Responder};
