//! Testing utilities for unit provisioning pipelines.
//!
//! This module provides:
//! - In-memory fakes of every collaborator, with failure injection
//! - A harness building pipeline arguments over those fakes

mod fixtures;
mod mocks;

pub use fixtures::Harness;
pub use mocks::{
    FakeApp, FakeCancelService, FakeChecker, FakeImages, FakeRouter, FakeRuntime, Faults,
    LogScript, MemoryStore,
};
