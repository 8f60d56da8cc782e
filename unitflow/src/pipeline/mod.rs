//! Pipeline building and execution.
//!
//! This module provides:
//! - The [`Action`] trait: a forward step with optional compensation
//! - The linear [`Pipeline`] engine that unwinds on failure
//! - The container fan-out used by batch actions

mod action;
mod engine;
mod fanout;

pub use action::Action;
pub use engine::Pipeline;
pub use fanout::{
    fan_out, run_in_containers, worker_count, FanOutReport, ForEachContainer, RollbackFn,
    RollbackSink,
};
