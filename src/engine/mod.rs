//! Execution engine for stackplan
//!
//! The engine orchestrates:
//! 1. Planning - load the stack and state, build the graph, reconcile
//! 2. Diffing - show per-resource actions and configuration changes
//! 3. Executing - apply or destroy with parallel ready sets

pub mod differ;
pub mod executor;
pub mod planner;

pub use executor::RunOptions;
pub use planner::{Workspace, parse_targets};
