//! Progress and cancellation hooks
//!
//! These traits allow the engine to be used without depending on a
//! specific UI; the CLI plugs progress bars in, tests use [`NoProgress`].

use crate::types::{ApplyResult, ResourceAddress};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// What the executor is about to do with a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Replace,
    Delete,
}

impl Operation {
    pub fn verb(self) -> &'static str {
        match self {
            Self::Create => "Creating",
            Self::Update => "Updating",
            Self::Replace => "Replacing",
            Self::Delete => "Deleting",
        }
    }
}

/// Progress callback for execution operations
///
/// Resource callbacks may be invoked from worker threads.
pub trait ProgressCallback: Sync {
    /// Called when a ready set is dispatched
    fn on_batch_start(&self, index: usize, count: usize);

    /// Called when a worker picks up a resource
    fn on_resource_start(&self, address: &ResourceAddress, operation: Operation);

    /// Called when a resource reaches a terminal state
    fn on_resource_complete(&self, address: &ResourceAddress, result: &ApplyResult);

    /// Called after every resource of a ready set has finished
    fn on_batch_complete(&self, index: usize);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_batch_start(&self, _index: usize, _count: usize) {}
    fn on_resource_start(&self, _address: &ResourceAddress, _operation: Operation) {}
    fn on_resource_complete(&self, _address: &ResourceAddress, _result: &ApplyResult) {}
    fn on_batch_complete(&self, _index: usize) {}
}

/// Cooperative cancellation flag
///
/// Cancelling stops dispatch of further ready sets; resources already in
/// flight finish or fail on their own.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
