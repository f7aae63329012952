//! Execution engine - applies a reconciliation ready set by ready set
//!
//! Apply runs in three phases. Old instances of replaced resources are
//! torn down first, in reverse dependency order. Creates and updates are
//! then dispatched through a [`Scheduler`] onto a bounded rayon pool.
//! Resources dropped from the stack are deleted last, once no surviving
//! record depends on them. Only the calling thread touches the scheduler,
//! the state snapshot and the report; workers just talk to the provider
//! and hand back an outcome.

use crate::context::{CancelToken, NoProgress, Operation, ProgressCallback};
use crate::destroy::{Teardown, check_dependents, partition_blocked, teardown};
use crate::descriptor::{Config, DescriptorStore, ResourceDescriptor};
use crate::error::{Error, Result};
use crate::graph::PlanGraph;
use crate::provider::{Provider, ResolvedResource};
use crate::reconcile::{Action, Reconciliation};
use crate::scheduler::Scheduler;
use crate::state::StateSnapshot;
use crate::types::{
    ApplyResult, ExecuteOptions, ExecutionReport, OperationStatus, ProvisioningState,
    ResourceAddress,
};
use rayon::prelude::*;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

/// Drives a [`Provider`] through apply and destroy runs
pub struct Executor<'a> {
    pub(crate) provider: &'a dyn Provider,
    pub(crate) opts: ExecuteOptions,
    pub(crate) progress: &'a dyn ProgressCallback,
    pub(crate) cancel: CancelToken,
}

/// One resource handed to a worker
struct Job<'s> {
    address: ResourceAddress,
    descriptor: &'s ResourceDescriptor,
    action: Action,
    config: Config,
    existing_id: Option<String>,
}

enum JobOutcome {
    Ready { id: String },
    Failed { id: Option<String>, error: String },
}

impl<'a> Executor<'a> {
    pub fn new(provider: &'a dyn Provider, opts: ExecuteOptions) -> Self {
        Self {
            provider,
            opts,
            progress: &NoProgress,
            cancel: CancelToken::new(),
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: &'a dyn ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn options(&self) -> &ExecuteOptions {
        &self.opts
    }

    /// Token that stops dispatch of further ready sets when cancelled
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub(crate) fn pool(&self) -> Result<rayon::ThreadPool> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.opts.jobs.max(1))
            .build()
            .map_err(|e| Error::ThreadPool(e.to_string()))
    }

    /// Apply a reconciliation, mutating `state` as resources settle
    ///
    /// `state` is updated in place even when the run fails part-way, so the
    /// caller can persist it before looking at the report. Resource failures
    /// are reported, not returned; use [`ExecutionReport::into_result`] to
    /// turn them into an error.
    pub fn apply(
        &self,
        store: &DescriptorStore,
        graph: &PlanGraph,
        reconciliation: &Reconciliation,
        state: &mut StateSnapshot,
    ) -> Result<ExecutionReport> {
        let mut report = ExecutionReport::default();
        for address in graph.nodes() {
            transition(&mut report, address, ProvisioningState::Planned)?;
        }

        if self.opts.dry_run {
            log::info!("Dry run: {} resources planned, no provider calls made", graph.len());
            return Ok(report);
        }

        let summary = reconciliation.summary();
        log::info!(
            "Applying {} changes with {} workers via {}",
            summary.total_changes(),
            self.opts.jobs,
            self.provider.name()
        );

        let pool = self.pool()?;

        let removed: BTreeSet<ResourceAddress> = reconciliation
            .removed()
            .into_iter()
            .filter(|a| state.contains(a))
            .collect();
        for address in &removed {
            transition(&mut report, address, ProvisioningState::Planned)?;
        }

        let upfront = replacement_teardown(reconciliation, state, &removed)?;
        check_dependents(state, &upfront, |_| true)?;

        let timeout_for = |address: &ResourceAddress| {
            store
                .get(address)
                .and_then(ResourceDescriptor::timeout)
                .unwrap_or(self.opts.timeout)
        };
        let teardown = teardown(self, &pool, state, &upfront, &timeout_for, 0)?;
        record_removed(&mut report, &teardown, graph)?;

        let mut scheduler = Scheduler::new(graph);
        for (address, error) in teardown.failed.iter().filter(|(a, _)| graph.contains(a)) {
            if report.state_of(address).is_terminal() {
                continue;
            }
            transition(&mut report, address, ProvisioningState::InProgress)?;
            transition(&mut report, address, ProvisioningState::Failed)?;
            report.record(
                address.clone(),
                ApplyResult::Failed {
                    error: format!("delete failed: {error}"),
                },
            );
            let skipped = scheduler.mark_failed(address);
            skip_all(&mut report, skipped, &format!("dependency {address} failed"))?;
        }
        for address in teardown.skipped.iter().filter(|a| graph.contains(a)) {
            if report.state_of(address).is_terminal() {
                continue;
            }
            transition(&mut report, address, ProvisioningState::Skipped)?;
            report.record(
                address.clone(),
                ApplyResult::Skipped {
                    reason: "old instance could not be deleted".into(),
                },
            );
            let skipped = scheduler.mark_failed(address);
            skip_all(&mut report, skipped, &format!("dependency {address} was skipped"))?;
        }

        if teardown.cancelled {
            self.cancel.cancel();
        }

        let mut batch = teardown.batches;
        let mut ids: HashMap<ResourceAddress, String> = HashMap::new();
        let mut rendered: HashMap<ResourceAddress, Config> = HashMap::new();

        loop {
            if self.cancel.is_cancelled() {
                let skipped = scheduler.skip_remaining();
                if !skipped.is_empty() {
                    log::warn!("Cancelled: skipping {} remaining resources", skipped.len());
                }
                skip_all(&mut report, skipped, "cancelled")?;
                report.cancelled = true;
                break;
            }

            let set = scheduler.next_ready_set();
            if set.is_empty() {
                break;
            }

            let mut jobs = Vec::new();
            for address in set {
                let Some(descriptor) = store.get(&address) else {
                    continue;
                };
                let action = reconciliation
                    .action(&address)
                    .cloned()
                    .unwrap_or(Action::Create);
                let existing_id = state.get(&address).map(|r| r.id.clone());

                if action == Action::NoOp && existing_id.is_none() {
                    // Left out of a targeted run and never created
                    transition(&mut report, &address, ProvisioningState::Skipped)?;
                    report.record(
                        address.clone(),
                        ApplyResult::Skipped {
                            reason: "not targeted".into(),
                        },
                    );
                    let skipped = scheduler.mark_failed(&address);
                    skip_all(&mut report, skipped, "not targeted")?;
                    continue;
                }

                let config = match descriptor.render(|target, attribute| {
                    resolve_reference(&ids, &rendered, target, attribute)
                }) {
                    Ok(config) => config,
                    Err(e) => {
                        log::warn!("{address}: {e}");
                        transition(&mut report, &address, ProvisioningState::InProgress)?;
                        transition(&mut report, &address, ProvisioningState::Failed)?;
                        report.record(address.clone(), ApplyResult::Failed { error: e.to_string() });
                        let skipped = scheduler.mark_failed(&address);
                        skip_all(&mut report, skipped, &format!("dependency {address} failed"))?;
                        continue;
                    }
                };

                if action == Action::NoOp {
                    if let Some(id) = existing_id {
                        ids.insert(address.clone(), id);
                    }
                    rendered.insert(address.clone(), config);
                    transition(&mut report, &address, ProvisioningState::Ready)?;
                    report.record(address.clone(), ApplyResult::NoChange);
                    scheduler.mark_ready(&address);
                    continue;
                }

                jobs.push(Job {
                    address,
                    descriptor,
                    action,
                    config,
                    existing_id,
                });
            }

            if jobs.is_empty() {
                continue;
            }

            self.progress.on_batch_start(batch, jobs.len());
            for job in &jobs {
                transition(&mut report, &job.address, ProvisioningState::InProgress)?;
            }

            let outcomes: Vec<(Job<'_>, JobOutcome)> = pool.install(|| {
                jobs.into_par_iter()
                    .map(|job| {
                        let outcome = self.provision(&job);
                        (job, outcome)
                    })
                    .collect()
            });

            let mut any_failed = false;
            for (job, outcome) in outcomes {
                let result = match outcome {
                    JobOutcome::Ready { id } => {
                        state.record_ready(&id, job.descriptor);
                        transition(&mut report, &job.address, ProvisioningState::Ready)?;
                        scheduler.mark_ready(&job.address);
                        ids.insert(job.address.clone(), id.clone());
                        rendered.insert(job.address.clone(), job.config);
                        match job.action {
                            Action::Update { .. } => ApplyResult::Updated,
                            Action::Replace { .. } => ApplyResult::Replaced { id },
                            _ => ApplyResult::Created { id },
                        }
                    }
                    JobOutcome::Failed { id, error } => {
                        any_failed = true;
                        log::warn!("{} failed: {error}", job.address);
                        // An accepted but failed resource is tainted for the next run
                        if let Some(id) = id {
                            state.record_failed(&id, job.descriptor);
                        }
                        transition(&mut report, &job.address, ProvisioningState::Failed)?;
                        let skipped = scheduler.mark_failed(&job.address);
                        skip_all(&mut report, skipped, &format!("dependency {} failed", job.address))?;
                        ApplyResult::Failed { error }
                    }
                };
                self.progress.on_resource_complete(&job.address, &result);
                report.record(job.address, result);
            }
            self.progress.on_batch_complete(batch);
            batch += 1;

            if any_failed && self.opts.halt_on_failure {
                log::info!("Halting after failure");
                self.cancel.cancel();
            }
        }

        let leftover: BTreeSet<ResourceAddress> = removed
            .into_iter()
            .filter(|a| !upfront.contains(a) && state.contains(a))
            .collect();
        if !leftover.is_empty() {
            self.delete_removed(&pool, state, &leftover, batch, &timeout_for, &mut report)?;
        }

        Ok(report)
    }

    /// Delete resources dropped from the stack once nothing recorded uses them
    ///
    /// Runs after creates and updates, so a declared resource that stopped
    /// referencing a removed one has been updated first. If that update
    /// failed its record still points at the removed resource, which is
    /// then left in place.
    fn delete_removed(
        &self,
        pool: &rayon::ThreadPool,
        state: &mut StateSnapshot,
        removed: &BTreeSet<ResourceAddress>,
        first_batch: usize,
        timeout_for: &(dyn Fn(&ResourceAddress) -> Duration + Sync),
        report: &mut ExecutionReport,
    ) -> Result<()> {
        if self.cancel.is_cancelled() {
            return skip_all(report, removed.iter().cloned().collect(), "cancelled");
        }

        let (deletable, blocked) = partition_blocked(state, removed);
        for (address, holders) in blocked {
            let holders: Vec<String> = holders.iter().map(ToString::to_string).collect();
            log::warn!("Not deleting {address}: still referenced by {}", holders.join(", "));
            transition(report, &address, ProvisioningState::Skipped)?;
            report.record(
                address,
                ApplyResult::Skipped {
                    reason: format!("still referenced by {}", holders.join(", ")),
                },
            );
        }

        let teardown = teardown(self, pool, state, &deletable, timeout_for, first_batch)?;
        record_removed(report, &teardown, &PlanGraph::default())?;
        if teardown.cancelled {
            report.cancelled = true;
        }
        Ok(())
    }

    /// Create or update one resource and wait for it to settle
    fn provision(&self, job: &Job<'_>) -> JobOutcome {
        let operation = match job.action {
            Action::Update { .. } if job.existing_id.is_some() => Operation::Update,
            Action::Replace { .. } => Operation::Replace,
            _ => Operation::Create,
        };
        self.progress.on_resource_start(&job.address, operation);
        log::debug!("{} {}", operation.verb(), job.address);

        let resource = ResolvedResource {
            address: job.address.clone(),
            config: job.config.clone(),
        };
        let timeout = job.descriptor.timeout().unwrap_or(self.opts.timeout);

        let (id, status) = match (operation, &job.existing_id) {
            (Operation::Update, Some(id)) => match self.provider.update(id, &resource) {
                Ok(status) => (id.clone(), status),
                Err(e) => {
                    return JobOutcome::Failed {
                        id: None,
                        error: e.to_string(),
                    };
                }
            },
            _ => match self.provider.create(&resource) {
                Ok(created) => (created.id, created.status),
                Err(e) => {
                    return JobOutcome::Failed {
                        id: None,
                        error: e.to_string(),
                    };
                }
            },
        };

        match self.wait_for(&job.address, &id, status, timeout, false) {
            Ok(()) => JobOutcome::Ready { id },
            Err(e) => JobOutcome::Failed {
                id: Some(id),
                error: failure_message(e),
            },
        }
    }

    /// Poll until the operation on `id` is terminal or `timeout` elapses
    ///
    /// While deleting, a not-found answer means the delete completed.
    pub(crate) fn wait_for(
        &self,
        address: &ResourceAddress,
        id: &str,
        mut status: OperationStatus,
        timeout: Duration,
        deleting: bool,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            match status {
                OperationStatus::Succeeded => return Ok(()),
                OperationStatus::Failed { message } => {
                    return Err(Error::ProvisioningFailure {
                        address: address.clone(),
                        message,
                    });
                }
                OperationStatus::Pending => {}
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::TimedOut {
                    address: address.clone(),
                    timeout,
                });
            }
            std::thread::sleep(self.opts.poll_interval.min(deadline - now));

            status = match self.provider.get_status(id) {
                Ok(status) => status,
                Err(e) if deleting && e.is_not_found() => return Ok(()),
                Err(e) => return Err(e.into()),
            };
        }
    }
}

/// Old instances of replaced resources, plus removed resources recorded on
/// top of one of them
fn replacement_teardown(
    reconciliation: &Reconciliation,
    state: &StateSnapshot,
    removed: &BTreeSet<ResourceAddress>,
) -> Result<BTreeSet<ResourceAddress>> {
    let replaced: BTreeSet<ResourceAddress> = reconciliation
        .replaced()
        .into_iter()
        .filter(|a| state.contains(a))
        .collect();
    if replaced.is_empty() {
        return Ok(replaced);
    }

    let recorded = state.graph()?;
    let mut targets = replaced.clone();
    for address in &replaced {
        targets.extend(
            recorded
                .transitive_dependents(address)
                .into_iter()
                .filter(|d| removed.contains(d)),
        );
    }
    Ok(targets)
}

/// Report what happened to torn-down resources that are not in `graph`
fn record_removed(report: &mut ExecutionReport, teardown: &Teardown, graph: &PlanGraph) -> Result<()> {
    for address in teardown.deleted.iter().filter(|a| !graph.contains(a)) {
        transition(report, address, ProvisioningState::InProgress)?;
        transition(report, address, ProvisioningState::Ready)?;
        report.record(address.clone(), ApplyResult::Deleted);
    }
    for (address, error) in teardown.failed.iter().filter(|(a, _)| !graph.contains(a)) {
        transition(report, address, ProvisioningState::InProgress)?;
        transition(report, address, ProvisioningState::Failed)?;
        report.record(
            address.clone(),
            ApplyResult::Failed {
                error: format!("delete failed: {error}"),
            },
        );
    }
    let reason = if teardown.cancelled {
        "cancelled"
    } else {
        "a dependent could not be deleted"
    };
    let skipped = teardown
        .skipped
        .iter()
        .filter(|a| !graph.contains(a))
        .cloned()
        .collect();
    skip_all(report, skipped, reason)
}

/// Value of `${target.attribute}` from dependencies that already reached Ready
fn resolve_reference(
    ids: &HashMap<ResourceAddress, String>,
    rendered: &HashMap<ResourceAddress, Config>,
    target: &ResourceAddress,
    attribute: Option<&str>,
) -> Option<Value> {
    let id = ids.get(target)?;
    match attribute {
        None | Some("id") => Some(Value::String(id.clone())),
        Some(path) => rendered
            .get(target)
            .and_then(|config| lookup_path(config, path))
            .cloned()
            .or_else(|| (path == "name").then(|| Value::String(target.name().to_string()))),
    }
}

fn lookup_path<'v>(config: &'v Config, path: &str) -> Option<&'v Value> {
    let mut parts = path.split('.');
    let mut current = config.get(parts.next()?)?;
    for part in parts {
        current = current.get(part)?;
    }
    Some(current)
}

pub(crate) fn failure_message(err: Error) -> String {
    match err {
        Error::ProvisioningFailure { message, .. } => message,
        other => other.to_string(),
    }
}

/// Move `address` to `to`, rejecting illegal lifecycle transitions
pub(crate) fn transition(
    report: &mut ExecutionReport,
    address: &ResourceAddress,
    to: ProvisioningState,
) -> Result<()> {
    let from = report.state_of(address);
    if !from.can_transition_to(to) {
        return Err(Error::InvalidTransition {
            address: address.clone(),
            from,
            to,
        });
    }
    report.states.insert(address.clone(), to);
    Ok(())
}

pub(crate) fn skip_all(
    report: &mut ExecutionReport,
    addresses: Vec<ResourceAddress>,
    reason: &str,
) -> Result<()> {
    for address in addresses {
        transition(report, &address, ProvisioningState::Skipped)?;
        report.record(
            address,
            ApplyResult::Skipped {
                reason: reason.to_string(),
            },
        );
    }
    Ok(())
}
