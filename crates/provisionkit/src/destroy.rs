//! Destroy planner - reverse topological teardown of recorded resources
//!
//! Teardown schedules over the state graph with every edge flipped, so a
//! resource is deleted only after everything that depends on it is gone.
//! A failed delete leaves the resources it depends on in place.

use crate::context::Operation;
use crate::error::{Error, Result};
use crate::executor::{Executor, failure_message, skip_all, transition};
use crate::graph::PlanGraph;
use crate::scheduler::{Scheduler, teardown_sets};
use crate::state::StateSnapshot;
use crate::types::{ApplyResult, ExecutionReport, ProvisioningState, ResourceAddress};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Deletion order for every recorded resource, dependents first
///
/// Flattened, this is the reverse of a valid creation order.
pub fn destroy_order(state: &StateSnapshot) -> Result<Vec<Vec<ResourceAddress>>> {
    Ok(teardown_sets(&state.graph()?))
}

/// Fail if a resource about to be deleted still has a dependent that stays
///
/// `blocking` decides which surviving dependents count.
pub(crate) fn check_dependents(
    state: &StateSnapshot,
    targets: &BTreeSet<ResourceAddress>,
    blocking: impl Fn(&ResourceAddress) -> bool,
) -> Result<()> {
    for target in targets {
        let dependents: Vec<ResourceAddress> = state
            .dependents_of(target)
            .into_iter()
            .filter(|d| !targets.contains(d) && blocking(d))
            .collect();
        if !dependents.is_empty() {
            return Err(Error::DependencyStillPresent {
                resource: target.clone(),
                dependents,
            });
        }
    }
    Ok(())
}

/// Split `targets` into those safe to delete and those a surviving record
/// still depends on
///
/// A blocked target keeps its own dependencies alive too, so blocking is
/// applied until nothing changes.
pub(crate) fn partition_blocked(
    state: &StateSnapshot,
    targets: &BTreeSet<ResourceAddress>,
) -> (BTreeSet<ResourceAddress>, BTreeMap<ResourceAddress, Vec<ResourceAddress>>) {
    let mut deletable = targets.clone();
    let mut blocked = BTreeMap::new();
    loop {
        let newly: Vec<(ResourceAddress, Vec<ResourceAddress>)> = deletable
            .iter()
            .filter_map(|target| {
                let holders: Vec<ResourceAddress> = state
                    .dependents_of(target)
                    .into_iter()
                    .filter(|d| !deletable.contains(d))
                    .collect();
                (!holders.is_empty()).then(|| (target.clone(), holders))
            })
            .collect();
        if newly.is_empty() {
            break;
        }
        for (target, holders) in newly {
            deletable.remove(&target);
            blocked.insert(target, holders);
        }
    }
    (deletable, blocked)
}

/// Graph over `targets` whose edges point from a dependency to its dependents
fn teardown_graph(state: &StateSnapshot, targets: &BTreeSet<ResourceAddress>) -> Result<PlanGraph> {
    let edges = targets.iter().flat_map(|address| {
        state
            .get(address)
            .map(|record| record.depends_on.as_slice())
            .unwrap_or_default()
            .iter()
            .filter(move |dep| targets.contains(*dep))
            .map(move |dep| (dep.clone(), address.clone()))
    });
    PlanGraph::from_edges(targets.iter().cloned(), edges)
}

/// What happened to each teardown target
#[derive(Debug, Default)]
pub(crate) struct Teardown {
    pub deleted: Vec<ResourceAddress>,
    pub failed: Vec<(ResourceAddress, String)>,
    pub skipped: Vec<ResourceAddress>,
    pub cancelled: bool,
    /// Index the next progress batch will use
    pub batches: usize,
}

/// Delete `targets` from the provider, dependents first
///
/// Deleted resources are removed from `state`; failed ones are marked
/// failed and stay recorded.
pub(crate) fn teardown(
    exec: &Executor<'_>,
    pool: &rayon::ThreadPool,
    state: &mut StateSnapshot,
    targets: &BTreeSet<ResourceAddress>,
    timeout_for: &(dyn Fn(&ResourceAddress) -> Duration + Sync),
    first_batch: usize,
) -> Result<Teardown> {
    let mut outcome = Teardown {
        batches: first_batch,
        ..Teardown::default()
    };
    if targets.is_empty() {
        return Ok(outcome);
    }

    let graph = teardown_graph(state, targets)?;
    let mut scheduler = Scheduler::new(&graph);

    loop {
        if exec.cancel.is_cancelled() {
            outcome.skipped.extend(scheduler.skip_remaining());
            outcome.cancelled = true;
            break;
        }

        let set = scheduler.next_ready_set();
        if set.is_empty() {
            break;
        }

        let jobs: Vec<(ResourceAddress, String)> = set
            .into_iter()
            .filter_map(|address| {
                let id = state.get(&address)?.id.clone();
                Some((address, id))
            })
            .collect();

        exec.progress.on_batch_start(outcome.batches, jobs.len());
        let results: Vec<(ResourceAddress, Result<()>)> = pool.install(|| {
            jobs.into_par_iter()
                .map(|(address, id)| {
                    exec.progress.on_resource_start(&address, Operation::Delete);
                    log::debug!("Deleting {address} ({id})");
                    let result = delete_one(exec, &address, &id, timeout_for(&address));
                    (address, result)
                })
                .collect()
        });

        for (address, result) in results {
            let applied = match result {
                Ok(()) => {
                    state.remove(&address);
                    scheduler.mark_ready(&address);
                    outcome.deleted.push(address.clone());
                    ApplyResult::Deleted
                }
                Err(e) => {
                    let error = failure_message(e);
                    log::warn!("Failed to delete {address}: {error}");
                    state.mark_failed(&address);
                    outcome.skipped.extend(scheduler.mark_failed(&address));
                    outcome.failed.push((address.clone(), error.clone()));
                    ApplyResult::Failed { error }
                }
            };
            exec.progress.on_resource_complete(&address, &applied);
        }
        exec.progress.on_batch_complete(outcome.batches);
        outcome.batches += 1;

        if !outcome.failed.is_empty() && exec.opts.halt_on_failure {
            exec.cancel.cancel();
        }
    }

    outcome.skipped.sort();
    Ok(outcome)
}

fn delete_one(
    exec: &Executor<'_>,
    address: &ResourceAddress,
    id: &str,
    timeout: Duration,
) -> Result<()> {
    match exec.provider.delete(id) {
        Ok(status) => exec.wait_for(address, id, status, timeout, true),
        Err(e) if e.is_not_found() => {
            log::debug!("{address} was already gone");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

impl Executor<'_> {
    /// Delete recorded resources, dependents before their dependencies
    ///
    /// With `targets`, only the named resources are deleted; if anything
    /// outside the selection still depends on one of them the run fails
    /// with `DependencyStillPresent` before any provider call.
    pub fn destroy(
        &self,
        state: &mut StateSnapshot,
        targets: Option<&BTreeSet<ResourceAddress>>,
    ) -> Result<ExecutionReport> {
        let selected: BTreeSet<ResourceAddress> = match targets {
            Some(targets) => {
                for target in targets.iter().filter(|t| !state.contains(t)) {
                    log::warn!("{target} is not in state, ignoring");
                }
                targets.iter().filter(|t| state.contains(t)).cloned().collect()
            }
            None => state.resources.keys().cloned().collect(),
        };

        let mut report = ExecutionReport::default();
        for address in &selected {
            transition(&mut report, address, ProvisioningState::Planned)?;
        }

        check_dependents(state, &selected, |_| true)?;

        if self.opts.dry_run {
            log::info!("Dry run: {} resources would be deleted", selected.len());
            return Ok(report);
        }

        log::info!(
            "Destroying {} resources with {} workers via {}",
            selected.len(),
            self.opts.jobs,
            self.provider.name()
        );

        let pool = self.pool()?;
        let default_timeout = self.opts.timeout;
        let outcome = teardown(self, &pool, state, &selected, &|_| default_timeout, 0)?;

        for address in outcome.deleted {
            transition(&mut report, &address, ProvisioningState::InProgress)?;
            transition(&mut report, &address, ProvisioningState::Ready)?;
            report.record(address, ApplyResult::Deleted);
        }
        for (address, error) in outcome.failed {
            transition(&mut report, &address, ProvisioningState::InProgress)?;
            transition(&mut report, &address, ProvisioningState::Failed)?;
            report.record(address, ApplyResult::Failed { error });
        }
        let reason = if outcome.cancelled {
            "cancelled"
        } else {
            "a dependent could not be deleted"
        };
        skip_all(&mut report, outcome.skipped, reason)?;
        report.cancelled = outcome.cancelled;

        Ok(report)
    }
}
