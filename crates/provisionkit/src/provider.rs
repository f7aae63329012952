//! Provisioning API boundary
//!
//! The executor talks to the outside world only through [`Provider`].
//! [`MemoryProvider`] is a self-contained implementation with fault
//! injection, used by tests and offline demos.

use crate::descriptor::Config;
use crate::error::ApiError;
use crate::types::{OperationStatus, ResourceAddress};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

/// A descriptor with every interpolation substituted
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedResource {
    pub address: ResourceAddress,
    pub config: Config,
}

/// Response to a create call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Created {
    pub id: String,
    pub status: OperationStatus,
}

/// Contract every backend implements
///
/// Calls may return `Pending`; the executor then polls [`Provider::get_status`]
/// until the operation reaches a terminal state. While a delete is pending,
/// `get_status` may report the object as not found, which counts as done.
pub trait Provider: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    fn create(&self, resource: &ResolvedResource) -> Result<Created, ApiError>;

    fn update(&self, id: &str, resource: &ResolvedResource) -> Result<OperationStatus, ApiError>;

    fn delete(&self, id: &str) -> Result<OperationStatus, ApiError>;

    fn get_status(&self, id: &str) -> Result<OperationStatus, ApiError>;

    /// Configuration keys of `resource_type` that cannot change in place
    fn immutable_properties(&self, _resource_type: &str) -> Vec<String> {
        Vec::new()
    }
}

/// A call observed by [`MemoryProvider`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    Create(ResourceAddress),
    Update(ResourceAddress),
    Delete(ResourceAddress),
    GetStatus(ResourceAddress),
}

impl ProviderCall {
    /// Whether the call changes remote state
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::GetStatus(_))
    }
}

#[derive(Debug)]
struct Remote {
    address: ResourceAddress,
    config: Config,
    polls_left: u32,
    terminal: OperationStatus,
    deleting: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: u64,
    remotes: HashMap<String, Remote>,
    calls: Vec<ProviderCall>,
}

/// In-memory provider with configurable failures and latency
#[derive(Debug, Default)]
pub struct MemoryProvider {
    state: Mutex<MemoryState>,
    fail_on: BTreeMap<ResourceAddress, String>,
    fail_delete_on: BTreeMap<ResourceAddress, String>,
    reject_on: BTreeMap<ResourceAddress, ApiError>,
    hang_on: BTreeSet<ResourceAddress>,
    pending_polls: u32,
    immutable: HashMap<String, Vec<String>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Operations on `address` end in `Failed` after being accepted
    pub fn fail_on(mut self, address: ResourceAddress, message: impl Into<String>) -> Self {
        self.fail_on.insert(address, message.into());
        self
    }

    /// Deletes of `address` end in `Failed`; creates and updates succeed
    pub fn fail_delete_on(mut self, address: ResourceAddress, message: impl Into<String>) -> Self {
        self.fail_delete_on.insert(address, message.into());
        self
    }

    /// Calls for `address` are rejected outright with `error`
    pub fn reject_on(mut self, address: ResourceAddress, error: ApiError) -> Self {
        self.reject_on.insert(address, error);
        self
    }

    /// Operations on `address` stay pending forever
    pub fn hang_on(mut self, address: ResourceAddress) -> Self {
        self.hang_on.insert(address);
        self
    }

    /// Number of `Pending` polls before an operation completes
    pub fn pending_polls(mut self, polls: u32) -> Self {
        self.pending_polls = polls;
        self
    }

    pub fn with_immutable(mut self, resource_type: &str, keys: &[&str]) -> Self {
        self.immutable.insert(
            resource_type.to_string(),
            keys.iter().map(ToString::to_string).collect(),
        );
        self
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.lock().calls.clone()
    }

    /// Number of create/update/delete calls made so far
    pub fn mutation_count(&self) -> usize {
        self.lock().calls.iter().filter(|c| c.is_mutation()).count()
    }

    /// Addresses of resources currently present, with their config
    pub fn live_resources(&self) -> BTreeMap<ResourceAddress, Config> {
        self.lock()
            .remotes
            .values()
            .filter(|r| !r.deleting)
            .map(|r| (r.address.clone(), r.config.clone()))
            .collect()
    }

    fn outcome_for(&self, address: &ResourceAddress) -> (u32, OperationStatus) {
        if self.hang_on.contains(address) {
            return (u32::MAX, OperationStatus::Succeeded);
        }
        let terminal = match self.fail_on.get(address) {
            Some(message) => OperationStatus::Failed {
                message: message.clone(),
            },
            None => OperationStatus::Succeeded,
        };
        (self.pending_polls, terminal)
    }

    fn initial_status(polls_left: u32, terminal: &OperationStatus) -> OperationStatus {
        if polls_left == 0 {
            terminal.clone()
        } else {
            OperationStatus::Pending
        }
    }
}

impl Provider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    fn create(&self, resource: &ResolvedResource) -> Result<Created, ApiError> {
        let mut state = self.lock();
        state.calls.push(ProviderCall::Create(resource.address.clone()));

        if let Some(err) = self.reject_on.get(&resource.address) {
            return Err(err.clone());
        }

        state.next_id += 1;
        let id = format!("mem-{}-{}", resource.address.name(), state.next_id);
        let (polls_left, terminal) = self.outcome_for(&resource.address);
        let status = Self::initial_status(polls_left, &terminal);

        state.remotes.insert(
            id.clone(),
            Remote {
                address: resource.address.clone(),
                config: resource.config.clone(),
                polls_left,
                terminal,
                deleting: false,
            },
        );
        Ok(Created { id, status })
    }

    fn update(&self, id: &str, resource: &ResolvedResource) -> Result<OperationStatus, ApiError> {
        let mut state = self.lock();
        state.calls.push(ProviderCall::Update(resource.address.clone()));

        if let Some(err) = self.reject_on.get(&resource.address) {
            return Err(err.clone());
        }

        let (polls_left, terminal) = self.outcome_for(&resource.address);
        let remote = state
            .remotes
            .get_mut(id)
            .ok_or_else(|| ApiError::not_found(format!("no resource with id {id}")))?;
        remote.config = resource.config.clone();
        remote.polls_left = polls_left;
        remote.terminal = terminal;
        Ok(Self::initial_status(remote.polls_left, &remote.terminal))
    }

    fn delete(&self, id: &str) -> Result<OperationStatus, ApiError> {
        let mut state = self.lock();
        let address = state
            .remotes
            .get(id)
            .map(|r| r.address.clone())
            .ok_or_else(|| ApiError::not_found(format!("no resource with id {id}")))?;
        state.calls.push(ProviderCall::Delete(address.clone()));

        if let Some(err) = self.reject_on.get(&address) {
            return Err(err.clone());
        }

        let (polls_left, mut terminal) = self.outcome_for(&address);
        if let Some(message) = self.fail_delete_on.get(&address) {
            terminal = OperationStatus::Failed {
                message: message.clone(),
            };
        }
        if polls_left == 0 && terminal == OperationStatus::Succeeded {
            state.remotes.remove(id);
            return Ok(OperationStatus::Succeeded);
        }

        if let Some(remote) = state.remotes.get_mut(id) {
            remote.polls_left = polls_left;
            remote.terminal = terminal.clone();
            // a delete that ends in failure leaves the resource in place
            remote.deleting = terminal == OperationStatus::Succeeded;
        }
        Ok(Self::initial_status(polls_left, &terminal))
    }

    fn get_status(&self, id: &str) -> Result<OperationStatus, ApiError> {
        let mut state = self.lock();
        let Some(remote) = state.remotes.get_mut(id) else {
            return Err(ApiError::not_found(format!("no resource with id {id}")));
        };

        let address = remote.address.clone();
        let status = if remote.polls_left > 0 {
            if remote.polls_left != u32::MAX {
                remote.polls_left -= 1;
            }
            OperationStatus::Pending
        } else {
            remote.terminal.clone()
        };

        let finished_delete = remote.deleting && status == OperationStatus::Succeeded;
        if finished_delete {
            state.remotes.remove(id);
        }
        state.calls.push(ProviderCall::GetStatus(address));

        if finished_delete {
            return Err(ApiError::not_found(format!("{id} was deleted")));
        }
        Ok(status)
    }

    fn immutable_properties(&self, resource_type: &str) -> Vec<String> {
        self.immutable.get(resource_type).cloned().unwrap_or_default()
    }
}
