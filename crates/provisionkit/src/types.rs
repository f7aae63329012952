//! Core types for declarative provisioning

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Identity of a declared resource: `<type>.<name>`
///
/// Serialized as the dotted string so it can be used as a map key in
/// state files and as an entry in `depends_on` lists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceAddress {
    resource_type: String,
    name: String,
}

impl ResourceAddress {
    /// Create an address from its parts
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }

    /// Parse a dotted address like `azurerm_subnet.ase`
    pub fn parse(s: &str) -> Result<Self> {
        let (resource_type, name) = s
            .split_once('.')
            .ok_or_else(|| Error::InvalidAddress(s.to_string()))?;

        if !is_identifier(resource_type) || !is_identifier(name) {
            return Err(Error::InvalidAddress(s.to_string()));
        }

        Ok(Self::new(resource_type, name))
    }

    /// Resource type, e.g. `azurerm_virtual_network`
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// Symbolic name within the type
    pub fn name(&self) -> &str {
        &self.name
    }
}

pub(crate) fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.name)
    }
}

impl TryFrom<String> for ResourceAddress {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ResourceAddress> for String {
    fn from(addr: ResourceAddress) -> Self {
        addr.to_string()
    }
}

/// Lifecycle of a resource within one plan/apply cycle
///
/// ```text
/// Unplanned → Planned → InProgress → Ready | Failed
///                 └──→ Ready    (already provisioned, nothing to do)
///                 └──→ Skipped  (blocked by a failed dependency or cancellation)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningState {
    #[default]
    Unplanned,
    Planned,
    InProgress,
    Ready,
    Failed,
    Skipped,
}

impl ProvisioningState {
    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(self, next: Self) -> bool {
        use ProvisioningState::{Failed, InProgress, Planned, Ready, Skipped, Unplanned};
        matches!(
            (self, next),
            (Unplanned, Planned)
                | (Planned, InProgress | Ready | Skipped)
                | (InProgress, Ready | Failed)
        )
    }

    /// Terminal states never change again within a cycle
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unplanned => "unplanned",
            Self::Planned => "planned",
            Self::InProgress => "in-progress",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Status reported by the external API for a long-running operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationStatus {
    Pending,
    Succeeded,
    Failed { message: String },
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Result of provisioning or tearing down a single resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplyResult {
    /// Already matched the declared configuration
    NoChange,
    /// Resource was created
    Created { id: String },
    /// Resource was updated in place
    Updated,
    /// Resource was deleted and recreated
    Replaced { id: String },
    /// Resource was deleted
    Deleted,
    /// Operation failed
    Failed { error: String },
    /// Operation was not attempted
    Skipped { reason: String },
}

impl ApplyResult {
    /// Check if the result represents success (no failure)
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    /// Check if the result represents a change
    pub fn is_change(&self) -> bool {
        matches!(
            self,
            Self::Created { .. } | Self::Updated | Self::Replaced { .. } | Self::Deleted
        )
    }
}

/// Summary counts of an execution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteSummary {
    pub created: usize,
    pub updated: usize,
    pub replaced: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub failed: usize,
    pub no_change: usize,
}

impl ExecuteSummary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.replaced + self.deleted
    }

    /// Check if execution was fully successful (no failures)
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Total number of resources processed
    pub fn total(&self) -> usize {
        self.total_changes() + self.skipped + self.failed + self.no_change
    }

    /// Add a result to the summary
    pub fn add_result(&mut self, result: &ApplyResult) {
        match result {
            ApplyResult::NoChange => self.no_change += 1,
            ApplyResult::Created { .. } => self.created += 1,
            ApplyResult::Updated => self.updated += 1,
            ApplyResult::Replaced { .. } => self.replaced += 1,
            ApplyResult::Deleted => self.deleted += 1,
            ApplyResult::Failed { .. } => self.failed += 1,
            ApplyResult::Skipped { .. } => self.skipped += 1,
        }
    }
}

/// Final report of an apply or destroy run
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    /// Per-resource results in completion order
    pub results: Vec<(ResourceAddress, ApplyResult)>,
    /// Final lifecycle state of every resource touched by the run
    pub states: BTreeMap<ResourceAddress, ProvisioningState>,
    /// Whether dispatch was halted by a cancellation request
    pub cancelled: bool,
}

impl ExecutionReport {
    pub(crate) fn record(&mut self, address: ResourceAddress, result: ApplyResult) {
        self.results.push((address, result));
    }

    /// Latest result recorded for an address
    pub fn result_for(&self, address: &ResourceAddress) -> Option<&ApplyResult> {
        self.results
            .iter()
            .rev()
            .find(|(a, _)| a == address)
            .map(|(_, r)| r)
    }

    /// Lifecycle state of an address at the end of the run
    pub fn state_of(&self, address: &ResourceAddress) -> ProvisioningState {
        self.states.get(address).copied().unwrap_or_default()
    }

    fn with_state(&self, state: ProvisioningState) -> Vec<&ResourceAddress> {
        self.states
            .iter()
            .filter(|(_, s)| **s == state)
            .map(|(a, _)| a)
            .collect()
    }

    pub fn ready(&self) -> Vec<&ResourceAddress> {
        self.with_state(ProvisioningState::Ready)
    }

    pub fn failed(&self) -> Vec<&ResourceAddress> {
        self.with_state(ProvisioningState::Failed)
    }

    pub fn skipped(&self) -> Vec<&ResourceAddress> {
        self.with_state(ProvisioningState::Skipped)
    }

    /// Summary counts over all results
    pub fn summary(&self) -> ExecuteSummary {
        let mut summary = ExecuteSummary::default();
        for (_, result) in &self.results {
            summary.add_result(result);
        }
        summary
    }

    /// True when no resource failed
    pub fn is_success(&self) -> bool {
        self.results.iter().all(|(_, r)| r.is_success())
    }

    /// Convert a report with failures into a `ProvisioningFailure`
    pub fn into_result(self) -> Result<Self> {
        let first_failure = self.results.iter().find_map(|(address, result)| match result {
            ApplyResult::Failed { error } => Some((address.clone(), error.clone())),
            _ => None,
        });

        match first_failure {
            Some((address, message)) => Err(Error::ProvisioningFailure { address, message }),
            None => Ok(self),
        }
    }
}

/// Options for execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Don't make changes, just report what would happen
    pub dry_run: bool,
    /// Number of parallel workers per ready set
    pub jobs: usize,
    /// Default per-resource timeout (descriptors may override)
    pub timeout: Duration,
    /// Delay between status polls of a pending operation
    pub poll_interval: Duration,
    /// Stop dispatching new ready sets after the first failure
    pub halt_on_failure: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            jobs: 4,
            timeout: Duration::from_secs(30 * 60),
            poll_interval: Duration::from_secs(2),
            halt_on_failure: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        let addr = ResourceAddress::parse("azurerm_subnet.ase").unwrap();
        assert_eq!(addr.resource_type(), "azurerm_subnet");
        assert_eq!(addr.name(), "ase");
        assert_eq!(addr.to_string(), "azurerm_subnet.ase");
    }

    #[test]
    fn test_parse_address_rejects_malformed() {
        assert!(ResourceAddress::parse("no_dot").is_err());
        assert!(ResourceAddress::parse(".name").is_err());
        assert!(ResourceAddress::parse("type.").is_err());
        assert!(ResourceAddress::parse("a.b.c").is_err());
        assert!(ResourceAddress::parse("a b.c").is_err());
    }

    #[test]
    fn test_address_serializes_as_string() {
        let addr = ResourceAddress::new("azurerm_resource_group", "main");
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"azurerm_resource_group.main\"");

        let back: ResourceAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
        assert!(serde_json::from_str::<ResourceAddress>("\"broken\"").is_err());
    }

    #[test]
    fn test_state_transitions() {
        use ProvisioningState::*;
        assert!(Unplanned.can_transition_to(Planned));
        assert!(Planned.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Ready));
        assert!(InProgress.can_transition_to(Failed));
        assert!(Planned.can_transition_to(Skipped));

        assert!(!Unplanned.can_transition_to(InProgress));
        assert!(!Failed.can_transition_to(Ready));
        assert!(!Ready.can_transition_to(InProgress));
        assert!(!InProgress.can_transition_to(Skipped));
    }

    #[test]
    fn test_report_into_result() {
        let mut report = ExecutionReport::default();
        let a = ResourceAddress::new("t", "a");
        report.record(a.clone(), ApplyResult::Created { id: "1".into() });
        assert!(report.clone().into_result().is_ok());

        report.record(
            ResourceAddress::new("t", "b"),
            ApplyResult::Failed {
                error: "quota exceeded".into(),
            },
        );
        let err = report.into_result().unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = ExecuteSummary::default();
        summary.add_result(&ApplyResult::Created { id: "x".into() });
        summary.add_result(&ApplyResult::Updated);
        summary.add_result(&ApplyResult::NoChange);
        summary.add_result(&ApplyResult::Skipped {
            reason: "blocked".into(),
        });
        assert_eq!(summary.total_changes(), 2);
        assert_eq!(summary.total(), 4);
        assert!(summary.is_success());
    }
}
