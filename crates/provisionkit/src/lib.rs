//! # Provisionkit
//!
//! Engine for declarative infrastructure provisioning.
//!
//! Resource descriptors declare the desired configuration of remote
//! resources and reference each other by address. The engine resolves those
//! references into a dependency DAG, diffs it against the last-applied
//! state, and drives an external API to converge, with forward-only
//! semantics and no automatic rollback.
//!
//! ## Core Concepts
//!
//! - **ResourceDescriptor**: type, name, configuration, dependencies
//! - **PlanGraph**: the resolved DAG; cycles are rejected up front
//! - **Scheduler**: Kahn's algorithm, emitting sets of resources that may run concurrently
//! - **Reconciliation**: `Create`, `Update`, `Replace`, `Delete` or `NoOp` per resource
//! - **Executor**: runs ready sets on a bounded pool, skipping dependents of failures
//! - **Provider**: the create/update/delete/status contract of the outside world
//!
//! ## Example
//!
//! ```
//! use provisionkit::{
//!     DescriptorStore, ExecuteOptions, Executor, MemoryProvider, PlanGraph,
//!     ResourceDescriptor, StateSnapshot, reconcile,
//! };
//!
//! let store = DescriptorStore::from_descriptors(vec![
//!     ResourceDescriptor::new("azurerm_resource_group", "main").with("location", "westeurope"),
//!     ResourceDescriptor::new("azurerm_virtual_network", "main")
//!         .with("resource_group_name", "${azurerm_resource_group.main.name}"),
//! ])?;
//! let graph = PlanGraph::build(&store)?;
//!
//! let provider = MemoryProvider::new();
//! let mut state = StateSnapshot::default();
//! let plan = reconcile(&store, &graph, &state, &provider);
//!
//! let report = Executor::new(&provider, ExecuteOptions::default())
//!     .apply(&store, &graph, &plan, &mut state)?;
//! assert!(report.is_success());
//! assert_eq!(state.len(), 2);
//! # Ok::<(), provisionkit::Error>(())
//! ```

pub mod context;
pub mod descriptor;
pub mod destroy;
pub mod error;
pub mod executor;
pub mod graph;
pub mod provider;
pub mod reconcile;
pub mod scheduler;
pub mod state;
pub mod types;

pub use context::{CancelToken, NoProgress, Operation, ProgressCallback};
pub use descriptor::{Config, DescriptorStore, Reference, ResourceDescriptor};
pub use destroy::destroy_order;
pub use error::{ApiError, ApiErrorKind, Error, Result};
pub use executor::Executor;
pub use graph::{DependencyEdge, PlanGraph};
pub use provider::{Created, MemoryProvider, Provider, ProviderCall, ResolvedResource};
pub use reconcile::{Action, ChangeSummary, Reconciliation, ReplaceReason, changed_keys, reconcile};
pub use scheduler::{Scheduler, ready_sets, teardown_sets};
pub use state::{ResourceRecord, STATE_VERSION, StateSnapshot};
pub use types::{
    ApplyResult, ExecuteOptions, ExecuteSummary, ExecutionReport, OperationStatus,
    ProvisioningState, ResourceAddress,
};
