//! End-to-end apply runs against the in-memory provider

use provisionkit::{
    Action, ApiError, ApplyResult, CancelToken, Created, DescriptorStore, Error, ExecuteOptions,
    ExecutionReport, Executor, MemoryProvider, OperationStatus, PlanGraph, Provider, ProviderCall,
    ProvisioningState, ReplaceReason, ResolvedResource, ResourceAddress, ResourceDescriptor,
    StateSnapshot, reconcile,
};
use serde_json::json;
use std::collections::BTreeSet;
use std::time::Duration;

fn addr(s: &str) -> ResourceAddress {
    ResourceAddress::parse(s).unwrap()
}

fn fast() -> ExecuteOptions {
    ExecuteOptions {
        timeout: Duration::from_secs(5),
        poll_interval: Duration::from_millis(1),
        ..Default::default()
    }
}

fn apply_with(
    descriptors: Vec<ResourceDescriptor>,
    provider: &dyn Provider,
    state: &mut StateSnapshot,
    executor: Executor<'_>,
) -> ExecutionReport {
    let store = DescriptorStore::from_descriptors(descriptors).unwrap();
    let graph = PlanGraph::build(&store).unwrap();
    let plan = reconcile(&store, &graph, state, provider);
    executor.apply(&store, &graph, &plan, state).unwrap()
}

fn apply(
    descriptors: Vec<ResourceDescriptor>,
    provider: &dyn Provider,
    state: &mut StateSnapshot,
) -> ExecutionReport {
    apply_with(descriptors, provider, state, Executor::new(provider, fast()))
}

/// A (no deps), B and C depend on A, D depends on B and C
fn diamond() -> Vec<ResourceDescriptor> {
    vec![
        ResourceDescriptor::new("t", "a"),
        ResourceDescriptor::new("t", "b").with("parent", "${t.a}"),
        ResourceDescriptor::new("t", "c").with("parent", "${t.a.id}"),
        ResourceDescriptor::new("t", "d")
            .depends_on(addr("t.b"))
            .depends_on(addr("t.c")),
    ]
}

fn created_order(provider: &MemoryProvider) -> Vec<ResourceAddress> {
    provider
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            ProviderCall::Create(a) => Some(a),
            _ => None,
        })
        .collect()
}

#[test]
fn test_diamond_applies_in_ready_sets() {
    let provider = MemoryProvider::new();
    let mut state = StateSnapshot::default();
    let report = apply(diamond(), &provider, &mut state);

    assert!(report.is_success());
    assert_eq!(report.summary().created, 4);

    let order = created_order(&provider);
    assert_eq!(order.first(), Some(&addr("t.a")));
    assert_eq!(order.last(), Some(&addr("t.d")));
    assert_eq!(state.len(), 4);
    assert_eq!(
        state.get(&addr("t.d")).unwrap().depends_on,
        vec![addr("t.b"), addr("t.c")]
    );
}

#[test]
fn test_failure_skips_only_dependents() {
    let provider = MemoryProvider::new().fail_on(addr("t.b"), "quota exceeded");
    let mut state = StateSnapshot::default();
    let report = apply(diamond(), &provider, &mut state);

    assert!(!report.is_success());
    assert_eq!(report.state_of(&addr("t.a")), ProvisioningState::Ready);
    assert_eq!(report.state_of(&addr("t.b")), ProvisioningState::Failed);
    assert_eq!(report.state_of(&addr("t.c")), ProvisioningState::Ready);
    assert_eq!(report.state_of(&addr("t.d")), ProvisioningState::Skipped);
    assert!(!created_order(&provider).contains(&addr("t.d")));

    assert_eq!(
        report.result_for(&addr("t.b")),
        Some(&ApplyResult::Failed {
            error: "quota exceeded".into()
        })
    );

    let err = report.into_result().unwrap_err();
    assert!(matches!(err, Error::ProvisioningFailure { ref address, .. } if *address == addr("t.b")));

    // The accepted-but-failed resource is recorded as tainted
    assert_eq!(
        state.get(&addr("t.b")).unwrap().status,
        ProvisioningState::Failed
    );
    assert!(!state.contains(&addr("t.d")));
}

#[test]
fn test_rerun_after_failure_only_touches_unresolved() {
    let failing = MemoryProvider::new().fail_on(addr("t.b"), "quota exceeded");
    let mut state = StateSnapshot::default();
    apply(diamond(), &failing, &mut state);

    let healthy = MemoryProvider::new();
    let store = DescriptorStore::from_descriptors(diamond()).unwrap();
    let graph = PlanGraph::build(&store).unwrap();
    let plan = reconcile(&store, &graph, &state, &healthy);
    assert_eq!(plan.action(&addr("t.a")), Some(&Action::NoOp));
    assert_eq!(plan.action(&addr("t.c")), Some(&Action::NoOp));
    assert_eq!(
        plan.action(&addr("t.b")),
        Some(&Action::Replace {
            reason: ReplaceReason::Tainted
        })
    );
    assert_eq!(plan.action(&addr("t.d")), Some(&Action::Create));

    let report = Executor::new(&healthy, fast())
        .apply(&store, &graph, &plan, &mut state)
        .unwrap();
    assert!(report.is_success());
    assert!(matches!(
        report.result_for(&addr("t.b")),
        Some(ApplyResult::Replaced { .. })
    ));
    assert_eq!(created_order(&healthy), vec![addr("t.b"), addr("t.d")]);
    assert!(
        state
            .resources
            .values()
            .all(|r| r.status == ProvisioningState::Ready)
    );
}

#[test]
fn test_reapply_is_idempotent() {
    let provider = MemoryProvider::new();
    let mut state = StateSnapshot::default();
    apply(diamond(), &provider, &mut state);
    let mutations = provider.mutation_count();

    let report = apply(diamond(), &provider, &mut state);
    assert_eq!(provider.mutation_count(), mutations);
    assert_eq!(report.summary().no_change, 4);
    assert_eq!(report.summary().total_changes(), 0);
}

#[test]
fn test_cycle_aborts_before_any_call() {
    let store = DescriptorStore::from_descriptors(vec![
        ResourceDescriptor::new("t", "a").with("x", "${t.b}"),
        ResourceDescriptor::new("t", "b").with("x", "${t.a}"),
    ])
    .unwrap();
    let err = PlanGraph::build(&store).unwrap_err();
    assert!(err.is_configuration_error());
    assert!(err.to_string().contains("t.a"));
}

#[test]
fn test_immutable_change_replaces_chain_in_order() {
    let provider = MemoryProvider::new().with_immutable("vnet", &["address_space"]);
    let chain = |space: &str| {
        vec![
            ResourceDescriptor::new("vnet", "main").with("address_space", json!([space])),
            ResourceDescriptor::new("subnet", "ase").with("vnet_id", "${vnet.main.id}"),
            ResourceDescriptor::new("ase", "env").with("subnet_id", "${subnet.ase.id}"),
        ]
    };

    let mut state = StateSnapshot::default();
    apply(chain("10.0.0.0/16"), &provider, &mut state);
    let old_subnet = state.get(&addr("subnet.ase")).unwrap().id.clone();
    let before = provider.calls().len();

    let report = apply(chain("10.1.0.0/16"), &provider, &mut state);
    assert!(report.is_success());
    assert_eq!(report.summary().replaced, 3);

    let calls: Vec<ProviderCall> = provider.calls()[before..].to_vec();
    assert_eq!(
        calls,
        vec![
            ProviderCall::Delete(addr("ase.env")),
            ProviderCall::Delete(addr("subnet.ase")),
            ProviderCall::Delete(addr("vnet.main")),
            ProviderCall::Create(addr("vnet.main")),
            ProviderCall::Create(addr("subnet.ase")),
            ProviderCall::Create(addr("ase.env")),
        ]
    );

    let new_subnet = state.get(&addr("subnet.ase")).unwrap().id.clone();
    assert_ne!(old_subnet, new_subnet);
    assert_eq!(
        provider.live_resources()[&addr("ase.env")]["subnet_id"],
        json!(new_subnet)
    );
}

#[test]
fn test_mutable_change_updates_in_place() {
    let provider = MemoryProvider::new();
    let mut state = StateSnapshot::default();
    apply(
        vec![ResourceDescriptor::new("plan", "asp").with("tags", json!({"env": "dev"}))],
        &provider,
        &mut state,
    );
    let id = state.get(&addr("plan.asp")).unwrap().id.clone();

    let report = apply(
        vec![ResourceDescriptor::new("plan", "asp").with("tags", json!({"env": "prod"}))],
        &provider,
        &mut state,
    );
    assert_eq!(report.result_for(&addr("plan.asp")), Some(&ApplyResult::Updated));
    assert_eq!(state.get(&addr("plan.asp")).unwrap().id, id);
    assert_eq!(
        provider.live_resources()[&addr("plan.asp")]["tags"],
        json!({"env": "prod"})
    );
}

#[test]
fn test_removed_resource_is_deleted() {
    let provider = MemoryProvider::new();
    let mut state = StateSnapshot::default();
    apply(
        vec![
            ResourceDescriptor::new("rg", "main"),
            ResourceDescriptor::new("kv", "secrets").with("rg", "${rg.main}"),
        ],
        &provider,
        &mut state,
    );

    let report = apply(vec![ResourceDescriptor::new("rg", "main")], &provider, &mut state);
    assert_eq!(report.result_for(&addr("kv.secrets")), Some(&ApplyResult::Deleted));
    assert!(!state.contains(&addr("kv.secrets")));
    assert_eq!(provider.live_resources().len(), 1);
}

fn mutations(provider: &MemoryProvider) -> Vec<ProviderCall> {
    provider
        .calls()
        .into_iter()
        .filter(ProviderCall::is_mutation)
        .collect()
}

fn nsg_and_subnet() -> Vec<ResourceDescriptor> {
    vec![
        ResourceDescriptor::new("nsg", "a"),
        ResourceDescriptor::new("subnet", "s").with("nsg_id", "${nsg.a}"),
    ]
}

#[test]
fn test_removed_resource_waits_for_dependent_update() {
    let provider = MemoryProvider::new();
    let mut state = StateSnapshot::default();
    apply(nsg_and_subnet(), &provider, &mut state);
    let before = mutations(&provider).len();

    let report = apply(
        vec![ResourceDescriptor::new("subnet", "s").with("nsg_id", "none")],
        &provider,
        &mut state,
    );
    assert!(report.is_success());
    assert_eq!(
        mutations(&provider)[before..],
        [
            ProviderCall::Update(addr("subnet.s")),
            ProviderCall::Delete(addr("nsg.a")),
        ]
    );
    assert!(!state.contains(&addr("nsg.a")));
    assert!(state.get(&addr("subnet.s")).unwrap().depends_on.is_empty());
}

#[test]
fn test_removed_resource_kept_while_still_referenced() {
    let provider = MemoryProvider::new();
    let mut state = StateSnapshot::default();
    apply(nsg_and_subnet(), &provider, &mut state);

    let rejecting = MemoryProvider::new()
        .reject_on(addr("subnet.s"), ApiError::permanent("subnet is in use"));
    let report = apply(
        vec![ResourceDescriptor::new("subnet", "s").with("nsg_id", "none")],
        &rejecting,
        &mut state,
    );

    assert_eq!(report.state_of(&addr("subnet.s")), ProvisioningState::Failed);
    assert_eq!(report.state_of(&addr("nsg.a")), ProvisioningState::Skipped);
    assert_eq!(
        report.result_for(&addr("nsg.a")),
        Some(&ApplyResult::Skipped {
            reason: "still referenced by subnet.s".into()
        })
    );
    assert!(!mutations(&rejecting).contains(&ProviderCall::Delete(addr("nsg.a"))));
    assert!(state.contains(&addr("nsg.a")));
}

#[test]
fn test_untargeted_resource_is_not_marked_ready() {
    let provider = MemoryProvider::new();
    let mut state = StateSnapshot::default();
    let store = DescriptorStore::from_descriptors(vec![
        ResourceDescriptor::new("rg", "a"),
        ResourceDescriptor::new("kv", "b"),
        ResourceDescriptor::new("secret", "c").with("vault", "${kv.b}"),
    ])
    .unwrap();
    let graph = PlanGraph::build(&store).unwrap();
    let plan = reconcile(&store, &graph, &state, &provider)
        .restrict_to(&graph, &BTreeSet::from([addr("rg.a")]));

    let report = Executor::new(&provider, fast())
        .apply(&store, &graph, &plan, &mut state)
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.state_of(&addr("rg.a")), ProvisioningState::Ready);
    for untouched in ["kv.b", "secret.c"] {
        assert_eq!(report.state_of(&addr(untouched)), ProvisioningState::Skipped);
        assert_eq!(
            report.result_for(&addr(untouched)),
            Some(&ApplyResult::Skipped {
                reason: "not targeted".into()
            })
        );
        assert!(!state.contains(&addr(untouched)));
    }
    assert_eq!(created_order(&provider), vec![addr("rg.a")]);
}

#[test]
fn test_timeout_counts_as_failure() {
    let provider = MemoryProvider::new().hang_on(addr("t.b"));
    let mut state = StateSnapshot::default();
    let opts = ExecuteOptions {
        timeout: Duration::from_millis(30),
        poll_interval: Duration::from_millis(2),
        ..Default::default()
    };
    let report = apply_with(diamond(), &provider, &mut state, Executor::new(&provider, opts));

    assert_eq!(report.state_of(&addr("t.b")), ProvisioningState::Failed);
    assert_eq!(report.state_of(&addr("t.c")), ProvisioningState::Ready);
    assert_eq!(report.state_of(&addr("t.d")), ProvisioningState::Skipped);
    match report.result_for(&addr("t.b")) {
        Some(ApplyResult::Failed { error }) => {
            assert!(error.contains("did not reach a terminal state"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn test_transient_api_error_is_surfaced() {
    let provider = MemoryProvider::new().reject_on(addr("t.a"), ApiError::from_status(503, "busy"));
    let mut state = StateSnapshot::default();
    let report = apply(diamond(), &provider, &mut state);

    assert_eq!(report.failed(), vec![&addr("t.a")]);
    assert_eq!(report.skipped().len(), 3);
    match report.result_for(&addr("t.a")) {
        Some(ApplyResult::Failed { error }) => assert!(error.contains("503")),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(state.is_empty());
}

/// Cancels a token as soon as a given resource is created
struct CancelOnCreate {
    inner: MemoryProvider,
    trigger: ResourceAddress,
    token: CancelToken,
}

impl Provider for CancelOnCreate {
    fn name(&self) -> &str {
        "cancel-on-create"
    }

    fn create(&self, resource: &ResolvedResource) -> Result<Created, ApiError> {
        if resource.address == self.trigger {
            self.token.cancel();
        }
        self.inner.create(resource)
    }

    fn update(&self, id: &str, resource: &ResolvedResource) -> Result<OperationStatus, ApiError> {
        self.inner.update(id, resource)
    }

    fn delete(&self, id: &str) -> Result<OperationStatus, ApiError> {
        self.inner.delete(id)
    }

    fn get_status(&self, id: &str) -> Result<OperationStatus, ApiError> {
        self.inner.get_status(id)
    }
}

#[test]
fn test_cancel_lets_in_flight_finish() {
    let token = CancelToken::new();
    let provider = CancelOnCreate {
        inner: MemoryProvider::new().pending_polls(2),
        trigger: addr("t.a"),
        token: token.clone(),
    };
    let mut state = StateSnapshot::default();
    let executor = Executor::new(&provider, fast()).with_cancel(token);
    let report = apply_with(diamond(), &provider, &mut state, executor);

    assert!(report.cancelled);
    assert_eq!(report.state_of(&addr("t.a")), ProvisioningState::Ready);
    assert_eq!(report.skipped().len(), 3);
    assert_eq!(state.len(), 1);
}

#[test]
fn test_halt_on_failure_stops_dispatch() {
    let provider = MemoryProvider::new().fail_on(addr("t.a"), "boom");
    let descriptors = vec![
        ResourceDescriptor::new("t", "a"),
        ResourceDescriptor::new("t", "x"),
        ResourceDescriptor::new("t", "y").with("after", "${t.x}"),
    ];
    let mut state = StateSnapshot::default();
    let opts = ExecuteOptions {
        halt_on_failure: true,
        ..fast()
    };
    let report = apply_with(descriptors, &provider, &mut state, Executor::new(&provider, opts));

    assert!(report.cancelled);
    assert_eq!(report.state_of(&addr("t.x")), ProvisioningState::Ready);
    assert_eq!(report.state_of(&addr("t.y")), ProvisioningState::Skipped);
}
