//! Destroy runs: reverse ordering, targeted teardown, failure handling

use provisionkit::{
    ApplyResult, DescriptorStore, Error, ExecuteOptions, Executor, MemoryProvider, PlanGraph,
    ProviderCall, ProvisioningState, ResourceAddress, ResourceDescriptor, StateSnapshot,
    destroy_order, ready_sets, reconcile,
};
use std::collections::{BTreeSet, HashMap};
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

/// Logic App on an App Service Environment, trimmed to its dependency shape
fn logic_app_stack() -> Vec<ResourceDescriptor> {
    vec![
        ResourceDescriptor::new("azurerm_resource_group", "main").with("location", "westeurope"),
        ResourceDescriptor::new("azurerm_virtual_network", "main")
            .with("resource_group_name", "${azurerm_resource_group.main.name}"),
        ResourceDescriptor::new("azurerm_subnet", "ase")
            .with("virtual_network_name", "${azurerm_virtual_network.main.name}"),
        ResourceDescriptor::new("azurerm_app_service_environment_v3", "ase")
            .with("subnet_id", "${azurerm_subnet.ase.id}"),
        ResourceDescriptor::new("azurerm_storage_account", "logic")
            .with("resource_group_name", "${azurerm_resource_group.main.name}"),
        ResourceDescriptor::new("azurerm_service_plan", "logic")
            .with("app_service_environment_id", "${azurerm_app_service_environment_v3.ase.id}"),
        ResourceDescriptor::new("azurerm_logic_app_standard", "main")
            .with("app_service_plan_id", "${azurerm_service_plan.logic.id}")
            .with("storage_account_name", "${azurerm_storage_account.logic.name}"),
    ]
}

fn provisioned(provider: &MemoryProvider) -> StateSnapshot {
    let store = DescriptorStore::from_descriptors(logic_app_stack()).unwrap();
    let graph = PlanGraph::build(&store).unwrap();
    let mut state = StateSnapshot::default();
    let plan = reconcile(&store, &graph, &state, provider);
    Executor::new(provider, fast())
        .apply(&store, &graph, &plan, &mut state)
        .unwrap()
        .into_result()
        .unwrap();
    state
}

fn deleted_order(provider: &MemoryProvider) -> Vec<ResourceAddress> {
    provider
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            ProviderCall::Delete(a) => Some(a),
            _ => None,
        })
        .collect()
}

/// Every recorded dependency appears later in `order` than its dependent
fn assert_dependents_first(state: &StateSnapshot, order: &[ResourceAddress]) {
    let position: HashMap<&ResourceAddress, usize> =
        order.iter().enumerate().map(|(i, a)| (a, i)).collect();
    for (address, record) in &state.resources {
        for dep in &record.depends_on {
            assert!(
                position[address] < position[dep],
                "{address} must be deleted before {dep}"
            );
        }
    }
}

#[test]
fn test_destroy_order_reverses_creation_order() {
    let provider = MemoryProvider::new();
    let state = provisioned(&provider);

    let mut creation = ready_sets(&state.graph().unwrap()).concat();
    creation.reverse();
    assert_eq!(destroy_order(&state).unwrap().concat(), creation);
}

#[test]
fn test_destroy_everything() {
    let provider = MemoryProvider::new();
    let mut state = provisioned(&provider);
    let recorded = state.clone();

    let report = Executor::new(&provider, fast()).destroy(&mut state, None).unwrap();

    assert!(report.is_success());
    assert_eq!(report.summary().deleted, 7);
    assert!(state.is_empty());
    assert!(provider.live_resources().is_empty());
    assert_dependents_first(&recorded, &deleted_order(&provider));
}

#[test]
fn test_destroy_with_pending_deletes() {
    let provider = MemoryProvider::new().pending_polls(2);
    let mut state = provisioned(&provider);

    let report = Executor::new(&provider, fast()).destroy(&mut state, None).unwrap();
    assert!(report.is_success());
    assert!(state.is_empty());
    assert!(provider.live_resources().is_empty());
}

#[test]
fn test_targeted_destroy_with_dependents_fails_fast() {
    let provider = MemoryProvider::new();
    let mut state = provisioned(&provider);
    let calls_before = provider.calls().len();

    let targets = BTreeSet::from([addr("azurerm_subnet.ase")]);
    let err = Executor::new(&provider, fast())
        .destroy(&mut state, Some(&targets))
        .unwrap_err();

    match err {
        Error::DependencyStillPresent {
            resource,
            dependents,
        } => {
            assert_eq!(resource, addr("azurerm_subnet.ase"));
            assert_eq!(
                dependents,
                vec![addr("azurerm_app_service_environment_v3.ase")]
            );
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(provider.calls().len(), calls_before);
    assert_eq!(state.len(), 7);
}

#[test]
fn test_targeted_destroy_of_leaf() {
    let provider = MemoryProvider::new();
    let mut state = provisioned(&provider);

    let targets = BTreeSet::from([
        addr("azurerm_logic_app_standard.main"),
        addr("azurerm_storage_account.logic"),
    ]);
    let report = Executor::new(&provider, fast())
        .destroy(&mut state, Some(&targets))
        .unwrap();

    assert_eq!(report.summary().deleted, 2);
    assert_eq!(
        deleted_order(&provider),
        vec![
            addr("azurerm_logic_app_standard.main"),
            addr("azurerm_storage_account.logic"),
        ]
    );
    assert_eq!(state.len(), 5);
}

#[test]
fn test_failed_delete_keeps_dependencies() {
    let flaky =
        MemoryProvider::new().fail_delete_on(addr("azurerm_service_plan.logic"), "plan in use");
    let mut state = provisioned(&flaky);
    let report = Executor::new(&flaky, fast()).destroy(&mut state, None).unwrap();

    assert!(!report.is_success());
    assert_eq!(
        report.state_of(&addr("azurerm_service_plan.logic")),
        ProvisioningState::Failed
    );
    assert_eq!(
        report.state_of(&addr("azurerm_logic_app_standard.main")),
        ProvisioningState::Ready
    );
    for skipped in [
        "azurerm_app_service_environment_v3.ase",
        "azurerm_subnet.ase",
        "azurerm_virtual_network.main",
        "azurerm_resource_group.main",
    ] {
        assert_eq!(report.state_of(&addr(skipped)), ProvisioningState::Skipped);
    }
    assert_eq!(
        report.result_for(&addr("azurerm_storage_account.logic")),
        Some(&ApplyResult::Deleted)
    );
    assert_eq!(
        state.get(&addr("azurerm_service_plan.logic")).unwrap().status,
        ProvisioningState::Failed
    );
    assert_eq!(state.len(), 5);
}

#[test]
fn test_dry_run_destroy_makes_no_calls() {
    let provider = MemoryProvider::new();
    let mut state = provisioned(&provider);
    let calls_before = provider.calls().len();

    let opts = ExecuteOptions {
        dry_run: true,
        ..fast()
    };
    let report = Executor::new(&provider, opts).destroy(&mut state, None).unwrap();
    assert_eq!(provider.calls().len(), calls_before);
    assert_eq!(report.states.len(), 7);
    assert_eq!(state.len(), 7);
}
