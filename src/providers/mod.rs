//! Provider backends selected by `settings.provider`

pub mod azure;
pub mod local;

use crate::config::{ProviderKind, Settings};
use anyhow::Result;
use provisionkit::Provider;
use std::path::Path;

pub use azure::AzureProvider;
pub use local::LocalProvider;

/// Build the provider for a stack; `state_path` places the local registry
pub fn build(
    kind: ProviderKind,
    settings: &Settings,
    state_path: &Path,
) -> Result<Box<dyn Provider>> {
    let provider: Box<dyn Provider> = match kind {
        ProviderKind::Azure => Box::new(AzureProvider::new(settings.azure.clone())),
        ProviderKind::Local => Box::new(LocalProvider::open(local::registry_path(state_path))?),
    };
    log::debug!("Using provider {}", provider.name());
    Ok(provider)
}

/// Properties azurerm forces a replacement for, by resource type
///
/// Shared by both backends so a local dry run plans the same replacements.
pub fn immutable_properties(resource_type: &str) -> Vec<String> {
    let keys: &[&str] = match resource_type {
        "azurerm_resource_group" => &["location"],
        "azurerm_virtual_network" => &["location", "resource_group_name"],
        "azurerm_subnet" => &["parent", "virtual_network_name", "resource_group_name"],
        "azurerm_app_service_environment_v3" => &[
            "location",
            "subnet_id",
            "internal_load_balancing_mode",
            "zone_redundant",
        ],
        "azurerm_service_plan" => &["location", "os_type", "app_service_environment_id"],
        "azurerm_storage_account" => &["location", "account_kind", "account_tier", "kind"],
        "azurerm_logic_app_standard" => &["location", "storage_account_name"],
        "azurerm_key_vault" => &["location", "tenant_id"],
        "azurerm_user_assigned_identity" => &["location"],
        "azurerm_role_assignment" => &["scope", "role_definition_name", "principal_id"],
        _ => &["location"],
    };
    keys.iter().map(|k| (*k).to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_immutable_properties() {
        let ase = immutable_properties("azurerm_app_service_environment_v3");
        assert!(ase.contains(&"subnet_id".to_string()));
        assert_eq!(immutable_properties("custom_thing"), vec!["location"]);
    }

    #[test]
    fn test_build_local() {
        let dir = tempfile::tempdir().unwrap();
        let provider = build(
            ProviderKind::Local,
            &Settings::default(),
            &dir.path().join("stackplan.tfstate.json"),
        )
        .unwrap();
        assert_eq!(provider.name(), "local");
    }
}
