//! Offline provider backed by a JSON registry file
//!
//! Every call completes synchronously. A resource whose configuration has a
//! `simulate_failure` string fails with that message, which is handy for
//! rehearsing partial applies.

use anyhow::Context;
use chrono::{DateTime, Utc};
use provisionkit::{
    ApiError, Config, Created, OperationStatus, Provider, ResolvedResource, ResourceAddress,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const FAILURE_KEY: &str = "simulate_failure";

/// Registry location for a given state file
pub fn registry_path(state_path: &Path) -> PathBuf {
    state_path.with_extension("registry.json")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LocalResource {
    address: ResourceAddress,
    config: Config,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Registry {
    next_id: u64,
    #[serde(default)]
    resources: BTreeMap<String, LocalResource>,
}

pub struct LocalProvider {
    path: PathBuf,
    registry: Mutex<Registry>,
}

impl LocalProvider {
    pub fn open(path: PathBuf) -> anyhow::Result<Self> {
        let registry = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read registry: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse registry: {}", path.display()))?
        } else {
            Registry::default()
        };
        Ok(Self {
            path,
            registry: Mutex::new(registry),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        match self.registry.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn persist(&self, registry: &Registry) -> Result<(), ApiError> {
        let write = || -> std::io::Result<()> {
            if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
                fs::create_dir_all(dir)?;
            }
            let content = serde_json::to_string_pretty(registry)?;
            fs::write(&self.path, content)
        };
        write().map_err(|e| ApiError::transient(format!("registry write failed: {e}")))
    }

    /// Number of resources currently in the registry
    pub fn resource_count(&self) -> usize {
        self.lock().resources.len()
    }

    fn simulated_failure(config: &Config) -> Option<String> {
        config
            .get(FAILURE_KEY)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }
}

impl Provider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn create(&self, resource: &ResolvedResource) -> Result<Created, ApiError> {
        if let Some(message) = Self::simulated_failure(&resource.config) {
            return Err(ApiError::permanent(message));
        }

        let mut registry = self.lock();
        registry.next_id += 1;
        let id = format!(
            "local://{}/{}/{}",
            resource.address.resource_type(),
            resource.address.name(),
            registry.next_id
        );
        let now = Utc::now();
        registry.resources.insert(
            id.clone(),
            LocalResource {
                address: resource.address.clone(),
                config: resource.config.clone(),
                created_at: now,
                updated_at: now,
            },
        );
        self.persist(&registry)?;
        log::debug!("local: created {} as {}", resource.address, id);

        Ok(Created {
            id,
            status: OperationStatus::Succeeded,
        })
    }

    fn update(&self, id: &str, resource: &ResolvedResource) -> Result<OperationStatus, ApiError> {
        if let Some(message) = Self::simulated_failure(&resource.config) {
            return Ok(OperationStatus::Failed { message });
        }

        let mut registry = self.lock();
        let entry = registry
            .resources
            .get_mut(id)
            .ok_or_else(|| ApiError::not_found(format!("{id} does not exist")))?;
        entry.config = resource.config.clone();
        entry.updated_at = Utc::now();
        self.persist(&registry)?;
        Ok(OperationStatus::Succeeded)
    }

    fn delete(&self, id: &str) -> Result<OperationStatus, ApiError> {
        let mut registry = self.lock();
        if registry.resources.remove(id).is_none() {
            return Err(ApiError::not_found(format!("{id} does not exist")));
        }
        self.persist(&registry)?;
        Ok(OperationStatus::Succeeded)
    }

    fn get_status(&self, id: &str) -> Result<OperationStatus, ApiError> {
        if self.lock().resources.contains_key(id) {
            Ok(OperationStatus::Succeeded)
        } else {
            Err(ApiError::not_found(format!("{id} does not exist")))
        }
    }

    fn immutable_properties(&self, resource_type: &str) -> Vec<String> {
        super::immutable_properties(resource_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolved(address: &str, config: serde_json::Value) -> ResolvedResource {
        let config = serde_json::from_value(config).unwrap();
        ResolvedResource {
            address: ResourceAddress::parse(address).unwrap(),
            config,
        }
    }

    #[test]
    fn test_registry_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reg.json");

        let provider = LocalProvider::open(path.clone()).unwrap();
        let created = provider
            .create(&resolved("azurerm_virtual_network.main", json!({"address_space": ["10.0.0.0/16"]})))
            .unwrap();
        assert_eq!(created.status, OperationStatus::Succeeded);
        assert!(created.id.starts_with("local://azurerm_virtual_network/main/"));

        let reopened = LocalProvider::open(path).unwrap();
        assert_eq!(reopened.resource_count(), 1);
        assert_eq!(reopened.get_status(&created.id).unwrap(), OperationStatus::Succeeded);
    }

    #[test]
    fn test_delete_then_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalProvider::open(dir.path().join("reg.json")).unwrap();
        let created = provider
            .create(&resolved("azurerm_resource_group.main", json!({"location": "westeurope"})))
            .unwrap();

        assert_eq!(provider.delete(&created.id).unwrap(), OperationStatus::Succeeded);
        assert!(provider.get_status(&created.id).unwrap_err().is_not_found());
        assert!(provider.delete(&created.id).unwrap_err().is_not_found());
    }

    #[test]
    fn test_simulated_failure() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalProvider::open(dir.path().join("reg.json")).unwrap();
        let err = provider
            .create(&resolved("azurerm_service_plan.logic", json!({"simulate_failure": "quota exceeded"})))
            .unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(provider.resource_count(), 0);
    }

    #[test]
    fn test_registry_path() {
        assert_eq!(
            registry_path(Path::new("/tmp/stackplan.tfstate.json")),
            PathBuf::from("/tmp/stackplan.tfstate.registry.json")
        );
    }
}
