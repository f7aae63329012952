//! Last-known state of provisioned resources
//!
//! The snapshot is pure data; reading and writing it to disk is left to
//! the caller.

use crate::descriptor::{Config, ResourceDescriptor};
use crate::error::Result;
use crate::graph::PlanGraph;
use crate::types::{ProvisioningState, ResourceAddress};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const STATE_VERSION: u32 = 1;

/// What we last knew about one remote resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Identifier assigned by the provider
    pub id: String,
    /// Declared configuration as last applied (before interpolation)
    pub config: Config,
    /// Addresses this resource depended on when last applied
    #[serde(default)]
    pub depends_on: Vec<ResourceAddress>,
    pub status: ProvisioningState,
    pub updated_at: DateTime<Utc>,
}

/// Persisted view of every managed resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub version: u32,
    /// Incremented on every write
    pub serial: u64,
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resources: BTreeMap<ResourceAddress, ResourceRecord>,
}

impl Default for StateSnapshot {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            serial: 0,
            last_updated: None,
            resources: BTreeMap::new(),
        }
    }
}

impl StateSnapshot {
    pub fn get(&self, address: &ResourceAddress) -> Option<&ResourceRecord> {
        self.resources.get(address)
    }

    pub fn contains(&self, address: &ResourceAddress) -> bool {
        self.resources.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Record a resource the provider confirmed as Ready
    pub fn record_ready(&mut self, id: &str, descriptor: &ResourceDescriptor) {
        self.upsert(id, descriptor, ProvisioningState::Ready);
    }

    /// Record a resource that exists remotely but failed to provision
    ///
    /// The next reconciliation treats it as tainted and replaces it. A
    /// failed update may have left the old references in place, so earlier
    /// dependencies stay recorded.
    pub fn record_failed(&mut self, id: &str, descriptor: &ResourceDescriptor) {
        let address = descriptor.address();
        let previous = self
            .resources
            .get(&address)
            .map(|r| r.depends_on.clone())
            .unwrap_or_default();
        self.upsert(id, descriptor, ProvisioningState::Failed);
        if let Some(record) = self.resources.get_mut(&address) {
            for dep in previous {
                if !record.depends_on.contains(&dep) {
                    record.depends_on.push(dep);
                }
            }
        }
    }

    fn upsert(&mut self, id: &str, descriptor: &ResourceDescriptor, status: ProvisioningState) {
        self.resources.insert(
            descriptor.address(),
            ResourceRecord {
                id: id.to_string(),
                config: descriptor.config.clone(),
                depends_on: descriptor.references(),
                status,
                updated_at: Utc::now(),
            },
        );
    }

    /// Mark an existing record as failed, keeping its last-applied config
    pub fn mark_failed(&mut self, address: &ResourceAddress) {
        if let Some(record) = self.resources.get_mut(address) {
            record.status = ProvisioningState::Failed;
            record.updated_at = Utc::now();
        }
    }

    pub fn remove(&mut self, address: &ResourceAddress) -> Option<ResourceRecord> {
        self.resources.remove(address)
    }

    /// Present records that still depend on `address`
    pub fn dependents_of(&self, address: &ResourceAddress) -> Vec<ResourceAddress> {
        self.resources
            .iter()
            .filter(|(_, r)| r.depends_on.contains(address))
            .map(|(a, _)| a.clone())
            .collect()
    }

    /// Dependency graph of the recorded resources
    ///
    /// Edges to resources no longer in state are dropped.
    pub fn graph(&self) -> Result<PlanGraph> {
        let edges = self.resources.iter().flat_map(|(address, record)| {
            record
                .depends_on
                .iter()
                .filter(move |dep| self.resources.contains_key(*dep))
                .map(move |dep| (address.clone(), dep.clone()))
        });
        PlanGraph::from_edges(self.resources.keys().cloned(), edges)
    }

    /// Bump serial and timestamp before a write
    pub fn touch(&mut self) {
        self.serial += 1;
        self.last_updated = Some(Utc::now());
    }
}
