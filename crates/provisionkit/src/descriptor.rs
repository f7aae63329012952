//! Resource descriptors and the store that holds one planning pass worth of them
//!
//! A descriptor depends on another resource in two ways:
//! - explicitly, through its `depends_on` list
//! - implicitly, through `${type.name}` or `${type.name.attribute}`
//!   interpolations inside any string of its configuration

use crate::error::{Error, Result};
use crate::types::ResourceAddress;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;

/// Opaque configuration payload of a resource
pub type Config = BTreeMap<String, Value>;

static INTERPOLATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z0-9_-]+)\.([A-Za-z0-9_-]+)(?:\.([A-Za-z0-9_.-]+))?\}")
        .unwrap_or_else(|e| panic!("interpolation pattern is valid: {e}"))
});

/// A reference found inside a configuration string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub target: ResourceAddress,
    /// Attribute path after the address; `None` means the remote id
    pub attribute: Option<String>,
}

/// A declared resource specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    #[serde(default)]
    pub config: Config,
    #[serde(default)]
    pub depends_on: Vec<ResourceAddress>,
    /// Overrides the default per-resource timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Configuration keys whose change forces replacement
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replace_on: Vec<String>,
}

impl ResourceDescriptor {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
            config: Config::new(),
            depends_on: Vec::new(),
            timeout_secs: None,
            replace_on: Vec::new(),
        }
    }

    /// Builder: set a configuration value
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Builder: add an explicit dependency
    pub fn depends_on(mut self, address: ResourceAddress) -> Self {
        self.depends_on.push(address);
        self
    }

    pub fn address(&self) -> ResourceAddress {
        ResourceAddress::new(&self.resource_type, &self.name)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Every interpolation found in the configuration, in key order
    pub fn interpolations(&self) -> Vec<Reference> {
        let mut refs = Vec::new();
        for value in self.config.values() {
            collect_references(value, &mut refs);
        }
        refs
    }

    /// Distinct addresses this descriptor depends on
    ///
    /// Explicit `depends_on` entries come first, then interpolation targets
    /// in the order they appear.
    pub fn references(&self) -> Vec<ResourceAddress> {
        let mut out: Vec<ResourceAddress> = Vec::new();
        let implicit = self.interpolations().into_iter().map(|r| r.target);
        for addr in self.depends_on.iter().cloned().chain(implicit) {
            if !out.contains(&addr) {
                out.push(addr);
            }
        }
        out
    }

    /// Substitute every interpolation with a concrete value
    ///
    /// `resolve` receives the target address and attribute and returns the
    /// value to splice in. A string that consists of a single interpolation
    /// is replaced by the resolved value as-is.
    pub fn render<F>(&self, resolve: F) -> Result<Config>
    where
        F: Fn(&ResourceAddress, Option<&str>) -> Option<Value>,
    {
        let from = self.address();
        self.config
            .iter()
            .map(|(k, v)| Ok((k.clone(), render_value(v, &from, &resolve)?)))
            .collect()
    }
}

fn collect_references(value: &Value, out: &mut Vec<Reference>) {
    match value {
        Value::String(s) => {
            for caps in INTERPOLATION.captures_iter(s) {
                out.push(Reference {
                    target: ResourceAddress::new(&caps[1], &caps[2]),
                    attribute: caps.get(3).map(|m| m.as_str().to_string()),
                });
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_references(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_references(v, out)),
        _ => {}
    }
}

fn render_value<F>(value: &Value, from: &ResourceAddress, resolve: &F) -> Result<Value>
where
    F: Fn(&ResourceAddress, Option<&str>) -> Option<Value>,
{
    match value {
        Value::String(s) => render_string(s, from, resolve),
        Value::Array(items) => items
            .iter()
            .map(|v| render_value(v, from, resolve))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| Ok((k.clone(), render_value(v, from, resolve)?)))
            .collect::<Result<serde_json::Map<_, _>>>()
            .map(Value::Object),
        other => Ok(other.clone()),
    }
}

fn render_string<F>(s: &str, from: &ResourceAddress, resolve: &F) -> Result<Value>
where
    F: Fn(&ResourceAddress, Option<&str>) -> Option<Value>,
{
    let lookup = |caps: &regex::Captures<'_>| -> Result<Value> {
        let target = ResourceAddress::new(&caps[1], &caps[2]);
        let attribute = caps.get(3).map(|m| m.as_str());
        resolve(&target, attribute).ok_or_else(|| Error::UnresolvedReference {
            from: from.clone(),
            to: target,
        })
    };

    // Whole-string interpolation keeps the resolved value's JSON type
    if let Some(caps) = INTERPOLATION.captures(s)
        && caps.get(0).is_some_and(|m| m.as_str().len() == s.len())
    {
        return lookup(&caps);
    }

    let mut rendered = String::with_capacity(s.len());
    let mut last = 0;
    for caps in INTERPOLATION.captures_iter(s) {
        let Some(whole) = caps.get(0) else { continue };
        rendered.push_str(&s[last..whole.start()]);
        match lookup(&caps)? {
            Value::String(v) => rendered.push_str(&v),
            other => rendered.push_str(&other.to_string()),
        }
        last = whole.end();
    }
    rendered.push_str(&s[last..]);
    Ok(Value::String(rendered))
}

/// All descriptors declared for one planning pass
///
/// Descriptors are immutable once inserted; the store rejects duplicate
/// addresses.
#[derive(Debug, Clone, Default)]
pub struct DescriptorStore {
    descriptors: BTreeMap<ResourceAddress, ResourceDescriptor>,
}

impl DescriptorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from descriptors, rejecting duplicates and bad names
    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = ResourceDescriptor>,
    ) -> Result<Self> {
        let mut store = Self::new();
        for descriptor in descriptors {
            store.insert(descriptor)?;
        }
        Ok(store)
    }

    pub fn insert(&mut self, descriptor: ResourceDescriptor) -> Result<()> {
        let address = ResourceAddress::parse(&format!(
            "{}.{}",
            descriptor.resource_type, descriptor.name
        ))?;
        if self.descriptors.contains_key(&address) {
            return Err(Error::DuplicateResource(address));
        }
        self.descriptors.insert(address, descriptor);
        Ok(())
    }

    pub fn get(&self, address: &ResourceAddress) -> Option<&ResourceDescriptor> {
        self.descriptors.get(address)
    }

    pub fn contains(&self, address: &ResourceAddress) -> bool {
        self.descriptors.contains_key(address)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ResourceAddress, &ResourceDescriptor)> {
        self.descriptors.iter()
    }

    pub fn addresses(&self) -> impl Iterator<Item = &ResourceAddress> {
        self.descriptors.keys()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn addr(s: &str) -> ResourceAddress {
        ResourceAddress::parse(s).unwrap()
    }

    #[test]
    fn test_references_explicit_and_implicit() {
        let subnet = ResourceDescriptor::new("azurerm_subnet", "ase")
            .with("virtual_network_name", "${azurerm_virtual_network.main.name}")
            .with("resource_group_name", "${azurerm_resource_group.main.name}")
            .with("address_prefixes", json!(["10.0.1.0/24"]))
            .depends_on(addr("azurerm_resource_group.main"));

        assert_eq!(
            subnet.references(),
            vec![
                addr("azurerm_resource_group.main"),
                addr("azurerm_virtual_network.main"),
            ]
        );
    }

    #[test]
    fn test_references_nested_values() {
        let app = ResourceDescriptor::new("azurerm_logic_app_standard", "app").with(
            "site_config",
            json!({
                "settings": [{"value": "${azurerm_storage_account.sa.primary_access_key}"}],
                "plan": "${azurerm_service_plan.plan.id}"
            }),
        );

        let refs = app.interpolations();
        assert_eq!(refs.len(), 2);
        assert!(refs.iter().any(|r| r.target == addr("azurerm_service_plan.plan")
            && r.attribute.as_deref() == Some("id")));
        assert!(refs.iter().any(|r| r.target == addr("azurerm_storage_account.sa")));
    }

    #[test]
    fn test_render_whole_and_embedded() {
        let d = ResourceDescriptor::new("azurerm_subnet", "ase")
            .with("vnet_id", "${azurerm_virtual_network.main}")
            .with("label", "subnet-of-${azurerm_virtual_network.main.name}")
            .with("prefix_count", "${azurerm_virtual_network.main.count}");

        let rendered = d
            .render(|target, attribute| {
                assert_eq!(target, &addr("azurerm_virtual_network.main"));
                match attribute {
                    None => Some(json!("/subscriptions/x/vnet")),
                    Some("name") => Some(json!("vnet-main")),
                    Some("count") => Some(json!(3)),
                    Some(_) => None,
                }
            })
            .unwrap();

        assert_eq!(rendered["vnet_id"], json!("/subscriptions/x/vnet"));
        assert_eq!(rendered["label"], json!("subnet-of-vnet-main"));
        assert_eq!(rendered["prefix_count"], json!(3));
    }

    #[test]
    fn test_render_unresolved() {
        let d = ResourceDescriptor::new("t", "a").with("x", "${t.missing.id}");
        let err = d.render(|_, _| None).unwrap_err();
        assert!(matches!(err, Error::UnresolvedReference { .. }));
    }

    #[test]
    fn test_store_rejects_duplicates() {
        let mut store = DescriptorStore::new();
        store.insert(ResourceDescriptor::new("t", "a")).unwrap();
        let err = store.insert(ResourceDescriptor::new("t", "a")).unwrap_err();
        assert!(matches!(err, Error::DuplicateResource(_)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_store_rejects_bad_names() {
        let err = DescriptorStore::from_descriptors([ResourceDescriptor::new("t", "has space")])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidAddress(_)));
    }

    #[test]
    fn test_descriptor_from_toml_shape() {
        let d: ResourceDescriptor = serde_json::from_value(json!({
            "type": "azurerm_subnet",
            "name": "ase",
            "depends_on": ["azurerm_virtual_network.main"],
            "timeout_secs": 600,
            "replace_on": ["address_prefixes"],
            "config": {"address_prefixes": ["10.0.1.0/24"]}
        }))
        .unwrap();
        assert_eq!(d.timeout(), Some(Duration::from_secs(600)));
        assert_eq!(d.depends_on, vec![addr("azurerm_virtual_network.main")]);
    }
}
