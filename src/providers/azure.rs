//! Azure Resource Manager through the `az` CLI
//!
//! Descriptors use azurerm-style snake_case keys. A few keys steer the
//! request rather than becoming properties:
//!
//! - `name`: Azure resource name (defaults to the descriptor name)
//! - `resource_group_name`, `location`: default to `settings.azure`
//! - `parent` / `virtual_network_name`: parent name for child types
//! - `properties`: merged verbatim into the ARM `properties` object
//!
//! `tags`, `sku`, `kind`, `identity` and `zones` go to the top level of the
//! ARM body; every other key lands in `properties` as camelCase.

use crate::config::AzureSettings;
use crate::runner::{self, CommandOutput};
use provisionkit::{ApiError, Config, Created, OperationStatus, Provider, ResolvedResource};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::{LazyLock, OnceLock};

const DEFAULT_LOCATION: &str = "westeurope";
const ROLE_ASSIGNMENT_API: &str = "2022-04-01";

const META_KEYS: &[&str] = &[
    "name",
    "resource_group_name",
    "parent",
    "virtual_network_name",
    "properties",
];
const TOP_LEVEL_KEYS: &[&str] = &["location", "tags", "sku", "kind", "identity", "zones"];

static ERROR_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\(([A-Z][A-Za-z]+)\)|Code:\s*([A-Z][A-Za-z]+)")
        .unwrap_or_else(|e| panic!("error code pattern is valid: {e}"))
});

static GROUP_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^/subscriptions/[^/]+/resourceGroups/([^/]+)$")
        .unwrap_or_else(|e| panic!("resource group id pattern is valid: {e}"))
});

/// ARM resource type for an azurerm type, with the child segment for nested types
fn arm_type(resource_type: &str) -> Option<(&'static str, Option<&'static str>)> {
    let ty = match resource_type {
        "azurerm_virtual_network" => ("Microsoft.Network/virtualNetworks", None),
        "azurerm_subnet" => ("Microsoft.Network/virtualNetworks", Some("subnets")),
        "azurerm_network_security_group" => ("Microsoft.Network/networkSecurityGroups", None),
        "azurerm_app_service_environment_v3" => ("Microsoft.Web/hostingEnvironments", None),
        "azurerm_service_plan" => ("Microsoft.Web/serverfarms", None),
        "azurerm_logic_app_standard" => ("Microsoft.Web/sites", None),
        "azurerm_storage_account" => ("Microsoft.Storage/storageAccounts", None),
        "azurerm_key_vault" => ("Microsoft.KeyVault/vaults", None),
        "azurerm_user_assigned_identity" => {
            ("Microsoft.ManagedIdentity/userAssignedIdentities", None)
        }
        "azurerm_application_insights" => ("Microsoft.Insights/components", None),
        _ => return None,
    };
    Some(ty)
}

/// Whether the azure provider knows how to manage `resource_type`
pub fn supports(resource_type: &str) -> bool {
    matches!(resource_type, "azurerm_resource_group" | "azurerm_role_assignment")
        || arm_type(resource_type).is_some()
}

/// Property paths that differ from the plain camelCase rule
fn property_path(resource_type: &str, key: &str) -> Option<&'static str> {
    let path = match (resource_type, key) {
        ("azurerm_virtual_network", "address_space") => "addressSpace.addressPrefixes",
        ("azurerm_app_service_environment_v3", "subnet_id") => "virtualNetwork.id",
        ("azurerm_service_plan", "app_service_environment_id") => "hostingEnvironmentProfile.id",
        ("azurerm_logic_app_standard", "app_service_plan_id") => "serverFarmId",
        _ => return None,
    };
    Some(path)
}

pub fn camel_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper = false;
    for c in key.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Set `value` at a dotted path, creating intermediate objects
fn set_path(root: &mut Map<String, Value>, path: &str, value: Value) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let Some(last) = segments.pop() else {
        return;
    };
    let mut cursor = root;
    for segment in segments {
        let entry = cursor
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Value::Object(next) = entry else {
            return;
        };
        cursor = next;
    }
    cursor.insert(last.to_string(), value);
}

/// Full ARM body for `az resource create --is-full-object`
pub fn arm_body(resource_type: &str, config: &Config, default_location: &str) -> Value {
    let mut body = Map::new();
    let mut properties = Map::new();

    if let Some(Value::Object(explicit)) = config.get("properties") {
        properties.extend(explicit.clone());
    }

    for (key, value) in config {
        if META_KEYS.contains(&key.as_str()) {
            continue;
        }
        if TOP_LEVEL_KEYS.contains(&key.as_str()) {
            body.insert(key.clone(), value.clone());
        } else if let Some(path) = property_path(resource_type, key) {
            set_path(&mut properties, path, value.clone());
        } else {
            properties.insert(camel_case(key), value.clone());
        }
    }

    // Child resources inherit the parent's location
    if arm_type(resource_type).is_some_and(|(_, child)| child.is_none()) {
        body.entry("location")
            .or_insert_with(|| Value::String(default_location.to_string()));
    }
    body.insert("properties".to_string(), Value::Object(properties));
    Value::Object(body)
}

/// Map `az` stderr to an API error class
pub fn classify(stderr: &str) -> ApiError {
    let code = ERROR_CODE
        .captures_iter(stderr)
        .find_map(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| m.as_str().to_string());
    let message = stderr
        .lines()
        .map(|l| l.trim_start_matches("ERROR:").trim())
        .find(|l| !l.is_empty())
        .unwrap_or("az command failed")
        .to_string();

    match code.as_deref() {
        Some("ResourceNotFound" | "ResourceGroupNotFound" | "NotFound" | "RoleAssignmentNotFound") => {
            ApiError::not_found(message)
        }
        Some(
            "TooManyRequests"
            | "ServiceUnavailable"
            | "InternalServerError"
            | "GatewayTimeout"
            | "RetryableError"
            | "AnotherOperationInProgress",
        ) => ApiError::transient(message),
        Some(_) => ApiError::permanent(message),
        None if stderr.contains("could not be found") || stderr.contains("was not found") => {
            ApiError::not_found(message)
        }
        None => ApiError::permanent(message),
    }
}

fn status_from(body: &Value) -> OperationStatus {
    let state = body
        .pointer("/properties/provisioningState")
        .and_then(Value::as_str);
    match state {
        // Role assignments and some classic types report no provisioning state
        None | Some("Succeeded") => OperationStatus::Succeeded,
        Some(s @ ("Failed" | "Canceled")) => OperationStatus::Failed {
            message: format!("provisioningState {s}"),
        },
        Some(_) => OperationStatus::Pending,
    }
}

fn parse_json(output: &CommandOutput) -> Result<Value, ApiError> {
    if !output.success {
        return Err(classify(&output.stderr));
    }
    if output.stdout.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&output.stdout)
        .map_err(|e| ApiError::permanent(format!("unexpected az output: {e}")))
}

fn str_key<'c>(config: &'c Config, key: &str) -> Option<&'c str> {
    config.get(key).and_then(Value::as_str)
}

pub struct AzureProvider {
    settings: AzureSettings,
    subscription: OnceLock<String>,
}

impl AzureProvider {
    pub fn new(settings: AzureSettings) -> Self {
        let subscription = settings
            .subscription
            .clone()
            .map_or_else(OnceLock::new, OnceLock::from);
        Self {
            settings,
            subscription,
        }
    }

    fn az(&self, args: &[&str]) -> Result<Value, ApiError> {
        let mut full: Vec<&str> = args.to_vec();
        if let Some(sub) = self.subscription.get() {
            full.extend(["--subscription", sub.as_str()]);
        }
        full.extend(["--output", "json"]);
        let output = runner::run_output("az", &full)
            .map_err(|e| ApiError::transient(format!("could not run az: {e:#}")))?;
        parse_json(&output)
    }

    fn subscription(&self) -> Result<&str, ApiError> {
        if let Some(id) = self.subscription.get() {
            return Ok(id);
        }
        let account = self.az(&["account", "show"])?;
        let id = account
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| ApiError::permanent("az account show returned no subscription id"))?;
        Ok(self.subscription.get_or_init(|| id.to_string()))
    }

    fn resource_group<'c>(&'c self, config: &'c Config) -> Result<&'c str, ApiError> {
        str_key(config, "resource_group_name")
            .or(self.settings.resource_group.as_deref())
            .ok_or_else(|| ApiError::permanent("no resource_group_name and no settings.azure.resource_group"))
    }

    fn location<'c>(&'c self, config: &'c Config) -> &'c str {
        str_key(config, "location")
            .or(self.settings.location.as_deref())
            .unwrap_or(DEFAULT_LOCATION)
    }

    /// ARM id a descriptor maps to
    pub fn resource_id(&self, resource: &ResolvedResource) -> Result<String, ApiError> {
        let address = &resource.address;
        let config = &resource.config;
        let (provider_type, child) = arm_type(address.resource_type()).ok_or_else(|| {
            ApiError::permanent(format!(
                "resource type {} is not supported by the azure provider",
                address.resource_type()
            ))
        })?;
        let name = str_key(config, "name").unwrap_or(address.name());
        let group = self.resource_group(config)?;
        let sub = self.subscription()?;

        let base = format!("/subscriptions/{sub}/resourceGroups/{group}/providers/{provider_type}");
        match child {
            None => Ok(format!("{base}/{name}")),
            Some(segment) => {
                let parent = str_key(config, "parent")
                    .or_else(|| str_key(config, "virtual_network_name"))
                    .ok_or_else(|| {
                        ApiError::permanent(format!("{address} needs a `parent` name"))
                    })?;
                Ok(format!("{base}/{parent}/{segment}/{name}"))
            }
        }
    }

    fn put(&self, resource: &ResolvedResource) -> Result<(String, OperationStatus), ApiError> {
        let id = self.resource_id(resource)?;
        let body = arm_body(
            resource.address.resource_type(),
            &resource.config,
            self.location(&resource.config),
        );
        let body = body.to_string();
        let response = self.az(&[
            "resource",
            "create",
            "--id",
            &id,
            "--is-full-object",
            "--properties",
            &body,
        ])?;
        let id = response
            .get("id")
            .and_then(Value::as_str)
            .map_or(id, str::to_string);
        Ok((id, status_from(&response)))
    }

    fn create_group(&self, resource: &ResolvedResource) -> Result<Created, ApiError> {
        let name = str_key(&resource.config, "name").unwrap_or(resource.address.name());
        let location = self.location(&resource.config);
        let mut args = vec!["group", "create", "--name", name, "--location", location];
        let tags = tag_args(&resource.config);
        if !tags.is_empty() {
            args.push("--tags");
            args.extend(tags.iter().map(String::as_str));
        }
        let response = self.az(&args)?;
        let id = response
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| ApiError::permanent("az group create returned no id"))?;
        Ok(Created {
            id: id.to_string(),
            status: status_from(&response),
        })
    }

    fn create_role_assignment(&self, resource: &ResolvedResource) -> Result<Created, ApiError> {
        let config = &resource.config;
        let required = |key: &str| {
            str_key(config, key)
                .ok_or_else(|| ApiError::permanent(format!("{} needs `{key}`", resource.address)))
        };
        let response = self.az(&[
            "role",
            "assignment",
            "create",
            "--assignee-object-id",
            required("principal_id")?,
            "--assignee-principal-type",
            str_key(config, "principal_type").unwrap_or("ServicePrincipal"),
            "--role",
            required("role_definition_name")?,
            "--scope",
            required("scope")?,
        ])?;
        let id = response
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| ApiError::permanent("az role assignment create returned no id"))?;
        Ok(Created {
            id: id.to_string(),
            status: OperationStatus::Succeeded,
        })
    }
}

fn is_role_assignment(id: &str) -> bool {
    id.contains("/providers/Microsoft.Authorization/roleAssignments/")
}

impl Provider for AzureProvider {
    fn name(&self) -> &str {
        "azure"
    }

    fn create(&self, resource: &ResolvedResource) -> Result<Created, ApiError> {
        match resource.address.resource_type() {
            "azurerm_resource_group" => self.create_group(resource),
            "azurerm_role_assignment" => self.create_role_assignment(resource),
            _ => {
                let (id, status) = self.put(resource)?;
                Ok(Created { id, status })
            }
        }
    }

    fn update(&self, id: &str, resource: &ResolvedResource) -> Result<OperationStatus, ApiError> {
        match resource.address.resource_type() {
            "azurerm_resource_group" => {
                let name = group_name(id)?;
                let mut args = vec!["group", "update", "--name", name.as_str()];
                let tags = tag_args(&resource.config);
                if !tags.is_empty() {
                    args.push("--tags");
                    args.extend(tags.iter().map(String::as_str));
                }
                let response = self.az(&args)?;
                Ok(status_from(&response))
            }
            // Every role assignment key forces replacement
            "azurerm_role_assignment" => Ok(OperationStatus::Succeeded),
            _ => {
                let (new_id, status) = self.put(resource)?;
                if new_id != id {
                    log::warn!("{}: update produced id {new_id}, expected {id}", resource.address);
                }
                Ok(status)
            }
        }
    }

    fn delete(&self, id: &str) -> Result<OperationStatus, ApiError> {
        if GROUP_ID.is_match(id) {
            let name = group_name(id)?;
            self.az(&["group", "delete", "--name", &name, "--yes"])?;
        } else if is_role_assignment(id) {
            self.az(&["role", "assignment", "delete", "--ids", id])?;
        } else {
            self.az(&["resource", "delete", "--ids", id])?;
        }
        Ok(OperationStatus::Succeeded)
    }

    fn get_status(&self, id: &str) -> Result<OperationStatus, ApiError> {
        let response = if GROUP_ID.is_match(id) {
            let name = group_name(id)?;
            self.az(&["group", "show", "--name", &name])?
        } else if is_role_assignment(id) {
            let url = format!("https://management.azure.com{id}?api-version={ROLE_ASSIGNMENT_API}");
            self.az(&["rest", "--method", "get", "--url", &url])?
        } else {
            self.az(&["resource", "show", "--ids", id])?
        };
        Ok(status_from(&response))
    }

    fn immutable_properties(&self, resource_type: &str) -> Vec<String> {
        super::immutable_properties(resource_type)
    }
}

fn group_name(id: &str) -> Result<String, ApiError> {
    GROUP_ID
        .captures(id)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| ApiError::permanent(format!("{id} is not a resource group id")))
}

fn tag_args(config: &Config) -> Vec<String> {
    match config.get("tags") {
        Some(Value::Object(tags)) => tags
            .iter()
            .map(|(k, v)| match v {
                Value::String(s) => format!("{k}={s}"),
                other => format!("{k}={other}"),
            })
            .collect(),
        _ => Vec::new(),
    }
}
