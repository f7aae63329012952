//! Stack file: settings plus resource descriptors
//!
//! TOML is the primary format; a `.json` extension switches to JSON.
//!
//! ```toml
//! [settings]
//! provider = "azure"
//! jobs = 4
//!
//! [settings.azure]
//! resource_group = "rg-logicapp-ase"
//! location = "westeurope"
//!
//! [[resource]]
//! type = "azurerm_virtual_network"
//! name = "main"
//! config = { address_space = ["10.0.0.0/16"] }
//! ```

use anyhow::{Context, Result, bail};
use provisionkit::{DescriptorStore, ExecuteOptions, ResourceDescriptor};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_STATE_FILE: &str = "stackplan.tfstate.json";

/// Which backend executes provider calls
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Azure Resource Manager through the az CLI
    Azure,
    /// JSON registry file next to the state, for offline runs
    #[default]
    Local,
}

/// Azure-specific defaults applied to every resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzureSettings {
    /// Subscription id; the az CLI's current account when unset
    #[serde(default)]
    pub subscription: Option<String>,
    #[serde(default)]
    pub resource_group: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub provider: ProviderKind,
    pub jobs: usize,
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub state_path: String,
    pub azure: AzureSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            jobs: 4,
            timeout_secs: 30 * 60,
            poll_interval_ms: 2000,
            state_path: DEFAULT_STATE_FILE.to_string(),
            azure: AzureSettings::default(),
        }
    }
}

impl Settings {
    pub fn execute_options(&self) -> ExecuteOptions {
        ExecuteOptions {
            jobs: self.jobs,
            timeout: Duration::from_secs(self.timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            ..Default::default()
        }
    }

    fn validate(&self) -> Result<()> {
        if self.jobs == 0 {
            bail!("settings.jobs must be at least 1");
        }
        if self.timeout_secs == 0 {
            bail!("settings.timeout_secs must be at least 1");
        }
        if self.provider == ProviderKind::Azure && self.azure.resource_group.is_none() {
            bail!("settings.azure.resource_group is required for the azure provider");
        }
        Ok(())
    }
}

/// Parsed stack file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StackFile {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default, rename = "resource")]
    pub resources: Vec<ResourceDescriptor>,
}

impl StackFile {
    pub fn parse(content: &str, json: bool) -> Result<Self> {
        let stack: Self = if json {
            serde_json::from_str(content).context("Invalid stack JSON")?
        } else {
            toml::from_str(content).context("Invalid stack TOML")?
        };
        Ok(stack)
    }

    /// Descriptor store for one planning pass
    pub fn store(&self) -> Result<DescriptorStore> {
        DescriptorStore::from_descriptors(self.resources.iter().cloned())
            .context("Invalid resource declarations")
    }
}

/// A stack file together with where it was loaded from
#[derive(Debug, Clone)]
pub struct Stack {
    pub path: PathBuf,
    pub file: StackFile,
}

impl Stack {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read stack file {}", path.display()))?;
        let json = path.extension().is_some_and(|e| e == "json");
        let file = StackFile::parse(&content, json)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        file.settings
            .validate()
            .with_context(|| format!("Invalid settings in {}", path.display()))?;

        log::debug!(
            "Loaded {} resources from {}",
            file.resources.len(),
            path.display()
        );
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.file.settings
    }

    /// Directory relative paths in the stack are resolved against
    pub fn base_dir(&self) -> PathBuf {
        self.path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
    }

    /// State file location, honouring an explicit override
    pub fn state_path(&self, explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        let expanded = shellexpand::tilde(&self.file.settings.state_path);
        let path = PathBuf::from(expanded.as_ref());
        if path.is_absolute() {
            path
        } else {
            self.base_dir().join(path)
        }
    }
}
