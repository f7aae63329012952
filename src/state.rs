use anyhow::{Context, Result, bail};
use provisionkit::{STATE_VERSION, StateSnapshot};
use std::fs;
use std::path::{Path, PathBuf};

/// JSON state file on local disk
///
/// The previous version is kept next to it as `<file>.backup`.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".backup");
        PathBuf::from(name)
    }

    /// Load state, or an empty snapshot when no file exists yet
    pub fn load(&self) -> Result<StateSnapshot> {
        if !self.path.exists() {
            log::debug!("State file does not exist, using empty state");
            return Ok(StateSnapshot::default());
        }

        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read state file: {}", self.path.display()))?;

        let state: StateSnapshot = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {}", self.path.display()))?;

        if state.version > STATE_VERSION {
            bail!(
                "State file {} has version {}, this build understands up to {}",
                self.path.display(),
                state.version,
                STATE_VERSION
            );
        }

        log::debug!(
            "Loaded state serial {} ({} resources) from {}",
            state.serial,
            state.len(),
            self.path.display()
        );
        Ok(state)
    }

    /// Bump the serial and write, keeping the previous file as a backup
    pub fn save(&self, state: &mut StateSnapshot) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;
        }

        state.touch();
        let content =
            serde_json::to_string_pretty(state).context("Failed to serialize state to JSON")?;

        if self.path.exists() {
            fs::copy(&self.path, self.backup_path()).with_context(|| {
                format!("Failed to back up state file: {}", self.path.display())
            })?;
        }

        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, content)
            .with_context(|| format!("Failed to write state file: {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace state file: {}", self.path.display()))?;

        log::debug!("Saved state serial {} to {}", state.serial, self.path.display());
        Ok(())
    }
}
