//! Local identity: the handle this machine is known by in the directory, and
//! a random secret generated on first run.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::ConfigError;

pub const IDENTITY_FILE: &str = ".asciichat.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub handle: String,
    pub secret: String,
}

impl Identity {
    pub fn new(handle: impl Into<String>) -> Self {
        Self { handle: handle.into(), secret: generate_secret() }
    }

    /// `~/.asciichat.json`
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::home_dir().map(|h| h.join(IDENTITY_FILE)).ok_or(ConfigError::NoHomeDir)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let identity: Self = serde_json::from_str(&raw).map_err(|e| ConfigError::Identity {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        if identity.handle.trim().is_empty() {
            return Err(ConfigError::Identity {
                path: path.display().to_string(),
                reason: "handle is empty".into(),
            });
        }
        Ok(identity)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self).map_err(|e| ConfigError::Identity {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Loads the identity at `path`, or asks `prompt_handle` for a handle and
    /// writes a fresh identity there.
    pub fn load_or_create(
        path: &Path,
        prompt_handle: impl FnOnce() -> std::io::Result<String>,
    ) -> Result<Self, ConfigError> {
        if path.exists() {
            let identity = Self::load(path)?;
            info!("Loaded identity for handle: {}", identity.handle);
            return Ok(identity);
        }
        info!("No identity found at {}; creating one", path.display());
        let handle = prompt_handle()?.trim().to_owned();
        if handle.is_empty() {
            return Err(ConfigError::Invalid { reason: "handle must not be empty".into() });
        }
        let identity = Self::new(handle);
        identity.save(path)?;
        info!("Registered handle: {}", identity.handle);
        Ok(identity)
    }
}

/// 16 random bytes as 32 lowercase hex characters.
fn generate_secret() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
