//! On-disk token cache for the CLI: `~/.config/digest-chat/credentials.json`

use super::api::Credentials;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Credentials saved for one server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredentials {
    pub server: String,
    pub email: String,
    #[serde(flatten)]
    pub tokens: Credentials,
}

pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store under the user's config directory
    pub fn default_location() -> Result<Self> {
        let config = dirs::config_dir().context("Cannot determine config directory")?;
        Ok(Self::new(config.join("digest-chat").join("credentials.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Saved credentials for `server`, if any. An unreadable file counts as none.
    pub fn load(&self, server: &str) -> Option<StoredCredentials> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str::<StoredCredentials>(&content) {
            Ok(stored) if same_server(&stored.server, server) => Some(stored),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("Ignoring corrupt {}: {}", self.path.display(), e);
                None
            }
        }
    }

    pub fn save(&self, stored: &StoredCredentials) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let formatted =
            serde_json::to_string_pretty(stored).context("Failed to serialize credentials")?;
        std::fs::write(&self.path, formatted)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
                .context("Failed to restrict credentials file permissions")?;
        }
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", self.path.display())),
        }
    }
}

fn same_server(a: &str, b: &str) -> bool {
    a.trim_end_matches('/') == b.trim_end_matches('/')
}
