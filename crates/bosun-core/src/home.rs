//! Bosun home directory layout.
//!
//! Everything bosun persists lives under one home directory, passed around
//! explicitly so tests can point it at a temporary directory:
//! - `claims/<installation>.json`
//! - `credentials/<name>.toml`
//! - `bundles/<key>/` (resolved bundle cache)
//! - `config.toml`

use std::path::{Path, PathBuf};

/// Environment variable overriding the default home directory.
pub const HOME_ENV: &str = "BOSUN_HOME";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BosunHome {
    root: PathBuf,
}

impl BosunHome {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve the home directory: `$BOSUN_HOME`, else `~/.bosun`.
    pub fn from_env() -> anyhow::Result<Self> {
        if let Some(dir) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::new(dir));
        }
        let home = dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Cannot determine home directory; set {HOME_ENV}"))?;
        Ok(Self::new(home.join(".bosun")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn claims_dir(&self) -> PathBuf {
        self.root.join("claims")
    }

    pub fn credentials_dir(&self) -> PathBuf {
        self.root.join("credentials")
    }

    pub fn bundles_dir(&self) -> PathBuf {
        self.root.join("bundles")
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }
}
