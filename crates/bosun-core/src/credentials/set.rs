//! Named credential set files.
//!
//! A credential set maps credential names to the place their value comes
//! from:
//!
//! ```toml
//! name = "prod"
//!
//! [[credentials]]
//! name = "kubeconfig"
//! source = { path = "~/.kube/config" }
//!
//! [[credentials]]
//! name = "token"
//! source = { env = "SHOP_TOKEN" }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialSetFile {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub credentials: Vec<CredentialStrategy>,
}

/// How to obtain one credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialStrategy {
    pub name: String,
    pub source: ValueSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueSource {
    /// Literal value
    Value(String),
    /// Environment variable name
    Env(String),
    /// File whose contents are the value
    Path(String),
}

impl CredentialSetFile {
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load a set given either a file path or a name under `dir`.
    pub fn load(name_or_path: &str, dir: &Path) -> anyhow::Result<Self> {
        let path = locate(name_or_path, dir)?;
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read credential set: {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse credential set: {}", path.display()))
    }

    /// Resolve every credential to its concrete value.
    pub fn resolve(&self) -> anyhow::Result<BTreeMap<String, String>> {
        let mut values = BTreeMap::new();
        for credential in &self.credentials {
            let value = credential.source.resolve().with_context(|| {
                format!(
                    "Failed to resolve credential '{}' in set '{}'",
                    credential.name, self.name
                )
            })?;
            values.insert(credential.name.clone(), value);
        }
        Ok(values)
    }
}

impl ValueSource {
    pub fn resolve(&self) -> anyhow::Result<String> {
        match self {
            ValueSource::Value(value) => Ok(value.clone()),
            ValueSource::Env(var) => std::env::var(var)
                .with_context(|| format!("Environment variable {var} is not set")),
            ValueSource::Path(path) => {
                let path = expand_home(path);
                std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))
            }
        }
    }
}

fn locate(name_or_path: &str, dir: &Path) -> anyhow::Result<PathBuf> {
    let direct = Path::new(name_or_path);
    if direct.is_file() {
        return Ok(direct.to_path_buf());
    }
    let named = dir.join(format!("{name_or_path}.toml"));
    if named.is_file() {
        return Ok(named);
    }
    anyhow::bail!(
        "Credential set '{}' not found (looked for a file and in {})",
        name_or_path,
        dir.display()
    )
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(path)
}
