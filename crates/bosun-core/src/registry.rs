//! Registry references, access policy and clients.
//!
//! Pulling and pushing bundles is delegated to a [`RegistryClient`]; this
//! module only decides what to ask for and whether the registry may be
//! reached insecurely.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::bundle::Bundle;
use crate::config::{BosunConfig, RegistryCredential};
use crate::relocation::{BUNDLE_FILENAME, RelocatedBundle, RelocationMap, relocate};

pub const DEFAULT_REGISTRY: &str = "docker.io";

/// A parsed `[registry/]repository[:tag][@digest]` reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub registry: String,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl Reference {
    pub fn parse(input: &str) -> anyhow::Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            anyhow::bail!("Reference must not be empty");
        }
        if input.chars().any(char::is_whitespace) {
            anyhow::bail!("Reference '{}' contains whitespace", input);
        }

        let (name, digest) = match input.split_once('@') {
            Some((name, digest)) => {
                if !digest.contains(':') {
                    anyhow::bail!("Reference '{}' has a malformed digest", input);
                }
                (name, Some(digest.to_string()))
            }
            None => (input, None),
        };

        let last_slash = name.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match name[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                (&name[..split], Some(name[split + 1..].to_string()))
            }
            None => (name, None),
        };
        if tag.as_deref() == Some("") {
            anyhow::bail!("Reference '{}' has an empty tag", input);
        }

        let (registry, repository) = match name.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (first.to_string(), rest.to_string())
            }
            _ => (DEFAULT_REGISTRY.to_string(), name.to_string()),
        };
        let repository = if registry == DEFAULT_REGISTRY && !repository.contains('/') {
            format!("library/{repository}")
        } else {
            repository
        };

        let valid = !repository.is_empty()
            && repository
                .split('/')
                .all(|part| !part.is_empty())
            && repository.chars().all(|c| {
                c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-' | '/')
            });
        if !valid {
            anyhow::bail!("Reference '{}' has an invalid repository name", input);
        }

        let tag = if tag.is_none() && digest.is_none() {
            Some("latest".to_string())
        } else {
            tag
        };

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

/// Whether `reference` targets a registry in the insecure allow-list.
pub fn is_insecure(reference: &Reference, insecure_registries: &[String]) -> bool {
    insecure_registries
        .iter()
        .any(|host| host.trim() == reference.registry)
}

/// Registry hosts referenced by the bundle's images after relocation.
pub fn registry_hosts(bundle: &Bundle, relocation_map: &RelocationMap) -> BTreeSet<String> {
    bundle
        .image_references()
        .into_iter()
        .filter_map(|image| Reference::parse(relocate(relocation_map, image)).ok())
        .map(|reference| reference.registry)
        .collect()
}

/// Fetches bundles from a registry.
pub trait RegistryClient: std::fmt::Debug {
    fn pull(&self, reference: &Reference, insecure: bool) -> anyhow::Result<RelocatedBundle>;
}

/// Registry mirrored into a local directory tree:
/// `<root>/<registry>/<repository>/<tag or digest>/bundle.json`.
#[derive(Debug, Clone)]
pub struct MirrorRegistry {
    root: PathBuf,
}

impl MirrorRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bundle_dir(&self, reference: &Reference) -> PathBuf {
        let version = match (&reference.digest, &reference.tag) {
            (Some(digest), _) => digest.replace(':', "_"),
            (None, Some(tag)) => tag.clone(),
            (None, None) => "latest".to_string(),
        };
        self.root
            .join(&reference.registry)
            .join(&reference.repository)
            .join(version)
    }
}

impl RegistryClient for MirrorRegistry {
    fn pull(&self, reference: &Reference, insecure: bool) -> anyhow::Result<RelocatedBundle> {
        let path = self.bundle_dir(reference).join(BUNDLE_FILENAME);
        debug!(%reference, insecure, path = %path.display(), "pulling bundle from mirror");
        if !path.is_file() {
            anyhow::bail!("Bundle {} not found in mirror {}", reference, self.root.display());
        }
        RelocatedBundle::load(&path).with_context(|| format!("Failed to pull {reference}"))
    }
}

/// Client used when no registry is configured; every pull fails.
#[derive(Debug, Clone, Default)]
pub struct UnconfiguredRegistry;

impl RegistryClient for UnconfiguredRegistry {
    fn pull(&self, reference: &Reference, _insecure: bool) -> anyhow::Result<RelocatedBundle> {
        anyhow::bail!(
            "Cannot pull {}: no registry mirror is configured (set registry_mirror in config.toml or pass a bundle file)",
            reference
        )
    }
}

/// Source of registry login credentials.
pub trait RegistryAuthProvider: std::fmt::Debug {
    fn credentials(&self, registry: &str) -> Option<RegistryCredential>;
}

/// Registry credentials declared in `config.toml`.
#[derive(Debug, Clone, Default)]
pub struct ConfigRegistryAuth {
    entries: BTreeMap<String, RegistryCredential>,
}

impl ConfigRegistryAuth {
    pub fn new(config: &BosunConfig) -> Self {
        Self {
            entries: config.registry_auth.clone(),
        }
    }
}

impl RegistryAuthProvider for ConfigRegistryAuth {
    fn credentials(&self, registry: &str) -> Option<RegistryCredential> {
        self.entries.get(registry).cloned()
    }
}
