//! Bundle resolution
//!
//! Turns a bundle reference given on the command line into a
//! [`RelocatedBundle`]. Local files and directories are read in place;
//! registry references go through a [`RegistryClient`] and are cached under
//! the bundles directory.

use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{debug, info};

use crate::registry::{Reference, RegistryClient, is_insecure};
use crate::relocation::{BUNDLE_FILENAME, RelocatedBundle};

/// Registry access policy for one resolution
#[derive(Debug, Clone, Default)]
pub struct PullOptions {
    /// Always go to the registry, even when the cache holds the bundle
    pub pull: bool,

    /// Registry hosts that may be reached insecurely
    pub insecure_registries: Vec<String>,
}

pub trait BundleResolver: std::fmt::Debug {
    fn resolve(&self, reference: &str, options: &PullOptions) -> anyhow::Result<RelocatedBundle>;
}

/// Resolves local paths and registry references.
#[derive(Debug)]
pub struct ReferenceResolver {
    cache_dir: PathBuf,
    registry: Box<dyn RegistryClient>,
}

impl ReferenceResolver {
    pub fn new(cache_dir: impl Into<PathBuf>, registry: Box<dyn RegistryClient>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            registry,
        }
    }

    /// Cache directory for a registry reference.
    pub fn cache_path(&self, reference: &Reference) -> PathBuf {
        self.cache_dir.join(cache_key(&reference.to_string()))
    }

    fn resolve_remote(
        &self,
        reference: &Reference,
        options: &PullOptions,
    ) -> anyhow::Result<RelocatedBundle> {
        let dir = self.cache_path(reference);
        let cached = dir.join(BUNDLE_FILENAME);

        if !options.pull && cached.is_file() {
            debug!(%reference, path = %cached.display(), "using cached bundle");
            return RelocatedBundle::load(&cached);
        }

        let insecure = is_insecure(reference, &options.insecure_registries);
        info!(%reference, insecure, "pulling bundle");
        let bundle = self.registry.pull(reference, insecure)?;

        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create bundle cache: {}", dir.display()))?;
        bundle.store(&dir)?;
        debug!(%reference, digest = %bundle.digest()?, "cached bundle");
        Ok(bundle)
    }
}

impl BundleResolver for ReferenceResolver {
    fn resolve(&self, reference: &str, options: &PullOptions) -> anyhow::Result<RelocatedBundle> {
        let path = Path::new(reference);
        if path.is_file() {
            debug!(path = %path.display(), "loading bundle file");
            return RelocatedBundle::load(path);
        }
        if path.is_dir() {
            debug!(path = %path.display(), "loading bundle directory");
            return RelocatedBundle::load(&path.join(BUNDLE_FILENAME));
        }

        let parsed = Reference::parse(reference)?;
        self.resolve_remote(&parsed, options)
    }
}

fn cache_key(reference: &str) -> String {
    let hash = blake3::hash(reference.as_bytes());
    hash.to_hex()[..32].to_string()
}
