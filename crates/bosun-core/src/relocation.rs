//! Relocated bundle storage
//!
//! A relocated bundle is a manifest paired with an image relocation map.
//! Both live as sibling files in one directory:
//! - `bundle.json`: the manifest, unchanged by relocation
//! - `relocation-map.json`: original image reference -> replacement reference
//!
//! A missing relocation map file means "no relocations", never an error.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;

use anyhow::Context;

use crate::bundle::{Bundle, to_canonical_vec};

/// File name of the bundle manifest inside a relocated bundle directory.
pub const BUNDLE_FILENAME: &str = "bundle.json";

/// File name of the relocation map inside a relocated bundle directory.
pub const RELOCATION_MAP_FILENAME: &str = "relocation-map.json";

/// Mapping from original image reference to its replacement.
pub type RelocationMap = BTreeMap<String, String>;

/// A bundle manifest together with its image relocation map
#[derive(Debug, Clone, PartialEq)]
pub struct RelocatedBundle {
    pub bundle: Bundle,
    pub relocation_map: RelocationMap,
}

impl RelocatedBundle {
    /// Wrap a bundle with an empty relocation map.
    pub fn from_bundle(bundle: Bundle) -> Self {
        Self {
            bundle,
            relocation_map: RelocationMap::new(),
        }
    }

    /// Load a bundle manifest and its sibling relocation map.
    ///
    /// `path` points at the manifest file; the relocation map is looked up
    /// next to it under [`RELOCATION_MAP_FILENAME`].
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let bundle = read_bundle(path).context("Failed to read bundle")?;

        let dir = path.parent().unwrap_or_else(|| Path::new(""));
        let relocation_map = read_relocation_map(&dir.join(RELOCATION_MAP_FILENAME))
            .context("Failed to read relocation map")?;

        Ok(Self {
            bundle,
            relocation_map,
        })
    }

    /// Store the manifest and the relocation map as canonical JSON in `dir`.
    pub fn store(&self, dir: &Path) -> anyhow::Result<()> {
        let bundle_path = dir.join(BUNDLE_FILENAME);
        let bytes = self.bundle.to_canonical_json()?;
        write_artifact(&bundle_path, &bytes).context("Failed to store bundle")?;

        let map_path = dir.join(RELOCATION_MAP_FILENAME);
        let bytes = to_canonical_vec(&self.relocation_map)
            .context("Failed to serialize relocation map")?;
        write_artifact(&map_path, &bytes).context("Failed to store relocation map")?;

        Ok(())
    }

    /// Replacement for `image`, or `image` itself when it is not relocated.
    pub fn relocated_image<'a>(&'a self, image: &'a str) -> &'a str {
        relocate(&self.relocation_map, image)
    }

    /// Content digest over the canonical manifest and relocation map.
    pub fn digest(&self) -> anyhow::Result<String> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.bundle.to_canonical_json()?);
        hasher.update(
            &to_canonical_vec(&self.relocation_map)
                .context("Failed to serialize relocation map")?,
        );
        Ok(hasher.finalize().to_hex().to_string())
    }
}

/// Look up `image` in `map`, falling back to the original reference.
pub fn relocate<'a>(map: &'a RelocationMap, image: &'a str) -> &'a str {
    map.get(image).map(String::as_str).unwrap_or(image)
}

fn read_bundle(path: &Path) -> anyhow::Result<Bundle> {
    let data = std::fs::read(path)
        .with_context(|| format!("Failed to read file {}", path.display()))?;
    Bundle::from_slice(&data)
        .with_context(|| format!("Failed to unmarshal file {}", path.display()))
}

fn read_relocation_map(path: &Path) -> anyhow::Result<RelocationMap> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(RelocationMap::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("Failed to read file {}", path.display()));
        }
    };
    serde_json::from_slice(&data)
        .with_context(|| format!("Failed to unmarshal file {}", path.display()))
}

fn write_artifact(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    std::fs::write(path, bytes)
        .with_context(|| format!("Failed to write file {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644))
            .with_context(|| format!("Failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}
