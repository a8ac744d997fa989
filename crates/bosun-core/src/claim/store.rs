//! Claim persistence over a key-value store.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::crud::{FileSystemStore, KeyValueStore};
use crate::error::ClaimStoreError;

use super::{Claim, validate_installation_name};

/// File extension of claim records on disk.
pub const CLAIM_EXTENSION: &str = "json";

/// Reads and writes claims, one record per installation name.
///
/// The store is the only source of truth for whether an installation
/// exists. It does not lock records; concurrent upgrades of the same
/// installation must be serialized by the caller.
#[derive(Debug, Clone)]
pub struct ClaimStore {
    backend: Arc<dyn KeyValueStore>,
}

impl ClaimStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    /// Claim store keeping `<dir>/<installation>.json` files.
    pub fn filesystem(dir: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(FileSystemStore::new(dir, CLAIM_EXTENSION)))
    }

    /// Read the claim for `installation`.
    pub fn read(&self, installation: &str) -> Result<Claim, ClaimStoreError> {
        validate_installation_name(installation)?;
        let bytes = self.backend.read(installation).map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                ClaimStoreError::NotFound(installation.to_string())
            } else {
                ClaimStoreError::Io {
                    name: installation.to_string(),
                    source: err,
                }
            }
        })?;
        let claim: Claim =
            serde_json::from_slice(&bytes).map_err(|source| ClaimStoreError::Deserialize {
                name: installation.to_string(),
                source,
            })?;
        debug!(installation, revision = %claim.revision, "claim read");
        Ok(claim)
    }

    /// Replace the stored record for `claim.installation`.
    pub fn store(&self, claim: &Claim) -> Result<(), ClaimStoreError> {
        validate_installation_name(&claim.installation)?;
        let bytes =
            serde_json::to_vec_pretty(claim).map_err(|source| ClaimStoreError::Serialize {
                name: claim.installation.clone(),
                source,
            })?;
        self.backend
            .store(&claim.installation, &bytes)
            .map_err(|source| ClaimStoreError::Io {
                name: claim.installation.clone(),
                source,
            })?;
        debug!(installation = %claim.installation, revision = %claim.revision, "claim stored");
        Ok(())
    }

    /// Names of all recorded installations, sorted.
    pub fn list(&self) -> Result<Vec<String>, ClaimStoreError> {
        self.backend.list().map_err(|source| ClaimStoreError::Io {
            name: "*".to_string(),
            source,
        })
    }
}
