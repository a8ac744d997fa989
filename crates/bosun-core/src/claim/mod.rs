//! Installation claims.
//!
//! A claim is the durable record of one installation: the bundle currently
//! bound to it, the resolved parameters and the outcome of the last action.
//! Claims are rewritten whole on every update.

pub mod store;

pub use store::ClaimStore;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bundle::Bundle;
use crate::error::ClaimStoreError;
use crate::relocation::RelocationMap;

pub const ACTION_INSTALL: &str = "install";
pub const ACTION_UPGRADE: &str = "upgrade";

/// Outcome of the most recent action applied to a claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Unknown,
    Underway,
    Success,
    Failure,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Unknown => write!(f, "unknown"),
            Status::Underway => write!(f, "underway"),
            Status::Success => write!(f, "success"),
            Status::Failure => write!(f, "failure"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimResult {
    pub action: String,
    pub status: Status,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// Persisted record of one installation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    /// Installation name, immutable after creation
    pub installation: String,

    /// Changes on every update
    pub revision: String,

    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,

    /// Bundle currently bound to the installation
    pub bundle: Bundle,

    /// Relocation map of the bound bundle
    #[serde(default)]
    pub relocation_map: RelocationMap,

    /// Resolved parameter values
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,

    pub result: ClaimResult,
}

impl Claim {
    /// Create a fresh claim for `installation` bound to `bundle`.
    pub fn new(installation: &str, bundle: Bundle) -> Result<Self, ClaimStoreError> {
        validate_installation_name(installation)?;
        let now = Utc::now();
        Ok(Self {
            installation: installation.to_string(),
            revision: new_revision(installation),
            created: now,
            modified: now,
            bundle,
            relocation_map: RelocationMap::new(),
            parameters: BTreeMap::new(),
            result: ClaimResult {
                action: ACTION_INSTALL.to_string(),
                status: Status::Unknown,
                message: String::new(),
            },
        })
    }

    /// Record that `action` reached `status`, issuing a new revision.
    pub fn update(&mut self, action: &str, status: Status) {
        self.modified = Utc::now();
        self.revision = new_revision(&self.installation);
        self.result = ClaimResult {
            action: action.to_string(),
            status,
            message: String::new(),
        };
    }

    /// Record the final status of the action in progress.
    ///
    /// Keeps the revision issued when the action started.
    pub fn complete(&mut self, status: Status, message: impl Into<String>) {
        self.modified = Utc::now();
        self.result.status = status;
        self.result.message = message.into();
    }
}

/// Installation names double as store keys, so they must be path-safe.
pub fn validate_installation_name(name: &str) -> Result<(), ClaimStoreError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => {
            chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(ClaimStoreError::InvalidName(name.to_string()))
    }
}

fn new_revision(installation: &str) -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let mut hasher = blake3::Hasher::new();
    hasher.update(installation.as_bytes());
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    hasher.update(&nanos.to_le_bytes());
    hasher.update(&COUNTER.fetch_add(1, Ordering::Relaxed).to_le_bytes());
    hasher.update(&std::process::id().to_le_bytes());
    hasher.finalize().to_hex()[..32].to_string()
}
