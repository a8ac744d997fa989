//! Bosun Core Library
//!
//! Tracks installed bundles through persisted claims and upgrades them:
//! a new bundle, parameters and credentials are merged into the existing
//! installation and the change is run through a pluggable driver.
//!
//! Also provides the relocated bundle storage format, which keeps a bundle
//! manifest next to the image relocation map used to repoint it at another
//! registry.

pub mod action;
pub mod bundle;
pub mod claim;
pub mod config;
pub mod context;
pub mod credentials;
pub mod crud;
pub mod driver;
pub mod error;
pub mod home;
pub mod parameters;
pub mod registry;
pub mod relocation;
pub mod resolver;
pub mod upgrade;

/// Re-exports of commonly used types
pub mod prelude {
    // Bundles
    pub use crate::bundle::{Bundle, CredentialRequirement, ParameterDefinition, ParameterType};
    pub use crate::relocation::{RelocatedBundle, RelocationMap};

    // Claims
    pub use crate::claim::{Claim, ClaimResult, ClaimStore, Status};
    pub use crate::crud::{FileSystemStore, KeyValueStore, MemoryStore};

    // Configuration
    pub use crate::config::BosunConfig;
    pub use crate::home::BosunHome;

    // Execution
    pub use crate::driver::{DiagnosticBuffer, Driver, DriverFactory, Operation, PreparedDriver};

    // Upgrade
    pub use crate::error::UpgradeError;
    pub use crate::upgrade::{UpgradeOptions, UpgradeReport, UpgradeService};
}
