//! Credential resolution and validation
//!
//! Credentials are assembled from ordered sources into one transient
//! [`CredentialSet`], then checked against the bundle's requirements before
//! any driver runs. Values never reach the claim store.

pub mod set;

pub use set::{CredentialSetFile, CredentialStrategy, ValueSource};

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::bundle::{Bundle, CredentialRequirement, to_canonical_string};
use crate::context::TargetContext;
use crate::error::MissingCredentials;
use crate::parameters::{ParameterSet, shares_registry_creds};
use crate::registry::{RegistryAuthProvider, registry_hosts};
use crate::relocation::RelocationMap;

/// Credential receiving the canonical JSON of the target context.
pub const CONTEXT_CREDENTIAL: &str = "bosun.context";

/// Credential receiving registry logins for the bundle's images.
pub const REGISTRY_CREDENTIAL: &str = "bosun.registry-creds";

/// Resolved credential values keyed by name.
///
/// `Debug` lists names only.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CredentialSet {
    values: BTreeMap<String, String>,
}

impl CredentialSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value; an existing entry is replaced and the override logged.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>, origin: &str) {
        let name = name.into();
        if self.values.insert(name.clone(), value.into()).is_some() {
            warn!(credential = %name, origin, "credential overridden by a later source");
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl std::fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

/// One layer of credential values.
pub type CredentialSource<'a> =
    Box<dyn FnOnce(&Bundle, &mut CredentialSet) -> anyhow::Result<()> + 'a>;

/// Apply `sources` in order to an empty set.
pub fn prepare_credential_set<'a>(
    bundle: &Bundle,
    sources: impl IntoIterator<Item = CredentialSource<'a>>,
) -> anyhow::Result<CredentialSet> {
    let mut creds = CredentialSet::new();
    for source in sources {
        source(bundle, &mut creds)?;
    }
    debug!(count = creds.len(), "credential set prepared");
    Ok(creds)
}

/// Credentials from named sets or set files, later sets winning.
pub fn add_named_credential_sets<'a>(names: &'a [String], dir: &'a Path) -> CredentialSource<'a> {
    Box::new(move |_bundle: &Bundle, creds: &mut CredentialSet| {
        for name in names {
            let file = CredentialSetFile::load(name, dir)?;
            let values = file.resolve()?;
            debug!(set = %name, count = values.len(), "credential set loaded");
            for (key, value) in values {
                creds.insert(key, value, name);
            }
        }
        Ok(())
    })
}

/// The target context, when the bundle asks for [`CONTEXT_CREDENTIAL`].
pub fn add_context_credentials<'a>(context: &'a TargetContext) -> CredentialSource<'a> {
    Box::new(move |bundle: &Bundle, creds: &mut CredentialSet| {
        if !bundle.credentials.contains_key(CONTEXT_CREDENTIAL) {
            return Ok(());
        }
        let value = to_canonical_string(context).context("Failed to encode target context")?;
        creds.insert(CONTEXT_CREDENTIAL, value, "target context");
        Ok(())
    })
}

/// Registry logins for every host the bundle pulls from.
///
/// Only applies when the bundle declares [`REGISTRY_CREDENTIAL`] and the
/// resolved parameters opted into sharing registry credentials.
pub fn add_registry_credentials<'a>(
    parameters: &'a ParameterSet,
    provider: &'a dyn RegistryAuthProvider,
    relocation_map: &'a RelocationMap,
) -> CredentialSource<'a> {
    Box::new(move |bundle: &Bundle, creds: &mut CredentialSet| {
        if !bundle.credentials.contains_key(REGISTRY_CREDENTIAL)
            || !shares_registry_creds(parameters)
        {
            return Ok(());
        }

        let mut auths = Map::new();
        for host in registry_hosts(bundle, relocation_map) {
            if let Some(auth) = provider.credentials(&host) {
                auths.insert(
                    host,
                    json!({ "username": auth.username, "password": auth.password }),
                );
            }
        }
        debug!(hosts = auths.len(), "registry credentials shared with bundle");
        let value = to_canonical_string(&Value::Object(auths))
            .context("Failed to encode registry credentials")?;
        creds.insert(REGISTRY_CREDENTIAL, value, "registry auth");
        Ok(())
    })
}

/// Check that every required credential is present.
///
/// Reports all missing names at once, sorted.
pub fn validate(
    creds: &CredentialSet,
    requirements: &BTreeMap<String, CredentialRequirement>,
) -> Result<(), MissingCredentials> {
    let names: Vec<String> = requirements
        .iter()
        .filter(|(name, requirement)| requirement.required && !creds.contains(name))
        .map(|(name, _)| name.clone())
        .collect();

    if names.is_empty() {
        Ok(())
    } else {
        Err(MissingCredentials { names })
    }
}
