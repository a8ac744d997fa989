//! Upgrade orchestration
//!
//! Upgrading an installation runs a fixed sequence against its claim:
//!
//! 1. load the claim
//! 2. optionally rebind it to a new bundle
//! 3. merge parameters
//! 4. select the target context and prepare a driver
//! 5. resolve and validate credentials
//! 6. run the upgrade action
//! 7. persist the claim
//! 8. report
//!
//! Failures before step 6 leave the stored claim untouched. Once the driver
//! has run, the claim is always written back, whether the run succeeded or
//! not. A run failure takes precedence over a persistence failure.

use std::io::Write;
use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::action::UpgradeAction;
use crate::claim::{Claim, ClaimStore};
use crate::config::BosunConfig;
use crate::context::{
    ConfigContextStore, ContextStore, TargetContext, required_bind_mount, resolve_target_context,
};
use crate::credentials::{
    CredentialSet, add_context_credentials, add_named_credential_sets, add_registry_credentials,
    prepare_credential_set, validate,
};
use crate::driver::{DriverFactory, PreparedDriver, debug::DRIVER_NAME as DEBUG_DRIVER};
use crate::error::{ClaimStoreError, UpgradeError};
use crate::home::BosunHome;
use crate::parameters::{
    ParameterSet, merge_bundle_parameters, with_command_line_parameters, with_file_parameters,
    with_send_registry_auth,
};
use crate::registry::{ConfigRegistryAuth, RegistryAuthProvider};
use crate::resolver::{BundleResolver, PullOptions};

/// Options for one upgrade
#[derive(Debug, Clone, Default)]
pub struct UpgradeOptions {
    /// Parameter files, applied in order
    pub parameter_files: Vec<PathBuf>,

    /// `KEY=VALUE` parameter overrides
    pub overrides: Vec<String>,

    /// Credential set names or files, applied in order
    pub credential_sets: Vec<String>,

    /// Registries that may be reached insecurely
    pub insecure_registries: Vec<String>,

    /// Pull the bundle even when it is cached
    pub pull: bool,

    /// Bundle to rebind the installation to; `None` keeps the current one
    pub bundle: Option<String>,

    /// Share registry credentials with the bundle
    pub send_registry_auth: bool,

    pub target_context: Option<String>,

    pub driver: Option<String>,
}

impl UpgradeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parameter_files(mut self, files: Vec<PathBuf>) -> Self {
        self.parameter_files = files;
        self
    }

    pub fn with_overrides(mut self, overrides: Vec<String>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_credential_sets(mut self, sets: Vec<String>) -> Self {
        self.credential_sets = sets;
        self
    }

    pub fn with_insecure_registries(mut self, registries: Vec<String>) -> Self {
        self.insecure_registries = registries;
        self
    }

    pub fn with_pull(mut self, pull: bool) -> Self {
        self.pull = pull;
        self
    }

    pub fn with_bundle(mut self, bundle: impl Into<String>) -> Self {
        self.bundle = Some(bundle.into());
        self
    }

    pub fn with_send_registry_auth(mut self, send: bool) -> Self {
        self.send_registry_auth = send;
        self
    }

    pub fn with_target_context(mut self, context: impl Into<String>) -> Self {
        self.target_context = Some(context.into());
        self
    }

    pub fn with_driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = Some(driver.into());
        self
    }

    /// The bundle override, when one was given and is not blank.
    fn bundle_reference(&self) -> Option<&str> {
        self.bundle
            .as_deref()
            .map(str::trim)
            .filter(|reference| !reference.is_empty())
    }
}

/// Summary of a successful upgrade
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpgradeReport {
    pub installation: String,
    pub revision: String,
    pub bundle_changed: bool,
    pub parameters: ParameterSet,
}

#[derive(Debug)]
pub struct UpgradeService {
    claims: ClaimStore,
    resolver: Box<dyn BundleResolver>,
    drivers: Box<dyn DriverFactory>,
    contexts: Box<dyn ContextStore>,
    registry_auth: Box<dyn RegistryAuthProvider>,
    credentials_dir: PathBuf,
    current_context: Option<String>,
    default_driver: String,
}

impl UpgradeService {
    pub fn new(
        claims: ClaimStore,
        resolver: Box<dyn BundleResolver>,
        drivers: Box<dyn DriverFactory>,
    ) -> Self {
        Self {
            claims,
            resolver,
            drivers,
            contexts: Box::new(ConfigContextStore::default()),
            registry_auth: Box::new(ConfigRegistryAuth::default()),
            credentials_dir: PathBuf::from("credentials"),
            current_context: None,
            default_driver: DEBUG_DRIVER.to_string(),
        }
    }

    /// Service over the claims and credential sets of `home`, with contexts,
    /// registry logins and defaults taken from `config`.
    pub fn from_home(
        home: &BosunHome,
        config: &BosunConfig,
        resolver: Box<dyn BundleResolver>,
        drivers: Box<dyn DriverFactory>,
    ) -> Self {
        let mut service = Self::new(ClaimStore::filesystem(home.claims_dir()), resolver, drivers)
            .with_contexts(Box::new(ConfigContextStore::new(config)))
            .with_registry_auth(Box::new(ConfigRegistryAuth::new(config)))
            .with_credentials_dir(home.credentials_dir());
        service.current_context = config.current_context.clone();
        if let Some(driver) = &config.driver {
            service.default_driver = driver.clone();
        }
        service
    }

    pub fn with_contexts(mut self, contexts: Box<dyn ContextStore>) -> Self {
        self.contexts = contexts;
        self
    }

    pub fn with_registry_auth(mut self, provider: Box<dyn RegistryAuthProvider>) -> Self {
        self.registry_auth = provider;
        self
    }

    pub fn with_credentials_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.credentials_dir = dir.into();
        self
    }

    pub fn with_current_context(mut self, context: impl Into<String>) -> Self {
        self.current_context = Some(context.into());
        self
    }

    pub fn with_default_driver(mut self, driver: impl Into<String>) -> Self {
        self.default_driver = driver.into();
        self
    }

    pub fn claims(&self) -> &ClaimStore {
        &self.claims
    }

    /// Upgrade `installation`, writing driver output to `out`.
    pub fn upgrade(
        &self,
        installation: &str,
        options: &UpgradeOptions,
        out: &mut dyn Write,
    ) -> Result<UpgradeReport, UpgradeError> {
        info!(installation, "upgrading installation");

        let mut claim = self.claims.read(installation).map_err(|err| match err {
            ClaimStoreError::NotFound(name) => UpgradeError::NotFound(name),
            other => UpgradeError::Store(other),
        })?;

        let bundle_changed = self.rebind_bundle(&mut claim, options)?;

        claim.parameters = merge_bundle_parameters(
            &claim.bundle,
            vec![
                with_file_parameters(&options.parameter_files),
                with_command_line_parameters(&options.overrides),
                with_send_registry_auth(options.send_registry_auth),
            ],
        )?;
        debug!(installation, count = claim.parameters.len(), "parameters merged");

        let (context, prepared) = self.prepare_execution(&claim, options)?;

        let creds = self.resolve_credentials(&claim, &context, options)?;
        validate(&creds, &claim.bundle.credentials)?;

        let PreparedDriver {
            driver,
            diagnostics,
        } = prepared;
        let run = UpgradeAction::new(driver.as_ref()).run(&mut claim, &creds, out);
        drop(driver);

        let persisted = self.claims.store(&claim);

        match (run, persisted) {
            (Err(err), persisted) => {
                if let Err(persist_err) = persisted {
                    warn!(
                        installation,
                        error = %persist_err,
                        "failed to persist claim after failed upgrade"
                    );
                }
                Err(UpgradeError::Execution {
                    message: format!("{err:#}"),
                    diagnostics: diagnostics.contents(),
                })
            }
            (Ok(()), Err(source)) => Err(UpgradeError::Persistence {
                installation: installation.to_string(),
                source,
            }),
            (Ok(()), Ok(())) => {
                info!(installation, revision = %claim.revision, "upgrade complete");
                Ok(UpgradeReport {
                    installation: claim.installation,
                    revision: claim.revision,
                    bundle_changed,
                    parameters: claim.parameters,
                })
            }
        }
    }

    fn rebind_bundle(&self, claim: &mut Claim, options: &UpgradeOptions) -> Result<bool, UpgradeError> {
        let Some(reference) = options.bundle_reference() else {
            debug!(installation = %claim.installation, "keeping current bundle");
            return Ok(false);
        };

        let pull = PullOptions {
            pull: options.pull,
            insecure_registries: options.insecure_registries.clone(),
        };
        let relocated =
            self.resolver
                .resolve(reference, &pull)
                .map_err(|err| UpgradeError::Resolution {
                    reference: reference.to_string(),
                    message: format!("{err:#}"),
                })?;

        info!(
            installation = %claim.installation,
            %reference,
            bundle = %relocated.bundle.name,
            version = %relocated.bundle.version,
            "rebinding installation to new bundle"
        );
        claim.bundle = relocated.bundle;
        claim.relocation_map = relocated.relocation_map;
        Ok(true)
    }

    fn prepare_execution(
        &self,
        claim: &Claim,
        options: &UpgradeOptions,
    ) -> Result<(TargetContext, PreparedDriver), UpgradeError> {
        let name = resolve_target_context(
            options.target_context.as_deref(),
            self.current_context.as_deref(),
        );
        let context = self
            .contexts
            .get(&name)
            .map_err(|err| UpgradeError::PrepareExecution(format!("{err:#}")))?;

        let mount = required_bind_mount(claim, &context);
        let driver = options.driver.as_deref().unwrap_or(&self.default_driver);
        debug!(
            context = %context.name,
            driver,
            bind_mount = mount.is_some(),
            "preparing driver"
        );
        let prepared = self
            .drivers
            .prepare(driver, mount.as_ref())
            .map_err(|err| UpgradeError::PrepareExecution(format!("{err:#}")))?;
        Ok((context, prepared))
    }

    fn resolve_credentials(
        &self,
        claim: &Claim,
        context: &TargetContext,
        options: &UpgradeOptions,
    ) -> Result<CredentialSet, UpgradeError> {
        prepare_credential_set(
            &claim.bundle,
            vec![
                add_named_credential_sets(&options.credential_sets, &self.credentials_dir),
                add_context_credentials(context),
                add_registry_credentials(
                    &claim.parameters,
                    self.registry_auth.as_ref(),
                    &claim.relocation_map,
                ),
            ],
        )
        .map_err(|err| UpgradeError::Credentials(format!("{err:#}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_bundle_override_is_ignored() {
        assert_eq!(UpgradeOptions::new().bundle_reference(), None);
        assert_eq!(UpgradeOptions::new().with_bundle("  ").bundle_reference(), None);
        assert_eq!(
            UpgradeOptions::new()
                .with_bundle(" ./shop ")
                .bundle_reference(),
            Some("./shop")
        );
    }

    #[test]
    fn test_options_builder() {
        let options = UpgradeOptions::new()
            .with_overrides(vec!["replicas=3".into()])
            .with_credential_sets(vec!["prod".into()])
            .with_pull(true)
            .with_send_registry_auth(true)
            .with_target_context("remote")
            .with_driver("debug");
        assert_eq!(options.overrides, vec!["replicas=3"]);
        assert_eq!(options.credential_sets, vec!["prod"]);
        assert!(options.pull);
        assert!(options.send_registry_auth);
        assert_eq!(options.target_context.as_deref(), Some("remote"));
        assert_eq!(options.driver.as_deref(), Some("debug"));
    }
}
