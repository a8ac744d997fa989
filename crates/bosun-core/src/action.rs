//! The upgrade action: turns a claim into a driver operation and records
//! the outcome on the claim.

use std::collections::BTreeMap;
use std::io::Write;

use anyhow::Context;
use serde_json::Value;
use tracing::{debug, warn};

use crate::bundle::{InvocationImage, to_canonical_string};
use crate::claim::{ACTION_UPGRADE, Claim, Status};
use crate::credentials::CredentialSet;
use crate::driver::{Driver, Operation};
use crate::relocation::relocate;

/// Path of the relocation map inside the invocation image.
pub const RELOCATION_MAPPING_PATH: &str = "/cnab/app/relocation-mapping.json";

pub struct UpgradeAction<'a> {
    driver: &'a dyn Driver,
}

impl<'a> UpgradeAction<'a> {
    pub fn new(driver: &'a dyn Driver) -> Self {
        Self { driver }
    }

    /// Run the upgrade against `claim`.
    ///
    /// The claim is marked underway with a fresh revision, then success or
    /// failure. On failure the claim message carries the error and the
    /// error is returned.
    pub fn run(
        &self,
        claim: &mut Claim,
        creds: &CredentialSet,
        out: &mut dyn Write,
    ) -> anyhow::Result<()> {
        claim.update(ACTION_UPGRADE, Status::Underway);

        let result = self
            .operation(claim, creds)
            .and_then(|operation| {
                debug!(
                    installation = %operation.installation,
                    driver = self.driver.name(),
                    image = %operation.image.image,
                    "running driver"
                );
                self.driver.run(&operation, out)
            });

        match result {
            Ok(()) => {
                claim.complete(Status::Success, "");
                Ok(())
            }
            Err(err) => {
                let message = format!("{err:#}");
                warn!(installation = %claim.installation, error = %message, "upgrade action failed");
                claim.complete(Status::Failure, message);
                Err(err)
            }
        }
    }

    /// Build the operation the driver runs for `claim`.
    pub fn operation(&self, claim: &Claim, creds: &CredentialSet) -> anyhow::Result<Operation> {
        let image = self.select_image(claim)?;
        let mut environment = BTreeMap::new();
        let mut files = BTreeMap::new();

        environment.insert("CNAB_INSTALLATION_NAME".into(), claim.installation.clone());
        environment.insert("CNAB_ACTION".into(), ACTION_UPGRADE.into());
        environment.insert("CNAB_REVISION".into(), claim.revision.clone());
        environment.insert("CNAB_BUNDLE_NAME".into(), claim.bundle.name.clone());
        environment.insert(
            "CNAB_BUNDLE_VERSION".into(),
            claim.bundle.version.to_string(),
        );

        for (name, value) in &claim.parameters {
            let rendered = render_value(value);
            match claim
                .bundle
                .parameters
                .get(name)
                .and_then(|definition| definition.destination.as_ref())
            {
                Some(destination) => {
                    if let Some(env) = &destination.env {
                        environment.insert(env.clone(), rendered.clone());
                    }
                    if let Some(path) = &destination.path {
                        files.insert(path.clone(), rendered);
                    }
                }
                None => {
                    environment.insert(env_name(name), rendered);
                }
            }
        }

        for (name, requirement) in &claim.bundle.credentials {
            let Some(value) = creds.get(name) else {
                continue;
            };
            if requirement.env.is_none() && requirement.path.is_none() {
                environment.insert(env_name(name), value.to_string());
                continue;
            }
            if let Some(env) = &requirement.env {
                environment.insert(env.clone(), value.to_string());
            }
            if let Some(path) = &requirement.path {
                files.insert(path.clone(), value.to_string());
            }
        }

        if !claim.relocation_map.is_empty() {
            let mapping = to_canonical_string(&claim.relocation_map)
                .context("Failed to encode relocation map")?;
            files.insert(RELOCATION_MAPPING_PATH.into(), mapping);
        }

        Ok(Operation {
            installation: claim.installation.clone(),
            action: ACTION_UPGRADE.into(),
            revision: claim.revision.clone(),
            bundle: claim.bundle.clone(),
            image,
            parameters: claim.parameters.clone(),
            environment,
            files,
        })
    }

    fn select_image(&self, claim: &Claim) -> anyhow::Result<InvocationImage> {
        let image = claim
            .bundle
            .invocation_images
            .iter()
            .find(|image| self.driver.handles(&image.image_type))
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Driver '{}' cannot run any invocation image of bundle '{}'",
                    self.driver.name(),
                    claim.bundle.name
                )
            })?;

        let mut image = image.clone();
        image.image = relocate(&claim.relocation_map, &image.image).to_string();
        Ok(image)
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `web.port` -> `WEB_PORT`
fn env_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{Bundle, CredentialRequirement, Destination, ParameterDefinition, ParameterType};
    use serde_json::json;

    #[derive(Debug)]
    struct HelmOnly;

    impl Driver for HelmOnly {
        fn name(&self) -> &str {
            "helm-only"
        }

        fn handles(&self, image_type: &str) -> bool {
            image_type == "helm"
        }

        fn run(&self, _operation: &Operation, _out: &mut dyn Write) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[derive(Debug)]
    struct Broken;

    impl Driver for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn handles(&self, _image_type: &str) -> bool {
            true
        }

        fn run(&self, _operation: &Operation, _out: &mut dyn Write) -> anyhow::Result<()> {
            anyhow::bail!("engine unreachable")
        }
    }

    fn claim() -> Claim {
        let mut bundle = Bundle::from_json(
            r#"{"name":"shop","version":"1.2.0","invocationImages":[
                {"image":"example/shop-installer:1","imageType":"docker"},
                {"image":"example/shop-chart:1","imageType":"helm"}]}"#,
        )
        .unwrap();
        let mut port = ParameterDefinition::new(ParameterType::Integer);
        port.destination = Some(Destination {
            env: Some("PORT".into()),
            path: Some("/cnab/app/port".into()),
        });
        bundle.parameters.insert("web.port".into(), port);
        bundle
            .parameters
            .insert("debug".into(), ParameterDefinition::new(ParameterType::Boolean));
        bundle.credentials.insert(
            "kubeconfig".into(),
            CredentialRequirement {
                path: Some("/root/.kube/config".into()),
                ..Default::default()
            },
        );
        bundle
            .credentials
            .insert("api-token".into(), CredentialRequirement::default());

        let mut claim = Claim::new("shop", bundle).unwrap();
        claim.parameters.insert("web.port".into(), json!(8080));
        claim.parameters.insert("debug".into(), json!(true));
        claim
            .relocation_map
            .insert("example/shop-chart:1".into(), "mirror.local/shop-chart:1".into());
        claim
    }

    fn creds() -> CredentialSet {
        let mut creds = CredentialSet::new();
        creds.insert("kubeconfig", "apiVersion: v1", "test");
        creds.insert("api-token", "s3cr3t", "test");
        creds
    }

    #[test]
    fn test_operation_environment_and_files() {
        let claim = claim();
        let operation = UpgradeAction::new(&HelmOnly).operation(&claim, &creds()).unwrap();

        assert_eq!(operation.action, ACTION_UPGRADE);
        assert_eq!(operation.environment["CNAB_INSTALLATION_NAME"], "shop");
        assert_eq!(operation.environment["CNAB_BUNDLE_VERSION"], "1.2.0");
        assert_eq!(operation.environment["PORT"], "8080");
        assert_eq!(operation.environment["DEBUG"], "true");
        assert_eq!(operation.environment["API_TOKEN"], "s3cr3t");
        assert_eq!(operation.files["/cnab/app/port"], "8080");
        assert_eq!(operation.files["/root/.kube/config"], "apiVersion: v1");
        assert_eq!(
            operation.files[RELOCATION_MAPPING_PATH],
            r#"{"example/shop-chart:1":"mirror.local/shop-chart:1"}"#
        );
    }

    #[test]
    fn test_selects_handled_image_and_relocates_it() {
        let operation = UpgradeAction::new(&HelmOnly)
            .operation(&claim(), &creds())
            .unwrap();
        assert_eq!(operation.image.image_type, "helm");
        assert_eq!(operation.image.image, "mirror.local/shop-chart:1");
    }

    #[test]
    fn test_no_relocation_file_without_map() {
        let mut claim = claim();
        claim.relocation_map.clear();
        let operation = UpgradeAction::new(&HelmOnly).operation(&claim, &creds()).unwrap();
        assert!(!operation.files.contains_key(RELOCATION_MAPPING_PATH));
    }

    #[test]
    fn test_run_marks_success_with_new_revision() {
        let mut claim = claim();
        let before = claim.revision.clone();
        UpgradeAction::new(&HelmOnly)
            .run(&mut claim, &creds(), &mut Vec::new())
            .unwrap();
        assert_ne!(claim.revision, before);
        assert_eq!(claim.result.action, ACTION_UPGRADE);
        assert_eq!(claim.result.status, Status::Success);
    }

    #[test]
    fn test_run_failure_marks_claim() {
        let mut claim = claim();
        let err = UpgradeAction::new(&Broken)
            .run(&mut claim, &creds(), &mut Vec::new())
            .unwrap_err();
        assert!(err.to_string().contains("engine unreachable"));
        assert_eq!(claim.result.status, Status::Failure);
        assert_eq!(claim.result.message, "engine unreachable");
    }

    #[test]
    fn test_no_handled_image_is_a_run_failure() {
        #[derive(Debug)]
        struct Nothing;

        impl Driver for Nothing {
            fn name(&self) -> &str {
                "nothing"
            }
            fn handles(&self, _image_type: &str) -> bool {
                false
            }
            fn run(&self, _operation: &Operation, _out: &mut dyn Write) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let mut claim = claim();
        assert!(
            UpgradeAction::new(&Nothing)
                .run(&mut claim, &creds(), &mut Vec::new())
                .is_err()
        );
        assert_eq!(claim.result.status, Status::Failure);
    }
}
