//! Deployment target contexts.
//!
//! A context names the engine endpoint a bundle action runs against. The
//! upgrade workflow picks one context per invocation and derives from it
//! whether the driver must bind-mount the engine socket.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::claim::Claim;
use crate::config::{BosunConfig, ContextEntry};
use crate::parameters::ORCHESTRATOR_PARAMETER;

pub const DEFAULT_CONTEXT: &str = "default";
pub const DEFAULT_ENDPOINT: &str = "unix:///var/run/docker.sock";

/// Environment variable selecting the target context.
pub const TARGET_CONTEXT_ENV: &str = "BOSUN_TARGET_CONTEXT";

/// Path the engine socket is mounted at inside the invocation image.
pub const SOCKET_MOUNT_TARGET: &str = "/var/run/docker.sock";

/// A resolved deployment target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetContext {
    pub name: String,
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orchestrator: Option<String>,
}

/// Source of context definitions.
pub trait ContextStore: std::fmt::Debug {
    fn get(&self, name: &str) -> anyhow::Result<TargetContext>;
}

/// Contexts declared in `config.toml`, plus the implicit local default.
#[derive(Debug, Clone, Default)]
pub struct ConfigContextStore {
    contexts: BTreeMap<String, ContextEntry>,
}

impl ConfigContextStore {
    pub fn new(config: &BosunConfig) -> Self {
        Self {
            contexts: config.contexts.clone(),
        }
    }
}

impl ContextStore for ConfigContextStore {
    fn get(&self, name: &str) -> anyhow::Result<TargetContext> {
        if let Some(entry) = self.contexts.get(name) {
            return Ok(TargetContext {
                name: name.to_string(),
                endpoint: entry.endpoint.clone(),
                orchestrator: entry.orchestrator.clone(),
            });
        }
        if name == DEFAULT_CONTEXT {
            return Ok(TargetContext {
                name: DEFAULT_CONTEXT.to_string(),
                endpoint: DEFAULT_ENDPOINT.to_string(),
                orchestrator: None,
            });
        }
        anyhow::bail!("Context '{}' is not defined", name)
    }
}

/// Pick the target context name: explicit, then `$BOSUN_TARGET_CONTEXT`,
/// then the configured current context, then `default`.
pub fn resolve_target_context(explicit: Option<&str>, current: Option<&str>) -> String {
    let from_env = std::env::var(TARGET_CONTEXT_ENV).ok();
    select_target_context(explicit, from_env.as_deref(), current)
}

pub fn select_target_context(
    explicit: Option<&str>,
    from_env: Option<&str>,
    current: Option<&str>,
) -> String {
    [explicit, from_env, current]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|name| !name.is_empty())
        .unwrap_or(DEFAULT_CONTEXT)
        .to_string()
}

/// Host path the driver must mount into the invocation image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub source: PathBuf,
    pub target: PathBuf,
}

/// Decide whether the engine socket must be mounted for this claim.
///
/// Kubernetes targets never need it; otherwise a local `unix://` endpoint
/// is mounted at [`SOCKET_MOUNT_TARGET`].
pub fn required_bind_mount(claim: &Claim, context: &TargetContext) -> Option<BindMount> {
    let orchestrator = claim
        .parameters
        .get(ORCHESTRATOR_PARAMETER)
        .and_then(Value::as_str)
        .or(context.orchestrator.as_deref());
    if orchestrator == Some("kubernetes") {
        return None;
    }

    let socket = context.endpoint.strip_prefix("unix://")?;
    if socket.is_empty() {
        return None;
    }
    Some(BindMount {
        source: PathBuf::from(socket),
        target: PathBuf::from(SOCKET_MOUNT_TARGET),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::Bundle;
    use serde_json::json;

    fn claim() -> Claim {
        let bundle = Bundle::from_json(
            r#"{"name":"shop","version":"1.0.0","invocationImages":[{"image":"example/shop:1"}]}"#,
        )
        .unwrap();
        Claim::new("shop", bundle).unwrap()
    }

    fn context(endpoint: &str) -> TargetContext {
        TargetContext {
            name: "test".into(),
            endpoint: endpoint.into(),
            orchestrator: None,
        }
    }

    #[test]
    fn test_select_target_context_precedence() {
        assert_eq!(select_target_context(Some("a"), Some("b"), Some("c")), "a");
        assert_eq!(select_target_context(None, Some("b"), Some("c")), "b");
        assert_eq!(select_target_context(Some(""), None, Some("c")), "c");
        assert_eq!(select_target_context(None, None, None), DEFAULT_CONTEXT);
    }

    #[test]
    fn test_config_store_knows_default_and_declared() {
        let mut config = BosunConfig::default();
        config.contexts.insert(
            "remote".into(),
            ContextEntry {
                endpoint: "tcp://10.0.0.5:2376".into(),
                orchestrator: Some("swarm".into()),
                description: None,
            },
        );
        let store = ConfigContextStore::new(&config);

        assert_eq!(store.get("default").unwrap().endpoint, DEFAULT_ENDPOINT);
        let remote = store.get("remote").unwrap();
        assert_eq!(remote.endpoint, "tcp://10.0.0.5:2376");
        assert_eq!(remote.orchestrator.as_deref(), Some("swarm"));
        assert!(store.get("missing").is_err());
    }

    #[test]
    fn test_unix_endpoint_requires_bind_mount() {
        let mount = required_bind_mount(&claim(), &context("unix:///run/user/1000/docker.sock"))
            .unwrap();
        assert_eq!(mount.source, PathBuf::from("/run/user/1000/docker.sock"));
        assert_eq!(mount.target, PathBuf::from(SOCKET_MOUNT_TARGET));
    }

    #[test]
    fn test_tcp_endpoint_needs_no_bind_mount() {
        assert!(required_bind_mount(&claim(), &context("tcp://10.0.0.5:2376")).is_none());
    }

    #[test]
    fn test_kubernetes_orchestrator_needs_no_bind_mount() {
        let mut claim = claim();
        claim
            .parameters
            .insert(ORCHESTRATOR_PARAMETER.into(), json!("kubernetes"));
        assert!(required_bind_mount(&claim, &context(DEFAULT_ENDPOINT)).is_none());
    }
}
