//! Parameter merging
//!
//! Resolves the parameter values of an installation from layered sources:
//! bundle defaults (lowest) -> parameter files -> command-line overrides ->
//! synthesized flags (highest). Sources are applied left to right over one
//! accumulator, and the result is checked against the bundle schema.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::bundle::Bundle;
use crate::error::ParameterError;

/// Parameter the bundle may declare to receive the registry-auth flag.
pub const SHARE_REGISTRY_CREDS_PARAMETER: &str = "bosun.share-registry-creds";

/// Parameter naming the orchestrator the bundle deploys to.
pub const ORCHESTRATOR_PARAMETER: &str = "bosun.orchestrator";

/// Resolved parameter values, keyed by parameter name.
pub type ParameterSet = BTreeMap<String, Value>;

/// One layer of parameter values.
///
/// A source only sets the keys it names; other keys keep whatever lower
/// layers put there.
pub type ParameterSource<'a> =
    Box<dyn FnOnce(&Bundle, &mut ParameterSet) -> Result<(), ParameterError> + 'a>;

/// Apply `sources` in order, then resolve the result against `bundle`.
pub fn merge_bundle_parameters<'a>(
    bundle: &Bundle,
    sources: impl IntoIterator<Item = ParameterSource<'a>>,
) -> Result<ParameterSet, ParameterError> {
    let mut supplied = ParameterSet::new();
    for source in sources {
        source(bundle, &mut supplied)?;
    }
    resolve_against_bundle(bundle, supplied)
}

/// Values from parameter files; later files win.
///
/// Files ending in `.json` are parsed as JSON, anything else as TOML.
/// Nested tables are flattened with `.` separators.
pub fn with_file_parameters<'a>(paths: &'a [PathBuf]) -> ParameterSource<'a> {
    Box::new(move |_bundle: &Bundle, params: &mut ParameterSet| {
        for path in paths {
            let values = load_parameters_file(path)?;
            debug!(path = %path.display(), count = values.len(), "parameters file loaded");
            params.extend(values);
        }
        Ok(())
    })
}

/// `KEY=VALUE` overrides from the command line.
pub fn with_command_line_parameters<'a>(overrides: &'a [String]) -> ParameterSource<'a> {
    Box::new(move |_bundle: &Bundle, params: &mut ParameterSet| {
        for raw in overrides {
            let (key, value) = raw
                .split_once('=')
                .filter(|(key, _)| !key.trim().is_empty())
                .ok_or_else(|| ParameterError::MalformedOverride(raw.clone()))?;
            params.insert(key.trim().to_string(), Value::String(value.to_string()));
        }
        Ok(())
    })
}

/// Tell the bundle whether registry credentials are forwarded.
///
/// Only applies when the bundle declares [`SHARE_REGISTRY_CREDS_PARAMETER`].
pub fn with_send_registry_auth<'a>(send: bool) -> ParameterSource<'a> {
    Box::new(move |bundle: &Bundle, params: &mut ParameterSet| {
        if bundle.parameters.contains_key(SHARE_REGISTRY_CREDS_PARAMETER) {
            params.insert(SHARE_REGISTRY_CREDS_PARAMETER.to_string(), Value::Bool(send));
        }
        Ok(())
    })
}

/// Whether resolved parameters ask for registry credentials to be shared.
pub fn shares_registry_creds(params: &ParameterSet) -> bool {
    params
        .get(SHARE_REGISTRY_CREDS_PARAMETER)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn resolve_against_bundle(
    bundle: &Bundle,
    mut supplied: ParameterSet,
) -> Result<ParameterSet, ParameterError> {
    if let Some(unknown) = supplied.keys().find(|k| !bundle.parameters.contains_key(*k)) {
        return Err(ParameterError::UnknownParameter(unknown.clone()));
    }

    let mut resolved = ParameterSet::new();
    for (name, definition) in &bundle.parameters {
        let raw = match supplied.remove(name).or_else(|| definition.default.clone()) {
            Some(raw) => raw,
            None if definition.required => {
                return Err(ParameterError::MissingRequired(name.clone()));
            }
            None => continue,
        };
        let value = definition
            .coerce(raw)
            .and_then(|value| definition.check(&value).map(|_| value))
            .map_err(|reason| ParameterError::InvalidValue {
                name: name.clone(),
                reason,
            })?;
        resolved.insert(name.clone(), value);
    }
    Ok(resolved)
}

fn load_parameters_file(path: &Path) -> Result<ParameterSet, ParameterError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ParameterError::File(format!("{}: {e}", path.display())))?;

    let root: Value = if path.extension().and_then(|e| e.to_str()) == Some("json") {
        serde_json::from_str(&content)
            .map_err(|e| ParameterError::File(format!("{}: {e}", path.display())))?
    } else {
        let table: toml::Table = toml::from_str(&content)
            .map_err(|e| ParameterError::File(format!("{}: {e}", path.display())))?;
        serde_json::to_value(table)
            .map_err(|e| ParameterError::File(format!("{}: {e}", path.display())))?
    };

    let Value::Object(map) = root else {
        return Err(ParameterError::File(format!(
            "{}: expected a table of parameters",
            path.display()
        )));
    };

    let mut flat = ParameterSet::new();
    flatten(None, map, &mut flat);
    Ok(flat)
}

fn flatten(prefix: Option<&str>, map: serde_json::Map<String, Value>, out: &mut ParameterSet) {
    for (key, value) in map {
        let key = match prefix {
            Some(prefix) => format!("{prefix}.{key}"),
            None => key,
        };
        match value {
            Value::Object(nested) => flatten(Some(&key), nested, out),
            other => {
                out.insert(key, other);
            }
        }
    }
}
