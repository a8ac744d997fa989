//! Bundle manifest schema
//!
//! Defines the structure of `bundle.json`: the invocation images that carry
//! out bundle actions, the component images they deploy, and the parameters
//! and credentials an installation must supply.

use std::collections::BTreeMap;

use anyhow::Context;
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use super::canonical::to_canonical_vec;

/// Bundle manifest - the root structure of bundle.json
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    /// Manifest schema version (e.g., "v1.0.0")
    #[serde(default)]
    pub schema_version: String,

    /// Machine-readable bundle name
    pub name: String,

    /// Semantic version of the bundle
    pub version: Version,

    /// Brief description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Images that execute bundle actions
    pub invocation_images: Vec<InvocationImage>,

    /// Component images deployed by the bundle, keyed by logical name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub images: BTreeMap<String, Image>,

    /// Declared parameters
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, ParameterDefinition>,

    /// Declared credential requirements
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub credentials: BTreeMap<String, CredentialRequirement>,

    /// Fields bosun does not interpret (maintainers, custom, actions, ...),
    /// kept so a stored manifest matches the one loaded
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// An image able to run bundle actions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationImage {
    /// Image reference (e.g., "registry.example.com/shop/installer:1.2.0")
    pub image: String,

    /// Runtime kind the image needs
    #[serde(default = "default_image_type")]
    pub image_type: String,

    /// Content digest, when pinned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A component image deployed by the bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub image: String,

    #[serde(default = "default_image_type")]
    pub image_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn default_image_type() -> String {
    "docker".to_string()
}

/// Parameter value type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Integer,
    Number,
    Boolean,
}

impl std::fmt::Display for ParameterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParameterType::String => write!(f, "string"),
            ParameterType::Integer => write!(f, "integer"),
            ParameterType::Number => write!(f, "number"),
            ParameterType::Boolean => write!(f, "boolean"),
        }
    }
}

/// Where a value is delivered inside the invocation image
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Declared parameter with its schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    #[serde(rename = "type")]
    pub param_type: ParameterType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,

    /// Allowed values
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<Number>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<Number>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<Destination>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParameterDefinition {
    /// Create a definition of the given type with no constraints.
    pub fn new(param_type: ParameterType) -> Self {
        Self {
            param_type,
            default: None,
            required: false,
            allowed: None,
            minimum: None,
            maximum: None,
            destination: None,
            description: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Convert a supplied value to the declared type.
    ///
    /// Strings are parsed for non-string types; scalars are stringified for
    /// string parameters. Arrays and objects are never accepted.
    pub fn coerce(&self, value: Value) -> Result<Value, String> {
        match (self.param_type, value) {
            (ParameterType::String, Value::String(s)) => Ok(Value::String(s)),
            (ParameterType::String, v @ (Value::Number(_) | Value::Bool(_))) => {
                Ok(Value::String(v.to_string()))
            }
            (ParameterType::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => {
                Ok(Value::Number(n))
            }
            (ParameterType::Integer, Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| format!("'{s}' is not an integer")),
            (ParameterType::Number, Value::Number(n)) => Ok(Value::Number(n)),
            (ParameterType::Number, Value::String(s)) => {
                let trimmed = s.trim();
                if let Ok(i) = trimmed.parse::<i64>() {
                    return Ok(Value::from(i));
                }
                trimmed
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| format!("'{s}' is not a number"))
            }
            (ParameterType::Boolean, Value::Bool(b)) => Ok(Value::Bool(b)),
            (ParameterType::Boolean, Value::String(s)) => match s.trim() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(format!("'{s}' is not a boolean")),
            },
            (expected, other) => Err(format!("expected {expected}, got {other}")),
        }
    }

    /// Check an already-typed value against `enum`, `minimum` and `maximum`.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        if let Some(allowed) = &self.allowed
            && !allowed.iter().any(|candidate| self.same_value(candidate, value))
        {
            let options: Vec<String> = allowed.iter().map(Value::to_string).collect();
            return Err(format!(
                "{value} is not one of the allowed values [{}]",
                options.join(", ")
            ));
        }
        if let Some(n) = value.as_f64() {
            if let Some(min) = &self.minimum
                && min.as_f64().is_some_and(|min| n < min)
            {
                return Err(format!("{value} is below the minimum {min}"));
            }
            if let Some(max) = &self.maximum
                && max.as_f64().is_some_and(|max| n > max)
            {
                return Err(format!("{value} is above the maximum {max}"));
            }
        }
        Ok(())
    }

    /// Numeric parameters compare by value, so `1` matches `1.0`.
    fn same_value(&self, a: &Value, b: &Value) -> bool {
        match (self.param_type, a.as_f64(), b.as_f64()) {
            (ParameterType::Integer | ParameterType::Number, Some(a), Some(b)) => a == b,
            _ => a == b,
        }
    }
}

/// Declared credential requirement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRequirement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default = "default_required")]
    pub required: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Default for CredentialRequirement {
    fn default() -> Self {
        Self {
            env: None,
            path: None,
            required: true,
            description: None,
        }
    }
}

fn default_required() -> bool {
    true
}

impl Bundle {
    /// Parse and validate a manifest from JSON.
    pub fn from_json(input: &str) -> anyhow::Result<Self> {
        let bundle: Self = serde_json::from_str(input).context("Failed to parse bundle manifest")?;
        bundle.validate()?;
        Ok(bundle)
    }

    /// Parse and validate a manifest from JSON bytes.
    pub fn from_slice(input: &[u8]) -> anyhow::Result<Self> {
        let bundle: Self =
            serde_json::from_slice(input).context("Failed to parse bundle manifest")?;
        bundle.validate()?;
        Ok(bundle)
    }

    /// Validate manifest invariants.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("Bundle name must not be empty");
        }
        if self.invocation_images.is_empty() {
            anyhow::bail!(
                "Bundle '{}' declares no invocation images",
                self.name
            );
        }
        for (name, definition) in &self.parameters {
            if let Some(default) = &definition.default {
                let value = definition
                    .coerce(default.clone())
                    .and_then(|v| definition.check(&v).map(|_| v));
                if let Err(reason) = value {
                    anyhow::bail!(
                        "Bundle '{}' has an invalid default for parameter '{}': {}",
                        self.name,
                        name,
                        reason
                    );
                }
            }
        }
        Ok(())
    }

    /// Encode the manifest as canonical JSON.
    pub fn to_canonical_json(&self) -> anyhow::Result<Vec<u8>> {
        to_canonical_vec(self).context("Failed to serialize bundle manifest")
    }

    /// All image references declared by the bundle, invocation images first.
    pub fn image_references(&self) -> Vec<&str> {
        self.invocation_images
            .iter()
            .map(|i| i.image.as_str())
            .chain(self.images.values().map(|i| i.image.as_str()))
            .collect()
    }
}
