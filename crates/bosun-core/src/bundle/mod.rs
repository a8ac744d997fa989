//! Bundle manifests
//!
//! A bundle declares the parameters, credentials and images of an
//! installable application. Manifests are immutable once loaded and are
//! always written with canonical JSON formatting.

pub mod canonical;
pub mod manifest;

pub use canonical::{to_canonical_string, to_canonical_vec};
pub use manifest::{
    Bundle, CredentialRequirement, Destination, Image, InvocationImage, ParameterDefinition,
    ParameterType,
};
