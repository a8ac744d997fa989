//! Drivers execute bundle operations.
//!
//! A [`DriverFactory`] prepares a driver for one run. The prepared driver
//! shares a [`DiagnosticBuffer`] with its caller; whatever the driver writes
//! there is reported alongside a failed run.

pub mod debug;

pub use debug::DebugDriver;

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;

use crate::bundle::{Bundle, InvocationImage};
use crate::context::BindMount;

/// Everything a driver needs to run one bundle action
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Operation {
    pub installation: String,
    pub action: String,
    pub revision: String,
    pub bundle: Bundle,

    /// Invocation image to run, with its reference already relocated
    pub image: InvocationImage,

    pub parameters: BTreeMap<String, Value>,

    /// Environment variables for the invocation image
    pub environment: BTreeMap<String, String>,

    /// Files to place in the invocation image, keyed by absolute path
    pub files: BTreeMap<String, String>,
}

pub trait Driver: std::fmt::Debug {
    fn name(&self) -> &str;

    /// Whether this driver can run images of `image_type`.
    fn handles(&self, image_type: &str) -> bool;

    /// Run `operation`, writing its standard output to `out`.
    fn run(&self, operation: &Operation, out: &mut dyn Write) -> anyhow::Result<()>;
}

/// Shared sink for a driver's error stream.
///
/// Clones write into the same buffer.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl DiagnosticBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, lossily decoded.
    pub fn contents(&self) -> String {
        match self.inner.lock() {
            Ok(buf) => String::from_utf8_lossy(&buf).into_owned(),
            Err(poisoned) => String::from_utf8_lossy(&poisoned.into_inner()).into_owned(),
        }
    }
}

impl Write for DiagnosticBuffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut buf = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("diagnostic buffer poisoned"))?;
        buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A driver ready for one run, plus the buffer it reports diagnostics to
#[derive(Debug)]
pub struct PreparedDriver {
    pub driver: Box<dyn Driver>,
    pub diagnostics: DiagnosticBuffer,
}

pub trait DriverFactory: std::fmt::Debug {
    fn prepare(&self, name: &str, mount: Option<&BindMount>) -> anyhow::Result<PreparedDriver>;
}

/// Constructs a driver given the mount it needs and its diagnostic sink.
pub type DriverConstructor = fn(Option<&BindMount>, DiagnosticBuffer) -> Box<dyn Driver>;

/// Factory over drivers compiled into bosun.
#[derive(Debug)]
pub struct BuiltinDriverFactory {
    drivers: Vec<(String, DriverConstructor)>,
}

impl Default for BuiltinDriverFactory {
    fn default() -> Self {
        Self::with_default_drivers()
    }
}

impl BuiltinDriverFactory {
    pub fn new() -> Self {
        Self {
            drivers: Vec::new(),
        }
    }

    pub fn with_default_drivers() -> Self {
        let mut factory = Self::new();
        factory.register(debug::DRIVER_NAME, debug_driver);
        factory
    }

    /// Register a driver; a later registration under the same name wins.
    pub fn register(&mut self, name: impl Into<String>, constructor: DriverConstructor) {
        let name = name.into();
        self.drivers.retain(|(existing, _)| *existing != name);
        self.drivers.push((name, constructor));
    }

    pub fn names(&self) -> Vec<&str> {
        self.drivers.iter().map(|(name, _)| name.as_str()).collect()
    }
}

impl DriverFactory for BuiltinDriverFactory {
    fn prepare(&self, name: &str, mount: Option<&BindMount>) -> anyhow::Result<PreparedDriver> {
        let (_, constructor) = self
            .drivers
            .iter()
            .find(|(candidate, _)| candidate == name)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Unknown driver '{}' (available: {})",
                    name,
                    self.names().join(", ")
                )
            })?;

        let diagnostics = DiagnosticBuffer::new();
        Ok(PreparedDriver {
            driver: constructor(mount, diagnostics.clone()),
            diagnostics,
        })
    }
}

fn debug_driver(mount: Option<&BindMount>, diagnostics: DiagnosticBuffer) -> Box<dyn Driver> {
    Box::new(DebugDriver::new(mount.cloned(), diagnostics))
}
