//! Shared fixtures for upgrade workflow tests.
#![allow(dead_code)]

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bosun_core::bundle::{Bundle, CredentialRequirement, ParameterDefinition, ParameterType};
use bosun_core::claim::{Claim, ClaimStore};
use bosun_core::context::BindMount;
use bosun_core::crud::{KeyValueStore, MemoryStore};
use bosun_core::driver::{DiagnosticBuffer, Driver, DriverFactory, Operation, PreparedDriver};
use bosun_core::registry::UnconfiguredRegistry;
use bosun_core::relocation::{RelocatedBundle, RelocationMap};
use bosun_core::resolver::ReferenceResolver;
use bosun_core::upgrade::UpgradeService;
use serde_json::json;
use tempfile::TempDir;

// =========================================================================
// Bundles
// =========================================================================

pub fn bundle(name: &str, version: &str) -> Bundle {
    let manifest = json!({
        "schemaVersion": "v1.0.0",
        "name": name,
        "version": version,
        "invocationImages": [{"image": format!("registry.example.com/{name}/installer:{version}")}],
        "images": {"web": {"image": format!("registry.example.com/{name}/web:{version}")}},
    });
    Bundle::from_json(&manifest.to_string()).expect("fixture bundle is valid")
}

pub fn with_integer_parameter(mut bundle: Bundle, name: &str, default: i64) -> Bundle {
    bundle.parameters.insert(
        name.to_string(),
        ParameterDefinition::new(ParameterType::Integer).with_default(json!(default)),
    );
    bundle
}

pub fn with_credential(mut bundle: Bundle, name: &str, required: bool) -> Bundle {
    bundle.credentials.insert(
        name.to_string(),
        CredentialRequirement {
            required,
            ..Default::default()
        },
    );
    bundle
}

/// Write `bundle` and `map` as a relocated bundle directory under `root`.
pub fn write_bundle_dir(root: &Path, dir: &str, bundle: Bundle, map: RelocationMap) -> PathBuf {
    let path = root.join(dir);
    std::fs::create_dir_all(&path).expect("Failed to create bundle dir");
    RelocatedBundle {
        bundle,
        relocation_map: map,
    }
    .store(&path)
    .expect("Failed to store bundle");
    path
}

// =========================================================================
// Drivers
// =========================================================================

/// Observes the drivers a [`ScriptedDriverFactory`] hands out.
#[derive(Debug, Clone, Default)]
pub struct DriverProbe {
    prepared: Arc<AtomicUsize>,
    dropped: Arc<AtomicUsize>,
    operations: Arc<Mutex<Vec<Operation>>>,
    mounts: Arc<Mutex<Vec<Option<BindMount>>>>,
}

impl DriverProbe {
    pub fn prepared(&self) -> usize {
        self.prepared.load(Ordering::SeqCst)
    }

    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }

    /// Whether a prepared driver has not been dropped yet.
    pub fn alive(&self) -> bool {
        self.prepared() > self.dropped()
    }

    pub fn operations(&self) -> Vec<Operation> {
        self.operations.lock().unwrap().clone()
    }

    pub fn mounts(&self) -> Vec<Option<BindMount>> {
        self.mounts.lock().unwrap().clone()
    }
}

#[derive(Debug, Clone)]
pub enum Outcome {
    Succeed,
    Fail { message: String, diagnostics: String },
}

impl Outcome {
    pub fn fail(message: &str, diagnostics: &str) -> Self {
        Outcome::Fail {
            message: message.to_string(),
            diagnostics: diagnostics.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ScriptedDriver {
    probe: DriverProbe,
    outcome: Outcome,
    diagnostics: DiagnosticBuffer,
}

impl Driver for ScriptedDriver {
    fn name(&self) -> &str {
        "scripted"
    }

    fn handles(&self, _image_type: &str) -> bool {
        true
    }

    fn run(&self, operation: &Operation, out: &mut dyn Write) -> anyhow::Result<()> {
        self.probe.operations.lock().unwrap().push(operation.clone());
        writeln!(out, "ran {}", operation.installation)?;
        match &self.outcome {
            Outcome::Succeed => Ok(()),
            Outcome::Fail {
                message,
                diagnostics,
            } => {
                let mut sink = self.diagnostics.clone();
                sink.write_all(diagnostics.as_bytes())?;
                anyhow::bail!("{message}")
            }
        }
    }
}

impl Drop for ScriptedDriver {
    fn drop(&mut self) {
        self.probe.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub struct ScriptedDriverFactory {
    probe: DriverProbe,
    outcome: Outcome,
}

impl ScriptedDriverFactory {
    pub fn new(probe: DriverProbe, outcome: Outcome) -> Self {
        Self { probe, outcome }
    }
}

impl DriverFactory for ScriptedDriverFactory {
    fn prepare(&self, _name: &str, mount: Option<&BindMount>) -> anyhow::Result<PreparedDriver> {
        self.probe.prepared.fetch_add(1, Ordering::SeqCst);
        self.probe.mounts.lock().unwrap().push(mount.cloned());
        let diagnostics = DiagnosticBuffer::new();
        Ok(PreparedDriver {
            driver: Box::new(ScriptedDriver {
                probe: self.probe.clone(),
                outcome: self.outcome.clone(),
                diagnostics: diagnostics.clone(),
            }),
            diagnostics,
        })
    }
}

// =========================================================================
// Claim storage
// =========================================================================

/// In-memory store that counts writes, can refuse them, and notes whether
/// a driver was still alive when each write happened.
#[derive(Debug, Default)]
pub struct ProbedStore {
    inner: MemoryStore,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
    probe: Mutex<Option<DriverProbe>>,
    driver_alive_on_write: Mutex<Vec<bool>>,
}

impl ProbedStore {
    pub fn failing_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    pub fn watch(&self, probe: DriverProbe) {
        *self.probe.lock().unwrap() = Some(probe);
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn driver_alive_on_write(&self) -> Vec<bool> {
        self.driver_alive_on_write.lock().unwrap().clone()
    }

    /// Put a claim in place without counting it as a write.
    pub fn seed(&self, claim: &Claim) {
        let bytes = serde_json::to_vec_pretty(claim).expect("Failed to encode claim");
        self.inner
            .store(&claim.installation, &bytes)
            .expect("Failed to seed claim");
    }

    pub fn stored(&self, installation: &str) -> Option<Claim> {
        let bytes = self.inner.read(installation).ok()?;
        Some(serde_json::from_slice(&bytes).expect("stored claim is valid JSON"))
    }
}

impl KeyValueStore for ProbedStore {
    fn list(&self) -> io::Result<Vec<String>> {
        self.inner.list()
    }

    fn read(&self, key: &str) -> io::Result<Vec<u8>> {
        self.inner.read(key)
    }

    fn store(&self, key: &str, data: &[u8]) -> io::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if let Some(probe) = self.probe.lock().unwrap().as_ref() {
            self.driver_alive_on_write
                .lock()
                .unwrap()
                .push(probe.alive());
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::other("disk full"));
        }
        self.inner.store(key, data)
    }

    fn delete(&self, key: &str) -> io::Result<()> {
        self.inner.delete(key)
    }
}

// =========================================================================
// Harness
// =========================================================================

pub struct Harness {
    pub temp: TempDir,
    pub store: Arc<ProbedStore>,
    pub probe: DriverProbe,
    pub service: UpgradeService,
}

impl Harness {
    pub fn new(outcome: Outcome) -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let store = Arc::new(ProbedStore::default());
        let probe = DriverProbe::default();
        store.watch(probe.clone());

        let resolver =
            ReferenceResolver::new(temp.path().join("bundles"), Box::new(UnconfiguredRegistry));
        let service = UpgradeService::new(
            ClaimStore::new(store.clone()),
            Box::new(resolver),
            Box::new(ScriptedDriverFactory::new(probe.clone(), outcome)),
        )
        .with_credentials_dir(temp.path().join("credentials"))
        .with_default_driver("scripted");

        Self {
            temp,
            store,
            probe,
            service,
        }
    }

    /// Seed an installation of `bundle` named `installation`.
    pub fn install(&self, installation: &str, bundle: Bundle) -> Claim {
        let claim = Claim::new(installation, bundle).expect("valid installation name");
        self.store.seed(&claim);
        claim
    }

    pub fn credentials_dir(&self) -> PathBuf {
        let dir = self.temp.path().join("credentials");
        std::fs::create_dir_all(&dir).expect("Failed to create credentials dir");
        dir
    }
}
