//! End-to-end tests driving the `bosun` binary.

use std::path::Path;
use std::process::{Command, Output};

use bosun_core::bundle::{Bundle, ParameterDefinition, ParameterType};
use bosun_core::claim::{Claim, ClaimStore, Status};
use bosun_core::home::BosunHome;
use serde_json::json;
use tempfile::TempDir;

const ENV_OVERRIDES: [&str; 3] = ["BOSUN_HOME", "BOSUN_TARGET_CONTEXT", "RUST_LOG"];

fn bosun(home: &Path, args: &[&str]) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_bosun"));
    for key in ENV_OVERRIDES {
        cmd.env_remove(key);
    }
    cmd.arg("--home")
        .arg(home)
        .args(args)
        .output()
        .expect("Failed to run bosun")
}

fn seed_installation(home: &BosunHome) {
    let mut bundle = Bundle::from_json(
        r#"{"name":"shop","version":"1.0.0",
            "invocationImages":[{"image":"registry.example.com/shop/installer:1.0.0"}]}"#,
    )
    .expect("fixture bundle is valid");
    bundle.parameters.insert(
        "replicas".into(),
        ParameterDefinition::new(ParameterType::Integer).with_default(json!(1)),
    );
    let claim = Claim::new("shop", bundle).expect("valid installation name");
    ClaimStore::filesystem(home.claims_dir())
        .store(&claim)
        .expect("Failed to seed claim");
}

#[test]
fn list_without_installations() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let output = bosun(temp.path(), &["list"]);

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("No installations"));
}

#[test]
fn list_skips_unreadable_claims() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let home = BosunHome::new(temp.path());
    seed_installation(&home);
    std::fs::write(home.claims_dir().join("broken.json"), "not json").unwrap();

    let output = bosun(temp.path(), &["list", "--format", "json"]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let entries: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(entries.as_array().unwrap().len(), 1);
    assert_eq!(entries[0]["installation"], "shop");
    assert!(String::from_utf8_lossy(&output.stderr).contains("skipping unreadable claim"));
}

#[test]
fn upgrade_with_debug_driver_records_success() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let home = BosunHome::new(temp.path());
    seed_installation(&home);

    let output = bosun(
        temp.path(),
        &["upgrade", "shop", "--set", "replicas=2", "--target-context", "default"],
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(stdout.contains(r#""CNAB_INSTALLATION_NAME": "shop""#), "{stdout}");
    assert!(stdout.contains("Upgraded shop"), "{stdout}");

    let claim = ClaimStore::filesystem(home.claims_dir()).read("shop").unwrap();
    assert_eq!(claim.result.status, Status::Success);
    assert_eq!(claim.parameters["replicas"], json!(2));
}

#[test]
fn upgrade_of_unknown_installation_fails() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let output = bosun(temp.path(), &["upgrade", "ghost"]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("installation 'ghost' not found"));
}

#[test]
fn status_prints_claim_as_json() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    seed_installation(&BosunHome::new(temp.path()));

    let output = bosun(temp.path(), &["status", "shop", "--format", "json"]);
    assert!(output.status.success());

    let claim: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(claim["installation"], "shop");
    assert_eq!(claim["result"]["status"], "unknown");
}
