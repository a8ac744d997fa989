//! Bosun - bundle installation manager
//!
//! Usage:
//!   bosun upgrade <installation> [--bundle REF] [--set KEY=VALUE]...
//!   bosun list
//!   bosun status <installation>

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bosun_core::claim::{Claim, ClaimStore};
use bosun_core::config::BosunConfig;
use bosun_core::driver::BuiltinDriverFactory;
use bosun_core::home::BosunHome;
use bosun_core::registry::{MirrorRegistry, RegistryClient, UnconfiguredRegistry};
use bosun_core::resolver::ReferenceResolver;
use bosun_core::upgrade::{UpgradeOptions, UpgradeReport, UpgradeService};

#[derive(Parser)]
#[command(name = "bosun")]
#[command(about = "Bundle installation manager", long_about = None)]
struct Cli {
    /// Bosun home directory (defaults to $BOSUN_HOME, then ~/.bosun)
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upgrade an installation
    Upgrade(Box<UpgradeArgs>),

    /// List installations
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Show the recorded state of an installation
    Status {
        /// Installation name
        installation: String,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },
}

#[derive(Args)]
struct UpgradeArgs {
    /// Installation name
    installation: String,

    /// Parameter file (TOML, or JSON with a .json extension); repeatable
    #[arg(short = 'f', long = "parameters-file")]
    parameters_files: Vec<PathBuf>,

    /// Parameter override KEY=VALUE; repeatable
    #[arg(long = "set")]
    overrides: Vec<String>,

    /// Credential set name or file; repeatable
    #[arg(short = 'c', long = "credential-set")]
    credential_sets: Vec<String>,

    /// Registry that may be reached insecurely; repeatable
    #[arg(long = "insecure-registries")]
    insecure_registries: Vec<String>,

    /// Pull the bundle even if it is cached
    #[arg(long)]
    pull: bool,

    /// Bundle file, directory or registry reference to upgrade to
    #[arg(long)]
    bundle: Option<String>,

    /// Share registry credentials with the bundle
    #[arg(long)]
    with_registry_auth: bool,

    /// Target context (defaults to $BOSUN_TARGET_CONTEXT, then config)
    #[arg(long)]
    target_context: Option<String>,

    /// Driver used to run the invocation image
    #[arg(long)]
    driver: Option<String>,

    /// Output format
    #[arg(long, default_value = "table")]
    format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// Machine-readable JSON
    Json,
}

fn main() -> Result<()> {
    // Logs go to stderr; stdout carries driver output
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bosun=info,bosun_core=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let home = match cli.home {
        Some(dir) => BosunHome::new(dir),
        None => BosunHome::from_env()?,
    };
    tracing::debug!(home = %home.root().display(), "using bosun home");

    match cli.command {
        Commands::Upgrade(args) => run_upgrade(&home, *args),
        Commands::List { format } => run_list(&home, format),
        Commands::Status {
            installation,
            format,
        } => run_status(&home, &installation, format),
    }
}

fn run_upgrade(home: &BosunHome, args: UpgradeArgs) -> Result<()> {
    let config = BosunConfig::load(&home.config_path())?;

    let registry: Box<dyn RegistryClient> = match &config.registry_mirror {
        Some(root) => Box::new(MirrorRegistry::new(root.clone())),
        None => Box::new(UnconfiguredRegistry),
    };
    let resolver = ReferenceResolver::new(home.bundles_dir(), registry);
    let service = UpgradeService::from_home(
        home,
        &config,
        Box::new(resolver),
        Box::new(BuiltinDriverFactory::default()),
    );

    let mut insecure_registries = config.insecure_registries.clone();
    insecure_registries.extend(args.insecure_registries);

    let mut options = UpgradeOptions::new()
        .with_parameter_files(args.parameters_files)
        .with_overrides(args.overrides)
        .with_credential_sets(args.credential_sets)
        .with_insecure_registries(insecure_registries)
        .with_pull(args.pull)
        .with_send_registry_auth(args.with_registry_auth);
    if let Some(bundle) = args.bundle {
        options = options.with_bundle(bundle);
    }
    if let Some(context) = args.target_context {
        options = options.with_target_context(context);
    }
    if let Some(driver) = args.driver {
        options = options.with_driver(driver);
    }

    let mut stdout = std::io::stdout().lock();
    let report = service.upgrade(&args.installation, &options, &mut stdout)?;
    drop(stdout);

    print_upgrade_report(&report, args.format)
}

fn print_upgrade_report(report: &UpgradeReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            println!("Upgraded {}", report.installation);
            println!("  Revision: {}", report.revision);
            if report.bundle_changed {
                println!("  Bundle:   replaced");
            }
            for (name, value) in &report.parameters {
                println!("  {name} = {value}");
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
    }
    Ok(())
}

fn run_list(home: &BosunHome, format: OutputFormat) -> Result<()> {
    let claims = readable_claims(&ClaimStore::filesystem(home.claims_dir()))?;

    match format {
        OutputFormat::Table => {
            if claims.is_empty() {
                println!("No installations");
                return Ok(());
            }
            println!("{:<24} {:<20} {:<10} {:<10}", "NAME", "BUNDLE", "ACTION", "STATUS");
            for claim in claims {
                println!(
                    "{:<24} {:<20} {:<10} {:<10}",
                    claim.installation,
                    format!("{}@{}", claim.bundle.name, claim.bundle.version),
                    claim.result.action,
                    claim.result.status.to_string()
                );
            }
        }
        OutputFormat::Json => {
            let mut entries = Vec::new();
            for claim in claims {
                entries.push(serde_json::json!({
                    "installation": claim.installation,
                    "bundle": claim.bundle.name,
                    "version": claim.bundle.version.to_string(),
                    "action": claim.result.action,
                    "status": claim.result.status,
                    "modified": claim.modified,
                }));
            }
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
    }
    Ok(())
}

/// Every claim that can be read; unreadable records are skipped with a warning.
fn readable_claims(store: &ClaimStore) -> Result<Vec<Claim>> {
    let mut claims = Vec::new();
    for name in store.list()? {
        match store.read(&name) {
            Ok(claim) => claims.push(claim),
            Err(err) => tracing::warn!(installation = %name, error = %err, "skipping unreadable claim"),
        }
    }
    Ok(claims)
}

fn run_status(home: &BosunHome, installation: &str, format: OutputFormat) -> Result<()> {
    let claim = ClaimStore::filesystem(home.claims_dir()).read(installation)?;

    match format {
        OutputFormat::Table => {
            println!("Installation: {}", claim.installation);
            println!("Bundle:       {}@{}", claim.bundle.name, claim.bundle.version);
            println!("Revision:     {}", claim.revision);
            println!("Modified:     {}", claim.modified.to_rfc3339());
            println!("Last action:  {} ({})", claim.result.action, claim.result.status);
            if !claim.result.message.is_empty() {
                println!("Message:      {}", claim.result.message);
            }
            if !claim.parameters.is_empty() {
                println!("Parameters:");
                for (name, value) in &claim.parameters {
                    println!("  {name} = {value}");
                }
            }
            if !claim.relocation_map.is_empty() {
                println!("Relocated images:");
                for (from, to) in &claim.relocation_map {
                    println!("  {from} -> {to}");
                }
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&claim)?);
        }
    }
    Ok(())
}
