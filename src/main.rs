//! CLI entry point. Thin by design: parse flags, resolve configuration, hand off to
//! the library's orchestration pipeline, and translate the result into a process exit
//! code. This is the only place in the crate that writes directly to stdout/stderr.

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::Parser;

use splunk_orchestrator::clock::utc_now_rfc3339;
use splunk_orchestrator::collaborators::NullCredentialsProvider;
use splunk_orchestrator::config::{self, RawOverrides};
use splunk_orchestrator::manifest::VersionsManifest;
use splunk_orchestrator::orchestrator::{self, Pipeline};
use splunk_orchestrator::{logging, OrchestratorError};

/// Deploy and manage a containerized Splunk cluster on a detected local container
/// runtime.
#[derive(Debug, Parser)]
#[command(name = "splunk-orchestrator", version, about)]
struct Cli {
    /// Template file to merge below environment and CLI overrides.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Host port for the application sidecar.
    #[arg(long, value_name = "N")]
    port: Option<u16>,

    /// Application data directory on the host.
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Compose project name.
    #[arg(long, value_name = "NAME")]
    project_name: Option<String>,

    /// Prompt interactively for unspecified values.
    #[arg(short, long)]
    interactive: bool,

    /// Enable Prometheus + Grafana monitoring.
    #[arg(long, conflicts_with = "no_monitoring")]
    with_monitoring: bool,
    /// Disable Prometheus + Grafana monitoring.
    #[arg(long)]
    no_monitoring: bool,

    /// Enable the Splunk services.
    #[arg(long, conflicts_with = "no_splunk")]
    with_splunk: bool,
    /// Disable the Splunk services.
    #[arg(long)]
    no_splunk: bool,

    /// Splunk topology: `single` or `cluster`.
    #[arg(long, value_name = "single|cluster")]
    splunk_mode: Option<String>,

    /// Web port for the first search head.
    #[arg(long, value_name = "N")]
    splunk_web_port: Option<u16>,

    /// Number of indexers.
    #[arg(long, value_name = "N")]
    indexers: Option<u32>,
    /// Number of search heads.
    #[arg(long, value_name = "N")]
    search_heads: Option<u32>,
    /// Index replication factor.
    #[arg(long, value_name = "N")]
    replication_factor: Option<u32>,
    /// Index search factor.
    #[arg(long, value_name = "N")]
    search_factor: Option<u32>,
    /// Splunk data directory on the host.
    #[arg(long, value_name = "DIR")]
    splunk_data_dir: Option<PathBuf>,
    /// Splunk admin password; generated if omitted.
    #[arg(long, value_name = "PWD")]
    splunk_password: Option<String>,
    /// Splunk secret key; generated if omitted.
    #[arg(long, value_name = "KEY")]
    splunk_secret: Option<String>,

    /// Application CPU limit, e.g. `1.5`.
    #[arg(long, value_name = "F")]
    app_cpu: Option<String>,
    /// Application memory limit, e.g. `512M`.
    #[arg(long, value_name = "SIZE")]
    app_mem: Option<String>,

    /// Log every mutating command instead of executing it.
    #[arg(long)]
    dry_run: bool,
    /// Verbose (debug-level) logging.
    #[arg(long)]
    verbose: bool,
    /// Logging verbosity: `debug`, `info`, `warn`, `error`.
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,
    /// Skip preflight and supply-chain validation entirely.
    #[arg(long)]
    no_validation: bool,
    /// Write the normalized, secret-redacted configuration to this path.
    #[arg(long, value_name = "PATH")]
    write_effective: Option<PathBuf>,

    /// Path to the versions manifest.
    #[arg(long, value_name = "FILE", default_value = "versions.env")]
    versions: PathBuf,
}

fn env_overrides() -> RawOverrides {
    let mut map = BTreeMap::new();
    for (key, value) in std::env::vars() {
        map.insert(key, value);
    }
    RawOverrides::from_env(&map)
}

fn cli_overrides(cli: &Cli) -> RawOverrides {
    let mut overrides = RawOverrides::new();
    if let Some(port) = cli.port {
        overrides = overrides.with("APP_PORT", port.to_string());
    }
    if let Some(dir) = &cli.data_dir {
        overrides = overrides.with("DATA_DIR", dir.to_string_lossy().into_owned());
    }
    if let Some(name) = &cli.project_name {
        overrides = overrides.with("PROJECT_NAME", name.clone());
    }
    if cli.interactive {
        overrides = overrides.with("INTERACTIVE", "true");
    }
    if cli.with_monitoring {
        overrides = overrides.with("ENABLE_MONITORING", "true");
    }
    if cli.no_monitoring {
        overrides = overrides.with("ENABLE_MONITORING", "false");
    }
    if cli.with_splunk {
        overrides = overrides.with("ENABLE_SPLUNK", "true");
    }
    if cli.no_splunk {
        overrides = overrides.with("ENABLE_SPLUNK", "false");
    }
    if let Some(mode) = &cli.splunk_mode {
        overrides = overrides.with("SPLUNK_MODE", mode.clone());
    }
    if let Some(port) = cli.splunk_web_port {
        overrides = overrides.with("SPLUNK_WEB_PORT", port.to_string());
    }
    if let Some(n) = cli.indexers {
        overrides = overrides.with("INDEXER_COUNT", n.to_string());
    }
    if let Some(n) = cli.search_heads {
        overrides = overrides.with("SEARCH_HEAD_COUNT", n.to_string());
    }
    if let Some(n) = cli.replication_factor {
        overrides = overrides.with("REPLICATION_FACTOR", n.to_string());
    }
    if let Some(n) = cli.search_factor {
        overrides = overrides.with("SEARCH_FACTOR", n.to_string());
    }
    if let Some(dir) = &cli.splunk_data_dir {
        overrides = overrides.with("SPLUNK_DATA_DIR", dir.to_string_lossy().into_owned());
    }
    if let Some(password) = &cli.splunk_password {
        overrides = overrides.with("SPLUNK_PASSWORD", password.clone());
    }
    if let Some(secret) = &cli.splunk_secret {
        overrides = overrides.with("SPLUNK_SECRET", secret.clone());
    }
    if let Some(cpu) = &cli.app_cpu {
        overrides = overrides.with("APP_CPU_LIMIT", cpu.clone());
    }
    if let Some(mem) = &cli.app_mem {
        overrides = overrides.with("APP_MEM_LIMIT", mem.clone());
    }
    if let Some(level) = &cli.log_level {
        overrides = overrides.with("LOG_LEVEL", level.clone());
    }
    if cli.dry_run {
        overrides = overrides.with("DRY_RUN", "true");
    }
    if cli.verbose {
        overrides = overrides.with("VERBOSE", "true");
    }
    if cli.no_validation {
        overrides = overrides.with("NO_VALIDATION", "true");
    }
    overrides
}

fn template_overrides(cli: &Cli) -> Result<Option<RawOverrides>, OrchestratorError> {
    match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            Ok(Some(RawOverrides::from_template_text(&text)))
        }
        None => Ok(None),
    }
}

async fn run() -> Result<i32, OrchestratorError> {
    let cli = Cli::parse();

    let manifest = VersionsManifest::load(&cli.versions)?;
    let template = template_overrides(&cli)?;
    let env = env_overrides();
    let cli_layer = cli_overrides(&cli);
    let cwd = std::env::current_dir()?;
    let credentials = NullCredentialsProvider;

    let outcome = config::resolve(template.as_ref(), &env, &cli_layer, &cwd, &credentials)?;
    let effective = outcome.config;

    logging::init(effective.log_level, effective.verbose);

    for warning in &outcome.warnings {
        tracing::warn!("{warning}");
    }

    if let Some(path) = &cli.write_effective {
        let redacted = effective.redacted();
        let json = serde_json::to_vec_pretty(&redacted)?;
        std::fs::write(path, json)?;
        set_owner_only(path)?;
    }

    let pipeline = Pipeline::new(std::env::current_dir()?, utc_now_rfc3339());
    let report = orchestrator::run(&effective, &manifest, &pipeline).await?;

    for warning in &report.warnings {
        tracing::warn!("{warning}");
    }
    tracing::info!(compose = %report.compose_path.display(), "orchestration complete");
    for (service, health) in &report.service_health {
        tracing::info!(service, healthy = health.is_healthy(), "service health");
    }

    Ok(0)
}

#[cfg(unix)]
fn set_owner_only(path: &std::path::Path) -> Result<(), OrchestratorError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_owner_only(_path: &std::path::Path) -> Result<(), OrchestratorError> {
    Ok(())
}

fn report_failure(err: &OrchestratorError) {
    eprintln!("error: {err}");
    if let Some(remediation) = err.remediation() {
        eprintln!("hint: {remediation}");
    }
}

#[tokio::main]
async fn main() {
    let exit_code = match run().await {
        Ok(code) => code,
        Err(err) => {
            report_failure(&err);
            err.exit_code()
        }
    };
    std::process::exit(exit_code);
}
