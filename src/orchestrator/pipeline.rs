//! The Orchestration Engine (C7) itself: a fixed sequence of idempotent, resumable
//! steps, each wrapped by the step ledger's `begin_step`/`complete_step` pair so a
//! surviving marker denotes incompleteness and is surfaced on failure.
//!
//! Step order: `parse -> detect_runtime -> preflight -> prepare_dirs ->
//! write_support_configs -> supply_chain_validate -> pull_images -> render_compose ->
//! up -> wait_health -> report`.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tracing::{info, warn};

use crate::compose::{self, ComposeDocument};
use crate::config::EffectiveConfig;
use crate::error::{OrchestratorError, Result};
use crate::health::{self, ServiceHealth};
use crate::manifest::VersionsManifest;
use crate::platform::{self, Capabilities};
use crate::preflight;
use crate::supply_chain;

use super::cleanup::CleanupRegistry;
use super::lock::WorkdirLock;
use super::retry::{retry, RetryPolicy};
use super::step_ledger::StepLedger;

const STEP_PARSE: &str = "parse";
const STEP_DETECT_RUNTIME: &str = "detect_runtime";
const STEP_PREFLIGHT: &str = "preflight";
const STEP_PREPARE_DIRS: &str = "prepare_dirs";
const STEP_WRITE_SUPPORT_CONFIGS: &str = "write_support_configs";
const STEP_SUPPLY_CHAIN_VALIDATE: &str = "supply_chain_validate";
const STEP_PULL_IMAGES: &str = "pull_images";
const STEP_RENDER_COMPOSE: &str = "render_compose";
const STEP_UP: &str = "up";
const STEP_WAIT_HEALTH: &str = "wait_health";
const STEP_REPORT: &str = "report";

const PROFILE_SPLUNK: &str = "splunk";
const PROFILE_MONITORING: &str = "monitoring";

/// Grace period between `SIGTERM` and `SIGKILL` when a watchdog-enforced deadline
/// expires, given to pull/up invocations.
const TERM_TO_KILL_GRACE: Duration = Duration::from_secs(10);

/// Tunable knobs for a single pipeline run, everything the steps need beyond the
/// resolved configuration itself.
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Directory compose artifacts and the lock file are written under.
    pub workdir: PathBuf,
    /// State directory for step markers; defaults to `StepLedger::default_state_dir()`.
    pub state_dir: Option<PathBuf>,
    /// Retry policy for pull/up/health operations.
    pub retry_policy: RetryPolicy,
    /// Wall-clock deadline for a single `compose`/runtime invocation.
    pub command_deadline: Duration,
    /// Overall deadline for the health waiter.
    pub startup_deadline: Duration,
    /// Poll interval within the health waiter's budget.
    pub poll_interval: Duration,
    /// One-shot grace sleep before the first Splunk health poll.
    pub splunk_grace: Duration,
    /// Timeout for acquiring `.orchestrator.lock`.
    pub lock_timeout: Duration,
    /// Timestamp embedded in the rendered compose document's header comment.
    pub generated_at_utc: String,
}

impl Pipeline {
    /// Construct a pipeline with the spec's documented defaults: 3 retries, 500ms base
    /// delay, 30s max delay, a 5 minute command deadline, a 10 minute startup deadline,
    /// a 5 second poll interval, and a 90 second Splunk boot grace.
    #[must_use]
    pub fn new(workdir: PathBuf, generated_at_utc: String) -> Self {
        Self {
            workdir,
            state_dir: None,
            retry_policy: RetryPolicy::default(),
            command_deadline: Duration::from_secs(300),
            startup_deadline: Duration::from_secs(600),
            poll_interval: Duration::from_secs(5),
            splunk_grace: Duration::from_secs(90),
            lock_timeout: Duration::from_secs(10),
            generated_at_utc,
        }
    }
}

/// Outcome of a completed (or failed-but-cleaned-up) pipeline run.
#[derive(Debug)]
pub struct PipelineReport {
    /// Steps whose marker survived, i.e. did not reach `complete_step`.
    pub incomplete_steps: Vec<String>,
    /// Per-service health at the end of the run (empty on dry-run or pre-`up` failure).
    pub service_health: BTreeMap<String, ServiceHealth>,
    /// Non-fatal warnings collected across every step.
    pub warnings: Vec<String>,
    /// Path to the rendered compose document.
    pub compose_path: PathBuf,
    /// Detected capabilities, for callers that want to report them.
    pub capabilities: Option<Capabilities>,
}

async fn with_step<F, Fut, T>(ledger: &StepLedger, name: &str, f: F) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    ledger.begin_step(name)?;
    let result = f().await;
    if result.is_ok() {
        ledger.complete_step(name)?;
    }
    result
}

fn compose_file_path(workdir: &Path) -> PathBuf {
    workdir.join("docker-compose.yml")
}

async fn output_to_result(command_label: &str, output: std::process::Output) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    let exit_code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    // A handful of exit codes on a cold runtime indicate a transient condition
    // (daemon still starting, registry rate limit); everything else is permanent.
    if matches!(exit_code, 1 | 125) {
        Err(OrchestratorError::transient(command_label, exit_code, stdout, stderr))
    } else {
        Err(OrchestratorError::permanent(command_label, exit_code, stdout, stderr))
    }
}

/// `--profile` flags to pass to `compose up`, gated on profile support and on which
/// optional service groups the config enables.
fn profile_args_for(config: &EffectiveConfig, capabilities: &Capabilities) -> Vec<String> {
    let mut args = Vec::new();
    if !capabilities.profiles() {
        return args;
    }
    if config.enable_splunk {
        args.push("--profile".to_string());
        args.push(PROFILE_SPLUNK.to_string());
    }
    if config.enable_monitoring {
        args.push("--profile".to_string());
        args.push(PROFILE_MONITORING.to_string());
    }
    args
}

async fn pull_one_image(runtime_bin: &'static str, image: &str, deadline: Duration) -> Result<()> {
    let mut command = Command::new(runtime_bin);
    command.arg("pull").arg(image);
    command.stdin(std::process::Stdio::null());
    let output = super::deadline::run_with_watchdog(command, deadline, TERM_TO_KILL_GRACE).await?;
    output_to_result(&format!("{runtime_bin} pull {image}"), output).await
}

/// Run the full pipeline against an already-resolved configuration and versions
/// manifest. `dry_run` (read from `config.dry_run`) logs every mutating command
/// instead of executing it and skips the health wait entirely.
pub async fn run(config: &EffectiveConfig, manifest: &VersionsManifest, pipeline: &Pipeline) -> Result<PipelineReport> {
    let cleanup = Arc::new(CleanupRegistry::new());

    #[cfg(unix)]
    {
        let drain_registry = cleanup.clone();
        tokio::spawn(async move {
            super::cleanup::install_signal_drain(drain_registry).await;
        });
    }

    let state_dir = pipeline
        .state_dir
        .clone()
        .unwrap_or_else(StepLedger::default_state_dir);
    let ledger = StepLedger::open(&state_dir)?;

    let mut lock = WorkdirLock::acquire(&pipeline.workdir, pipeline.lock_timeout)?;
    {
        let lock_path = pipeline.workdir.join(".orchestrator.lock");
        cleanup.register(move || {
            let _ = std::fs::remove_file(&lock_path);
        });
    }

    let result = run_inner(config, manifest, pipeline, &ledger, &state_dir, &cleanup).await;

    lock.release();

    match result {
        Ok(report) => {
            cleanup.drain();
            Ok(report)
        }
        Err(err) => {
            let incomplete = ledger.incomplete_steps();
            warn!(
                error = %err,
                incomplete_steps = ?incomplete,
                "pipeline failed; see incomplete steps for resumption"
            );
            if matches!(err.category(), "runtime" | "command") {
                bounded_teardown(config, pipeline).await;
            }
            cleanup.drain();
            Err(err)
        }
    }
}

/// Best-effort `compose down --remove-orphans` on a fatal failure in `up` or
/// `wait_health`. Never propagates its own error: the original failure is what the
/// caller reports, and a failed teardown only gets a warning.
async fn bounded_teardown(config: &EffectiveConfig, pipeline: &Pipeline) {
    if config.dry_run {
        return;
    }
    let Ok(capabilities) = platform::detect().await else {
        return;
    };
    let compose_path = compose_file_path(&pipeline.workdir);
    if !compose_path.exists() {
        return;
    }
    let compose_path_str = compose_path.to_string_lossy().into_owned();
    let args = ["-f", &compose_path_str, "-p", &config.project_name, "down", "--remove-orphans"];
    match capabilities.compose(&args).await {
        Ok(output) if output.status.success() => info!("bounded teardown (compose down) completed"),
        Ok(output) => warn!(
            stderr = %String::from_utf8_lossy(&output.stderr),
            "bounded teardown exited non-zero"
        ),
        Err(e) => warn!(error = %e, "bounded teardown failed to invoke compose"),
    }
}

async fn run_inner(
    config: &EffectiveConfig,
    manifest: &VersionsManifest,
    pipeline: &Pipeline,
    ledger: &StepLedger,
    state_dir: &Path,
    cleanup: &Arc<CleanupRegistry>,
) -> Result<PipelineReport> {
    let mut warnings = Vec::new();

    warnings.extend(with_step(ledger, STEP_PARSE, || async { Ok(config.validate()?) }).await?);

    let capabilities = with_step(ledger, STEP_DETECT_RUNTIME, || async {
        super::deadline::with_deadline(pipeline.command_deadline, platform::detect()).await
    })
    .await?;

    if !config.no_validation {
        let preflight_warnings = with_step(ledger, STEP_PREFLIGHT, || async {
            preflight::preflight(config, &capabilities).await
        })
        .await?;
        if !preflight_warnings.is_empty() {
            if config.confirm_insufficient {
                warnings.extend(preflight_warnings);
            } else {
                return Err(OrchestratorError::insufficient(preflight_warnings));
            }
        }
    }

    with_step(ledger, STEP_PREPARE_DIRS, || async { prepare_dirs(config, state_dir) }).await?;

    with_step(ledger, STEP_WRITE_SUPPORT_CONFIGS, || async {
        if config.dry_run {
            info!(workdir = %pipeline.workdir.display(), "dry-run: would write .env and support configs");
            return Ok(());
        }
        compose::write_support_configs(config, &pipeline.workdir, cleanup)
    })
    .await?;

    let doc = with_step(ledger, STEP_SUPPLY_CHAIN_VALIDATE, || async {
        let doc: ComposeDocument = compose::synthesize(config, &capabilities, manifest)?;
        if !config.no_validation {
            supply_chain::enforce(manifest, &doc, config.deployment_mode)?;
        }
        Ok(doc)
    })
    .await?;

    with_step(ledger, STEP_PULL_IMAGES, || async {
        if config.dry_run {
            for key in manifest.keys() {
                info!(image = key, "dry-run: would pull image");
            }
            return Ok(());
        }
        if capabilities.air_gapped() {
            info!("air-gapped host detected; skipping image pull step");
            return Ok(());
        }
        let runtime_bin = capabilities.runtime().command();
        for key in manifest.keys() {
            let image = manifest.image_ref(key)?;
            let deadline = pipeline.command_deadline;
            retry(&pipeline.retry_policy, STEP_PULL_IMAGES, || {
                pull_one_image(runtime_bin, &image, deadline)
            })
            .await?;
        }
        Ok(())
    })
    .await?;

    let compose_path = compose_file_path(&pipeline.workdir);
    with_step(ledger, STEP_RENDER_COMPOSE, || async {
        if config.dry_run {
            info!(path = %compose_path.display(), "dry-run: would render compose document");
            return Ok(());
        }
        let yaml = compose::render_yaml(&doc, &capabilities, &pipeline.generated_at_utc)?;
        compose::write_atomic(&compose_path, &yaml, cleanup)?;
        set_compose_file_mode(&compose_path)?;
        Ok(())
    })
    .await?;

    with_step(ledger, STEP_UP, || async {
        if config.dry_run {
            info!(project = %config.project_name, "dry-run: would run compose up -d");
            return Ok(());
        }
        let compose_path_str = compose_path.to_string_lossy().into_owned();
        let project_name = config.project_name.clone();
        let profile_args = profile_args_for(config, &capabilities);
        let command_deadline = pipeline.command_deadline;
        retry(&pipeline.retry_policy, STEP_UP, || {
            let compose_path_str = compose_path_str.clone();
            let project_name = project_name.clone();
            let profile_args = profile_args.clone();
            let capabilities = capabilities;
            async move {
                let mut args = vec!["-f", &compose_path_str, "-p", &project_name];
                args.extend(profile_args.iter().map(String::as_str));
                args.push("up");
                args.push("-d");
                let command = capabilities.compose_command(&args);
                let output = super::deadline::run_with_watchdog(command, command_deadline, TERM_TO_KILL_GRACE).await?;
                output_to_result("compose up -d", output).await
            }
        })
        .await
    })
    .await?;

    let service_health = if config.dry_run {
        BTreeMap::new()
    } else {
        with_step(ledger, STEP_WAIT_HEALTH, || async {
            let containers: BTreeMap<String, String> = doc
                .services
                .keys()
                .map(|service| (service.clone(), format!("{}-{service}", config.project_name)))
                .collect();
            let health_map = health::wait_health(
                &capabilities,
                &containers,
                pipeline.startup_deadline,
                pipeline.poll_interval,
                pipeline.splunk_grace,
            )
            .await?;
            let all_healthy = health_map.values().all(ServiceHealth::is_healthy);
            if !all_healthy {
                return Err(OrchestratorError::runtime_unreachable(
                    "one or more services failed to report healthy before the startup deadline",
                ));
            }
            Ok(health_map)
        })
        .await?
    };

    ledger.begin_step(STEP_REPORT)?;
    let incomplete = ledger.incomplete_steps();
    if incomplete.is_empty() {
        info!("orchestration completed, all steps reported complete");
    } else {
        warn!(incomplete_steps = ?incomplete, "orchestration finished with incomplete markers");
    }
    ledger.complete_step(STEP_REPORT)?;

    Ok(PipelineReport {
        incomplete_steps: ledger.incomplete_steps(),
        service_health,
        warnings,
        compose_path,
        capabilities: Some(capabilities),
    })
}

fn prepare_dirs(config: &EffectiveConfig, state_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(&config.data_dir)?;
    if config.enable_splunk {
        std::fs::create_dir_all(&config.splunk_data_dir)?;
    }
    std::fs::create_dir_all(state_dir)?;
    set_private_dir_mode(state_dir)?;
    Ok(())
}

#[cfg(unix)]
fn set_private_dir_mode(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_private_dir_mode(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn set_compose_file_mode(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_compose_file_mode(_path: &Path) -> Result<()> {
    Ok(())
}
