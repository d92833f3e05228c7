//! Full pipeline smoke test in dry-run mode. Detection of a local container runtime
//! still runs (dry-run only skips mutating steps), so the test skips itself when
//! neither Docker nor Podman is on PATH rather than failing CI hosts without one.

use splunk_orchestrator::config::{ClusterMode, DeploymentMode, EffectiveConfig, LogLevel};
use splunk_orchestrator::manifest::VersionsManifest;
use splunk_orchestrator::orchestrator::{self, Pipeline};
use std::collections::BTreeMap;

fn runtime_available() -> bool {
    which::which("docker").is_ok() || which::which("podman").is_ok()
}

fn sample_manifest() -> VersionsManifest {
    VersionsManifest::parse("APP_IMAGE=alpine\nAPP_VERSION=3.19\nREDIS_IMAGE=redis\nREDIS_VERSION=7.2.4\n").unwrap()
}

#[tokio::test]
async fn dry_run_completes_without_mutating_anything() {
    if !runtime_available() {
        println!("no container runtime on PATH - skipping");
        return;
    }

    let workdir = tempfile::tempdir().unwrap();
    let state_dir = tempfile::tempdir().unwrap();

    let config = EffectiveConfig {
        project_name: "dry-run-demo".to_string(),
        app_port: 8080,
        data_dir: workdir.path().join("data"),
        splunk_data_dir: workdir.path().join("splunk-data"),
        enable_monitoring: false,
        enable_splunk: false,
        enable_secrets: false,
        enable_healthchecks: true,
        splunk_cluster_mode: ClusterMode::Single,
        indexer_count: 1,
        search_head_count: 1,
        rf: 1,
        sf: 1,
        splunk_web_port: 8000,
        resource_limits: BTreeMap::new(),
        secrets: BTreeMap::new(),
        log_level: LogLevel::Info,
        dry_run: true,
        verbose: false,
        deployment_mode: DeploymentMode::Development,
        confirm_insufficient: true,
        no_validation: true,
        interactive: false,
    };

    let mut pipeline = Pipeline::new(workdir.path().to_path_buf(), "2026-01-01T00:00:00Z".to_string());
    pipeline.state_dir = Some(state_dir.path().to_path_buf());

    let manifest = sample_manifest();
    let report = orchestrator::run(&config, &manifest, &pipeline).await.unwrap();

    assert!(report.incomplete_steps.is_empty());
    assert!(report.service_health.is_empty());
    assert!(!workdir.path().join("docker-compose.yml").exists());
    assert!(!workdir.path().join(".env").exists());
}
