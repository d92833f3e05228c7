//! Air-gapped bundle round trip: build an archive from a small manifest and a
//! generated config directory, then verify its sidecar checksum.

use splunk_orchestrator::bundle::{bundle, verify_checksum, Compression};
use splunk_orchestrator::config::{ClusterMode, DeploymentMode, EffectiveConfig, LogLevel};
use splunk_orchestrator::manifest::VersionsManifest;
use std::collections::BTreeMap;
use std::path::PathBuf;

fn sample_manifest() -> VersionsManifest {
    VersionsManifest::parse(
        "SPLUNK_IMAGE=splunk/splunk\nSPLUNK_VERSION=9.1.2\nSPLUNK_DIGEST=sha256:0000000000000000000000000000000000000000000000000000000000000000\nREDIS_IMAGE=redis\nREDIS_VERSION=7.2.4\n",
    )
    .unwrap()
}

fn sample_config() -> EffectiveConfig {
    EffectiveConfig {
        project_name: "bundle-demo".to_string(),
        app_port: 8080,
        data_dir: PathBuf::from("/data"),
        splunk_data_dir: PathBuf::from("/data/splunk"),
        enable_monitoring: false,
        enable_splunk: true,
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
        dry_run: false,
        verbose: false,
        deployment_mode: DeploymentMode::Development,
        confirm_insufficient: false,
        no_validation: false,
        interactive: false,
    }
}

#[test]
fn bundle_then_verify_round_trips() {
    let manifest = sample_manifest();
    let config = sample_config();
    let config_dir = tempfile::tempdir().unwrap();
    std::fs::write(config_dir.path().join("note.txt"), b"placeholder config").unwrap();
    let out_dir = tempfile::tempdir().unwrap();

    let result = bundle(
        &manifest,
        &config,
        config_dir.path(),
        out_dir.path(),
        "bundle-demo",
        Compression::Gzip,
        "2026-01-01T00:00:00Z",
    )
    .unwrap();

    assert!(result.archive_path.exists());
    assert!(result.checksum_path.exists());
    assert!(verify_checksum(&result.archive_path, &result.checksum_path).unwrap());
}

#[test]
fn tampering_with_the_archive_fails_verification() {
    let manifest = sample_manifest();
    let config = sample_config();
    let config_dir = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();

    let result = bundle(
        &manifest,
        &config,
        config_dir.path(),
        out_dir.path(),
        "bundle-demo",
        Compression::None,
        "2026-01-01T00:00:00Z",
    )
    .unwrap();

    let mut bytes = std::fs::read(&result.archive_path).unwrap();
    bytes.push(0xff);
    std::fs::write(&result.archive_path, bytes).unwrap();

    assert!(!verify_checksum(&result.archive_path, &result.checksum_path).unwrap());
}
