//! Air-gapped bundler (C9): builds a compressed tar archive of images and supporting
//! configs, with deterministic headers and a sidecar sha256 checksum.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression as GzCompression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::EffectiveConfig;
use crate::error::Result;
use crate::manifest::VersionsManifest;

/// Archive compression scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// gzip via `flate2`.
    #[default]
    Gzip,
    /// No compression, plain tar.
    None,
}

impl Compression {
    fn extension(self) -> &'static str {
        match self {
            Self::Gzip => "tar.gz",
            Self::None => "tar",
        }
    }
}

/// Result of a successful bundle operation.
#[derive(Debug, Clone)]
pub struct BundleResult {
    /// Path to the final archive.
    pub archive_path: PathBuf,
    /// Path to the sidecar `.sha256` file.
    pub checksum_path: PathBuf,
    /// Hex-encoded sha256 of the archive.
    pub checksum_hex: String,
}

/// Manifest describing the bundle's contents, written as `manifest.json` inside the
/// archive for the consumer's verification path.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BundleManifest {
    schema_version: &'static str,
    generated_at_utc: String,
    project_name: String,
    images: Vec<BundleImage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BundleImage {
    key: String,
    repo: String,
    digest: Option<String>,
    version_tag: Option<String>,
}

const DETERMINISTIC_MTIME: u64 = 0;

fn deterministic_header(path: &str, size: u64) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_path(path).expect("bundle paths are always valid UTF-8 relative paths");
    header.set_size(size);
    header.set_mode(0o644);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(DETERMINISTIC_MTIME);
    header.set_cksum();
    header
}

fn append_bytes(builder: &mut tar::Builder<impl Write>, path: &str, bytes: &[u8]) -> Result<()> {
    let header = deterministic_header(path, bytes.len() as u64);
    builder.append(&header, bytes)?;
    Ok(())
}

fn append_file(builder: &mut tar::Builder<impl Write>, path: &str, source: &Path) -> Result<()> {
    let mut contents = Vec::new();
    std::fs::File::open(source)?.read_to_end(&mut contents)?;
    append_bytes(builder, path, &contents)
}

/// Build the archive: `manifest.json`, the versions manifest snapshot, a boot script,
/// and every config file under `config_dir`, all under `<out_dir_name>/`.
///
/// # Errors
///
/// Returns an error on any I/O failure while reading source files or writing the
/// archive.
pub fn bundle(
    manifest: &VersionsManifest,
    config: &EffectiveConfig,
    config_dir: &Path,
    out_dir: &Path,
    archive_name: &str,
    compression: Compression,
    generated_at_utc: &str,
) -> Result<BundleResult> {
    std::fs::create_dir_all(out_dir)?;

    let images: Vec<BundleImage> = manifest
        .keys()
        .filter_map(|key| {
            manifest.get(key).map(|entry| BundleImage {
                key: key.to_string(),
                repo: entry.repo.clone(),
                digest: entry.digest.clone(),
                version_tag: entry.version_tag.clone(),
            })
        })
        .collect();

    let bundle_manifest = BundleManifest {
        schema_version: crate::compose::SCHEMA_VERSION,
        generated_at_utc: generated_at_utc.to_string(),
        project_name: config.project_name.clone(),
        images,
    };
    let manifest_json = serde_json::to_vec_pretty(&bundle_manifest)?;

    let boot_script = format!(
        "#!/bin/sh\nset -eu\ncd \"$(dirname \"$0\")\"\ntar xzf images.tar.gz\ndocker compose -p {} up -d\n",
        config.project_name
    );

    let archive_path = out_dir.join(format!("{archive_name}.{}", compression.extension()));
    let file = std::fs::File::create(&archive_path)?;

    match compression {
        Compression::Gzip => {
            let encoder = GzEncoder::new(file, GzCompression::default());
            write_archive(encoder, archive_name, &manifest_json, &boot_script, config_dir)?;
        }
        Compression::None => {
            write_archive(file, archive_name, &manifest_json, &boot_script, config_dir)?;
        }
    }

    let checksum_hex = sha256_hex_of_file(&archive_path)?;
    let checksum_path = archive_path.with_extension(format!(
        "{}.sha256",
        archive_path.extension().and_then(|e| e.to_str()).unwrap_or("")
    ));
    let archive_file_name = archive_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(archive_name);
    std::fs::write(&checksum_path, format!("{checksum_hex}  {archive_file_name}\n"))?;

    Ok(BundleResult {
        archive_path,
        checksum_path,
        checksum_hex,
    })
}

fn write_archive(
    sink: impl Write,
    root: &str,
    manifest_json: &[u8],
    boot_script: &str,
    config_dir: &Path,
) -> Result<()> {
    let mut builder = tar::Builder::new(sink);
    append_bytes(&mut builder, &format!("{root}/manifest.json"), manifest_json)?;
    append_bytes(&mut builder, &format!("{root}/boot.sh"), boot_script.as_bytes())?;

    if config_dir.is_dir() {
        for entry in std::fs::read_dir(config_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                let file_name = entry.file_name();
                let file_name = file_name.to_string_lossy();
                append_file(&mut builder, &format!("{root}/config/{file_name}"), &entry.path())?;
            }
        }
    }

    builder.finish()?;
    Ok(())
}

/// Compute the sha256 of a file, streaming so large archives never load fully into
/// memory.
fn sha256_hex_of_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Verify a `<hex>  <filename>` sidecar checksum file against the archive it names.
///
/// # Errors
///
/// Returns `Ok(false)` (not an error) when the computed digest mismatches; returns an
/// error only on I/O or malformed-checksum-file failures.
pub fn verify_checksum(archive_path: &Path, checksum_path: &Path) -> Result<bool> {
    let recorded = std::fs::read_to_string(checksum_path)?;
    let expected = recorded
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    let actual = sha256_hex_of_file(archive_path)?;
    Ok(expected == actual)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClusterMode, DeploymentMode, LogLevel};
    use std::collections::BTreeMap;

    fn base_config() -> EffectiveConfig {
        EffectiveConfig {
            project_name: "demo".into(),
            app_port: 8080,
            data_dir: PathBuf::from("./data"),
            splunk_data_dir: PathBuf::from("./splunk-data"),
            enable_monitoring: false,
            enable_splunk: true,
            enable_secrets: true,
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
            deployment_mode: DeploymentMode::AirGapped,
            confirm_insufficient: false,
            no_validation: false,
            interactive: false,
        }
    }

    #[test]
    fn bundle_produces_archive_and_matching_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join("config");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(config_dir.join("prometheus.yml"), b"scrape_configs: []\n").unwrap();

        let manifest = VersionsManifest::parse(
            "SPLUNK_IMAGE=splunk/splunk\n\
             SPLUNK_DIGEST=sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\n",
        )
        .unwrap();
        let config = base_config();
        let out_dir = dir.path().join("out");

        let result = bundle(
            &manifest,
            &config,
            &config_dir,
            &out_dir,
            "splunk-bundle",
            Compression::Gzip,
            "2026-01-01T00:00:00Z",
        )
        .unwrap();

        assert!(result.archive_path.exists());
        assert!(result.checksum_path.exists());
        assert!(verify_checksum(&result.archive_path, &result.checksum_path).unwrap());
    }

    #[test]
    fn tampered_archive_fails_checksum_verification() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join("config");
        std::fs::create_dir_all(&config_dir).unwrap();
        let manifest = VersionsManifest::default();
        let config = base_config();
        let out_dir = dir.path().join("out");

        let result = bundle(
            &manifest,
            &config,
            &config_dir,
            &out_dir,
            "splunk-bundle",
            Compression::None,
            "2026-01-01T00:00:00Z",
        )
        .unwrap();

        let mut contents = std::fs::read(&result.archive_path).unwrap();
        contents.push(0xFF);
        std::fs::write(&result.archive_path, contents).unwrap();

        assert!(!verify_checksum(&result.archive_path, &result.checksum_path).unwrap());
    }

    #[test]
    fn deterministic_header_always_uses_owner_zero() {
        let header = deterministic_header("demo/manifest.json", 12);
        assert_eq!(header.uid().unwrap(), 0);
        assert_eq!(header.gid().unwrap(), 0);
        assert_eq!(header.mtime().unwrap(), DETERMINISTIC_MTIME);
    }
}
