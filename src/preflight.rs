//! Host preflight (C4): scaled resource minima, kernel tuning check, and a port
//! availability probe cascade. Never mutates host state; collects every failure
//! rather than short-circuiting on the first.

use std::path::Path;

use tokio::process::Command;

use crate::config::EffectiveConfig;
use crate::error::{OrchestratorError, Result};
use crate::platform::Capabilities;

const BASELINE_RAM_MB: u64 = 4096;
const BASELINE_CORES: u64 = 2;
const MIN_DATA_DIR_GIB: u64 = 10;
const MIN_VM_MAX_MAP_COUNT: u64 = 262_144;

/// Scaled minimum RAM/core/disk requirements for the configured topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaledMinima {
    /// Minimum RAM in megabytes.
    pub ram_mb: u64,
    /// Minimum CPU cores.
    pub cores: u64,
    /// Minimum free space at `data_dir`, in GiB.
    pub data_dir_gib: u64,
    /// Minimum free space at `splunk_data_dir`, in GiB.
    pub splunk_data_dir_gib: u64,
}

/// Compute the scaled minima for a given config (C4 formulas, applied exactly).
#[must_use]
pub fn scaled_minima(config: &EffectiveConfig) -> ScaledMinima {
    if !config.enable_splunk {
        return ScaledMinima {
            ram_mb: BASELINE_RAM_MB,
            cores: BASELINE_CORES,
            data_dir_gib: MIN_DATA_DIR_GIB,
            splunk_data_dir_gib: 0,
        };
    }

    let indexer_count = u64::from(config.indexer_count);
    let search_head_count = u64::from(config.search_head_count);

    ScaledMinima {
        ram_mb: 8192 * indexer_count + 4096 * search_head_count,
        cores: 2 * indexer_count + search_head_count,
        data_dir_gib: MIN_DATA_DIR_GIB,
        splunk_data_dir_gib: 20 * indexer_count,
    }
}

fn read_meminfo_total_mb() -> Option<u64> {
    let text = std::fs::read_to_string("/proc/meminfo").ok()?;
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            let kb: u64 = rest.trim().split_whitespace().next()?.parse().ok()?;
            return Some(kb / 1024);
        }
    }
    None
}

fn available_cores() -> u64 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u64)
        .unwrap_or(1)
}

fn free_space_gib(path: &Path) -> Option<u64> {
    let existing = path
        .ancestors()
        .find(|p| p.exists())
        .unwrap_or(Path::new("/"));

    #[cfg(unix)]
    {
        let c_path = std::ffi::CString::new(existing.to_string_lossy().as_bytes()).ok()?;
        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
        if rc != 0 {
            return None;
        }
        let bytes = stat.f_bavail as u64 * stat.f_frsize as u64;
        Some(bytes / (1024 * 1024 * 1024))
    }
    #[cfg(not(unix))]
    {
        let _ = existing;
        None
    }
}

fn read_vm_max_map_count() -> Option<u64> {
    std::fs::read_to_string("/proc/sys/vm/max_map_count")
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

fn ports_to_probe(config: &EffectiveConfig) -> Vec<u16> {
    let mut ports = vec![config.app_port];
    if config.enable_splunk {
        ports.push(config.splunk_web_port);
        for i in 0..config.indexer_count {
            ports.push(9997 + i as u16);
        }
    }
    if config.enable_monitoring {
        ports.push(9090);
        ports.push(3000);
    }
    ports
}

async fn port_in_use_ss(port: u16) -> Option<bool> {
    let output = Command::new("ss")
        .args(["-ltn"])
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    Some(text.contains(&format!(":{port} ")) || text.lines().any(|l| l.trim_end().ends_with(&format!(":{port}"))))
}

async fn port_in_use_lsof(port: u16) -> Option<bool> {
    let output = Command::new("lsof")
        .args(["-iTCP", "-sTCP:LISTEN", "-P", "-n"])
        .output()
        .await
        .ok()?;
    if !output.status.success() && output.stdout.is_empty() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    Some(text.contains(&format!(":{port} ")) || text.contains(&format!(":{port}\n")))
}

async fn port_in_use_netstat(port: u16) -> Option<bool> {
    let output = Command::new("netstat").args(["-ltn"]).output().await.ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    Some(text.lines().any(|l| l.contains(&format!(":{port} ")) || l.trim_end().ends_with(&format!(":{port}"))))
}

fn port_in_use_bind(port: u16) -> bool {
    std::net::TcpListener::bind(("0.0.0.0", port)).is_err()
}

async fn port_in_use(port: u16) -> bool {
    if let Some(result) = port_in_use_ss(port).await {
        return result;
    }
    if let Some(result) = port_in_use_lsof(port).await {
        return result;
    }
    if let Some(result) = port_in_use_netstat(port).await {
        return result;
    }
    port_in_use_bind(port)
}

/// Run the full preflight sequence, aggregating every failure reason.
///
/// # Errors
///
/// Returns `OrchestratorError::Insufficient` with every collected reason unless the
/// caller has pre-confirmed continuation via `config.confirm_insufficient`.
pub async fn preflight(config: &EffectiveConfig, _capabilities: &Capabilities) -> Result<Vec<String>> {
    let mut reasons = Vec::new();
    let minima = scaled_minima(config);

    if let Some(total_mb) = read_meminfo_total_mb() {
        if total_mb < minima.ram_mb {
            reasons.push(format!(
                "insufficient RAM: {total_mb} MB available, {} MB required",
                minima.ram_mb
            ));
        }
    } else {
        reasons.push("could not read /proc/meminfo to check available RAM".to_string());
    }

    let cores = available_cores();
    if cores < minima.cores {
        reasons.push(format!(
            "insufficient CPU cores: {cores} available, {} required",
            minima.cores
        ));
    }

    if let Some(free) = free_space_gib(&config.data_dir) {
        if free < minima.data_dir_gib {
            reasons.push(format!(
                "insufficient disk space at {}: {free} GiB free, {} GiB required",
                config.data_dir.display(),
                minima.data_dir_gib
            ));
        }
    }

    if config.enable_splunk {
        if let Some(free) = free_space_gib(&config.splunk_data_dir) {
            if free < minima.splunk_data_dir_gib {
                reasons.push(format!(
                    "insufficient disk space at {}: {free} GiB free, {} GiB required",
                    config.splunk_data_dir.display(),
                    minima.splunk_data_dir_gib
                ));
            }
        }

        if let Some(max_map_count) = read_vm_max_map_count() {
            if max_map_count < MIN_VM_MAX_MAP_COUNT {
                reasons.push(format!(
                    "vm.max_map_count={max_map_count} is below the required {MIN_VM_MAX_MAP_COUNT} \
                     for Splunk workloads; raise it with `sysctl -w vm.max_map_count={MIN_VM_MAX_MAP_COUNT}` \
                     or a platform-helpers collaborator"
                ));
            }
        }
    }

    for port in ports_to_probe(config) {
        if port_in_use(port).await {
            reasons.push(format!("port {port} is already in use"));
        }
    }

    if reasons.is_empty() {
        return Ok(Vec::new());
    }

    if config.confirm_insufficient {
        return Ok(reasons);
    }

    Err(OrchestratorError::insufficient(reasons))
}
