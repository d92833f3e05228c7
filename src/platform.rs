//! Runtime and capability detection (C3): generalizes the teacher's platform probing
//! style to the Docker/Podman + Compose-implementation matrix this crate actually
//! drives.

use std::net::ToSocketAddrs;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::error::{OrchestratorError, Result};

/// Container runtime in play.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Runtime {
    /// Docker Engine.
    Docker,
    /// Podman.
    Podman,
}

impl Runtime {
    /// Binary name to invoke for this runtime.
    #[must_use]
    pub fn command(self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Podman => "podman",
        }
    }
}

impl std::fmt::Display for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Docker => write!(f, "docker"),
            Self::Podman => write!(f, "podman"),
        }
    }
}

/// The concrete Compose-spec executor bound to a detected runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeImpl {
    /// `docker compose` (v2 plugin).
    DockerComposeV2,
    /// Legacy standalone `docker-compose` (v1).
    DockerComposeV1,
    /// `podman compose` (native plugin).
    PodmanComposeNative,
    /// Legacy Python `podman-compose`.
    PodmanComposePy,
}

impl ComposeImpl {
    /// The runtime this implementation runs under.
    #[must_use]
    pub fn runtime(self) -> Runtime {
        match self {
            Self::DockerComposeV2 | Self::DockerComposeV1 => Runtime::Docker,
            Self::PodmanComposeNative | Self::PodmanComposePy => Runtime::Podman,
        }
    }

    /// The argv prefix that invokes this implementation, before caller-supplied args.
    #[must_use]
    pub fn invocation(self) -> Vec<&'static str> {
        match self {
            Self::DockerComposeV2 => vec!["docker", "compose"],
            Self::DockerComposeV1 => vec!["docker-compose"],
            Self::PodmanComposeNative => vec!["podman", "compose"],
            Self::PodmanComposePy => vec!["podman-compose"],
        }
    }

    /// Capability gating table from the detector's design (C3).
    #[must_use]
    pub fn supports_secrets(self) -> bool {
        matches!(self, Self::DockerComposeV2 | Self::PodmanComposeNative)
    }

    /// Whether this implementation honors compose healthcheck blocks.
    #[must_use]
    pub fn supports_healthcheck(self) -> bool {
        true
    }

    /// Whether this implementation honors compose profiles.
    #[must_use]
    pub fn supports_profiles(self) -> bool {
        matches!(self, Self::DockerComposeV2 | Self::PodmanComposeNative)
    }
}

/// Network backend reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkBackend {
    /// Classic Linux bridge networking.
    Bridge,
    /// Podman's Netavark backend.
    Netavark,
    /// CNI-based networking.
    Cni,
}

/// Immutable capability bitset produced once by `detect` and threaded through the
/// pipeline as an explicit input.
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    runtime: Runtime,
    compose_impl: ComposeImpl,
    secrets: bool,
    healthcheck: bool,
    profiles: bool,
    buildkit: bool,
    rootless: bool,
    air_gapped: bool,
    podman_socket: bool,
    network_backend: NetworkBackend,
}

impl Capabilities {
    /// Construct a `Capabilities` value directly for tests in sibling modules that
    /// need one without running real detection.
    #[cfg(test)]
    pub(crate) fn for_test(compose_impl: ComposeImpl) -> Self {
        Self {
            runtime: compose_impl.runtime(),
            compose_impl,
            secrets: compose_impl.supports_secrets(),
            healthcheck: compose_impl.supports_healthcheck(),
            profiles: compose_impl.supports_profiles(),
            buildkit: false,
            rootless: false,
            air_gapped: false,
            podman_socket: false,
            network_backend: NetworkBackend::Bridge,
        }
    }

    /// Detected runtime.
    #[must_use]
    pub fn runtime(&self) -> Runtime {
        self.runtime
    }

    /// Detected compose implementation.
    #[must_use]
    pub fn compose_impl(&self) -> ComposeImpl {
        self.compose_impl
    }

    /// Compose-spec secrets support.
    #[must_use]
    pub fn secrets(&self) -> bool {
        self.secrets
    }

    /// Compose-spec healthcheck support.
    #[must_use]
    pub fn healthcheck(&self) -> bool {
        self.healthcheck
    }

    /// Compose-spec profiles support.
    #[must_use]
    pub fn profiles(&self) -> bool {
        self.profiles
    }

    /// Docker BuildKit availability.
    #[must_use]
    pub fn buildkit(&self) -> bool {
        self.buildkit
    }

    /// Whether the runtime is operating rootless.
    #[must_use]
    pub fn rootless(&self) -> bool {
        self.rootless
    }

    /// Whether the host appears to be air-gapped (no reachable registries).
    #[must_use]
    pub fn air_gapped(&self) -> bool {
        self.air_gapped
    }

    /// Whether a Podman socket is in play.
    #[must_use]
    pub fn podman_socket(&self) -> bool {
        self.podman_socket
    }

    /// Detected network backend.
    #[must_use]
    pub fn network_backend(&self) -> NetworkBackend {
        self.network_backend
    }

    /// Build (without running) a `Command` bound to the compose implementation, with
    /// the correct binary and subcommand prefix applied. Callers that need deadline or
    /// watchdog control over the child process should use this instead of `compose`.
    #[must_use]
    pub fn compose_command(&self, args: &[&str]) -> Command {
        let invocation = self.compose_impl.invocation();
        let (program, prefix) = invocation
            .split_first()
            .expect("compose invocation is never empty");
        let mut command = Command::new(program);
        command.args(prefix).args(args);
        command
    }

    /// Invoke the bound compose implementation with the given arguments. Binds the
    /// correct binary and subcommand prefix; errors if this value wasn't produced by
    /// `detect` (never constructible otherwise, kept for defense in depth).
    pub async fn compose(&self, args: &[&str]) -> Result<std::process::Output> {
        self.compose_command(args)
            .output()
            .await
            .map_err(|e| OrchestratorError::runtime_unreachable(format!("compose invocation failed: {e}")))
    }
}

async fn binary_exists(bin: &str) -> bool {
    which::which(bin).is_ok()
}

async fn run_ok(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .ok()?;
    if output.status.success() {
        Some(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        None
    }
}

async fn viable(binary: &str, info_args: &[&str], version_args: &[&str]) -> bool {
    if !binary_exists(binary).await {
        return false;
    }
    if run_ok(binary, info_args).await.is_none() {
        return false;
    }
    matches!(run_ok(binary, version_args).await, Some(out) if !out.trim().is_empty())
}

fn is_rhel8_family() -> bool {
    let Ok(text) = std::fs::read_to_string("/etc/os-release") else {
        return false;
    };
    let is_rhel_family = text.contains("rhel") || text.contains("centos") || text.contains("rocky") || text.contains("almalinux");
    let is_v8 = text.contains("VERSION_ID=\"8") || text.contains("VERSION_ID=8");
    is_rhel_family && is_v8
}

async fn compose_impl_viable(candidate: ComposeImpl) -> bool {
    match candidate {
        ComposeImpl::PodmanComposeNative => viable("podman", &["info"], &["compose", "version"]).await,
        ComposeImpl::DockerComposeV2 => viable("docker", &["info"], &["compose", "version"]).await,
        ComposeImpl::PodmanComposePy => {
            viable("podman-compose", &["--version"], &["--version"]).await
                && binary_exists("podman").await
        }
        ComposeImpl::DockerComposeV1 => {
            viable("docker-compose", &["--version"], &["--version"]).await
                && binary_exists("docker").await
        }
    }
}

async fn detect_compose_impl() -> Result<ComposeImpl> {
    let rhel8 = is_rhel8_family();

    // Default preference order; RHEL8-family hosts prefer docker to avoid known
    // podman-compose python incompatibilities on that platform.
    let order: [ComposeImpl; 4] = if rhel8 {
        [
            ComposeImpl::DockerComposeV2,
            ComposeImpl::PodmanComposeNative,
            ComposeImpl::DockerComposeV1,
            ComposeImpl::PodmanComposePy,
        ]
    } else {
        [
            ComposeImpl::PodmanComposeNative,
            ComposeImpl::DockerComposeV2,
            ComposeImpl::PodmanComposePy,
            ComposeImpl::DockerComposeV1,
        ]
    };

    for candidate in order {
        if compose_impl_viable(candidate).await {
            return Ok(candidate);
        }
    }

    Err(OrchestratorError::detection_failed(
        "no viable (runtime, compose implementation) pair found; install Docker or Podman \
         with a compose plugin",
    ))
}

async fn detect_buildkit(runtime: Runtime) -> bool {
    runtime == Runtime::Docker && run_ok("docker", &["buildx", "version"]).await.is_some()
}

fn well_known_podman_socket_paths() -> Vec<std::path::PathBuf> {
    let mut paths = Vec::new();
    if let Ok(uid) = std::env::var("UID") {
        paths.push(std::path::PathBuf::from(format!(
            "/run/user/{uid}/podman/podman.sock"
        )));
    }
    paths.push(std::path::PathBuf::from("/run/podman/podman.sock"));
    paths
}

async fn detect_podman_socket(runtime: Runtime) -> bool {
    if runtime != Runtime::Podman {
        return false;
    }
    if let Ok(host) = std::env::var("CONTAINER_HOST") {
        if host.ends_with("podman.sock") {
            return true;
        }
    }
    well_known_podman_socket_paths()
        .iter()
        .any(|p| Path::new(p).exists())
}

async fn detect_rootless(runtime: Runtime) -> bool {
    match runtime {
        Runtime::Podman => run_ok("podman", &["info", "--format", "{{.Host.Security.Rootless}}"])
            .await
            .is_some_and(|out| out.trim() == "true"),
        Runtime::Docker => {
            // uid 0 implies rootful; anything else plus absence from the docker group
            // socket path is treated as a rootless/rootless-emulated Docker install.
            !is_root_uid()
        }
    }
}

fn is_root_uid() -> bool {
    #[cfg(unix)]
    {
        // SAFETY: getuid has no preconditions and never fails.
        unsafe { libc::getuid() == 0 }
    }
    #[cfg(not(unix))]
    {
        false
    }
}

async fn detect_network_backend(runtime: Runtime) -> NetworkBackend {
    if runtime == Runtime::Podman {
        if let Some(out) = run_ok("podman", &["info", "--format", "{{.Host.NetworkBackend}}"]).await {
            let trimmed = out.trim();
            if trimmed.eq_ignore_ascii_case("netavark") {
                return NetworkBackend::Netavark;
            }
            if trimmed.eq_ignore_ascii_case("cni") {
                return NetworkBackend::Cni;
            }
        }
    }
    NetworkBackend::Bridge
}

/// Canonical registry shortlist probed to decide air-gapped status; any one reachable
/// on TCP/443 within the probe budget means the host is NOT air-gapped.
const REGISTRY_SHORTLIST: &[&str] = &["registry-1.docker.io:443", "quay.io:443", "gcr.io:443"];

const AIR_GAPPED_PROBE_TIMEOUT: Duration = Duration::from_millis(800);

async fn probe_tcp_reachable(host_port: &str) -> bool {
    let Ok(mut addrs) = host_port.to_socket_addrs() else {
        return false;
    };
    let Some(addr) = addrs.next() else {
        return false;
    };
    tokio::time::timeout(AIR_GAPPED_PROBE_TIMEOUT, tokio::net::TcpStream::connect(addr))
        .await
        .is_ok_and(|r| r.is_ok())
}

async fn detect_air_gapped() -> bool {
    for host_port in REGISTRY_SHORTLIST {
        if probe_tcp_reachable(host_port).await {
            return false;
        }
    }
    true
}

/// Run the full capability-detection sequence described in the design: probe does not
/// mutate state, exactly one `(runtime, compose_impl)` pair is chosen, re-entrant
/// detection is idempotent (every probe is read-only).
pub async fn detect() -> Result<Capabilities> {
    let compose_impl = detect_compose_impl().await?;
    let runtime = compose_impl.runtime();

    let secrets = compose_impl.supports_secrets();
    let healthcheck = compose_impl.supports_healthcheck();
    let profiles = compose_impl.supports_profiles();
    let buildkit = detect_buildkit(runtime).await;
    let podman_socket = detect_podman_socket(runtime).await;
    let rootless = detect_rootless(runtime).await;
    let network_backend = detect_network_backend(runtime).await;
    let air_gapped = detect_air_gapped().await;

    Ok(Capabilities {
        runtime,
        compose_impl,
        secrets,
        healthcheck,
        profiles,
        buildkit,
        rootless,
        air_gapped,
        podman_socket,
        network_backend,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_impl_runtime_mapping() {
        assert_eq!(ComposeImpl::DockerComposeV2.runtime(), Runtime::Docker);
        assert_eq!(ComposeImpl::DockerComposeV1.runtime(), Runtime::Docker);
        assert_eq!(ComposeImpl::PodmanComposeNative.runtime(), Runtime::Podman);
        assert_eq!(ComposeImpl::PodmanComposePy.runtime(), Runtime::Podman);
    }

    #[test]
    fn capability_gating_matches_the_table() {
        assert!(ComposeImpl::DockerComposeV2.supports_secrets());
        assert!(ComposeImpl::DockerComposeV2.supports_profiles());
        assert!(ComposeImpl::PodmanComposeNative.supports_secrets());
        assert!(ComposeImpl::PodmanComposeNative.supports_profiles());
        assert!(!ComposeImpl::PodmanComposePy.supports_secrets());
        assert!(!ComposeImpl::PodmanComposePy.supports_profiles());
        assert!(!ComposeImpl::DockerComposeV1.supports_secrets());
        assert!(!ComposeImpl::DockerComposeV1.supports_profiles());
        assert!(ComposeImpl::DockerComposeV1.supports_healthcheck());
    }

    #[test]
    fn invocation_prefixes() {
        assert_eq!(ComposeImpl::DockerComposeV2.invocation(), vec!["docker", "compose"]);
        assert_eq!(ComposeImpl::DockerComposeV1.invocation(), vec!["docker-compose"]);
        assert_eq!(
            ComposeImpl::PodmanComposeNative.invocation(),
            vec!["podman", "compose"]
        );
        assert_eq!(ComposeImpl::PodmanComposePy.invocation(), vec!["podman-compose"]);
    }

    #[tokio::test]
    async fn air_gapped_probe_of_unroutable_address_times_out_quickly() {
        // TEST-NET-1, RFC 5737: guaranteed non-routable, so the probe must finish
        // via the timeout path rather than hang.
        let reachable = probe_tcp_reachable("192.0.2.1:443").await;
        assert!(!reachable);
    }

    #[test]
    fn rhel8_os_release_detection() {
        let sample = "NAME=\"Red Hat Enterprise Linux\"\nVERSION_ID=\"8.6\"\nID=\"rhel\"\n";
        let is_rhel_family = sample.contains("rhel");
        let is_v8 = sample.contains("VERSION_ID=\"8");
        assert!(is_rhel_family && is_v8);
    }
}
