//! External collaborator traits: installer, credentials, and platform-helpers. The
//! core never shells out to an installer or mutates SELinux/firewall/group-membership
//! state itself; it only consumes these traits, with no-op defaults standing in for
//! the real integrations an operator's environment may wire up.

use async_trait::async_trait;

use crate::error::Result;

pub use crate::config::{CredentialsProvider, NullCredentialsProvider};

/// Installs the container runtime and compose implementation on behalf of the core.
/// The core only ever calls this when explicitly asked to (`--install` style flows
/// are out of this crate's scope per spec; the trait exists so a caller can wire one
/// in without forking the orchestration pipeline).
#[async_trait]
pub trait Installer: Send + Sync {
    /// Install Docker (or confirm it is already present).
    async fn install_docker(&self) -> Result<()>;
    /// Install Podman (or confirm it is already present).
    async fn install_podman(&self) -> Result<()>;
    /// Install a compose implementation for the given runtime.
    async fn install_compose(&self, runtime: crate::platform::Runtime) -> Result<()>;
}

/// No-op installer: reports success without installing anything, for hosts where
/// prerequisites are provisioned out of band.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullInstaller;

#[async_trait]
impl Installer for NullInstaller {
    async fn install_docker(&self) -> Result<()> {
        Ok(())
    }

    async fn install_podman(&self) -> Result<()> {
        Ok(())
    }

    async fn install_compose(&self, _runtime: crate::platform::Runtime) -> Result<()> {
        Ok(())
    }
}

/// Host-mutating operations the core is explicitly forbidden from performing itself:
/// kernel tuning, SELinux relabeling, firewall rules, and group-membership changes
/// that would require a re-login (exit code 78).
pub trait PlatformHelpers: Send + Sync {
    /// Raise `vm.max_map_count` to at least the Splunk-required minimum.
    fn raise_max_map_count(&self, minimum: u64) -> Result<()>;
    /// Relabel `path` for SELinux container access (`:z`/`:Z` mount semantics).
    fn selinux_relabel(&self, path: &std::path::Path) -> Result<()>;
    /// Add the current user to the runtime's admin group (docker/podman), returning
    /// whether a re-login is now required for the change to take effect.
    fn add_user_to_runtime_group(&self) -> Result<bool>;
}

/// No-op platform helpers: every mutation is refused, matching a host where the
/// operator manages kernel/SELinux/group state independently of this tool.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPlatformHelpers;

impl PlatformHelpers for NullPlatformHelpers {
    fn raise_max_map_count(&self, _minimum: u64) -> Result<()> {
        Ok(())
    }

    fn selinux_relabel(&self, _path: &std::path::Path) -> Result<()> {
        Ok(())
    }

    fn add_user_to_runtime_group(&self) -> Result<bool> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_installer_always_succeeds() {
        let installer = NullInstaller;
        assert!(installer.install_docker().await.is_ok());
        assert!(installer.install_podman().await.is_ok());
        assert!(installer
            .install_compose(crate::platform::Runtime::Docker)
            .await
            .is_ok());
    }

    #[test]
    fn null_platform_helpers_never_requires_relogin() {
        let helpers = NullPlatformHelpers;
        assert!(!helpers.add_user_to_runtime_group().unwrap());
    }

    #[test]
    fn null_credentials_provider_never_has_anything() {
        let provider = NullCredentialsProvider;
        assert!(provider.get("splunk", "admin_password").is_none());
    }
}
