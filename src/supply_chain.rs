//! Supply-chain validator (C5): enforces digest pinning for critical images in
//! production-class deployment modes, advisory-only elsewhere.

use crate::compose::types::ComposeFile;
use crate::config::DeploymentMode;
use crate::error::{OrchestratorError, Result};
use crate::manifest::VersionsManifest;

/// A single supply-chain finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// The image reference or manifest key that triggered the finding.
    pub image: String,
    /// Human-readable explanation.
    pub message: String,
}

/// Critical image glob patterns (prefix/suffix/mutable-tag forms only; the pattern
/// set is small and fixed, so no general glob engine is needed).
fn is_critical_image(image_ref: &str) -> bool {
    let repo = image_ref.split(['@', ':']).next().unwrap_or(image_ref);
    if repo.starts_with("splunk/") || repo.starts_with("prom/") || repo.starts_with("grafana/") {
        return true;
    }
    if repo == "redis" || repo == "alpine" {
        return true;
    }
    for mutable_tag in ["latest", "main", "master"] {
        if image_ref.ends_with(&format!(":{mutable_tag}")) {
            return true;
        }
    }
    false
}

fn is_digest_pinned(image_ref: &str) -> bool {
    image_ref.contains('@')
}

/// Validate every service image reference in a synthesized compose document against
/// the manifest's digest-pinning state for the given deployment mode.
///
/// # Errors
///
/// Returns the first violation wrapped as `OrchestratorError::SupplyChainViolation`
/// when `mode` enforces pinning; callers that need the full violation list should use
/// `validate` directly and only map to an error at the pipeline boundary.
pub fn enforce(manifest: &VersionsManifest, compose: &ComposeFile, mode: DeploymentMode) -> Result<()> {
    let violations = validate(manifest, compose, mode);
    if let Some(first) = violations.into_iter().next() {
        if mode.enforces_supply_chain() {
            return Err(OrchestratorError::supply_chain_violation(
                first.message,
                first.image,
            ));
        }
    }
    Ok(())
}

/// Collect every supply-chain finding without aborting early. In non-enforcing modes
/// the same findings are returned but the caller treats them as advisory.
#[must_use]
pub fn validate(_manifest: &VersionsManifest, compose: &ComposeFile, mode: DeploymentMode) -> Vec<Violation> {
    let mut violations = Vec::new();

    for (name, service) in &compose.services {
        let Some(image) = &service.image else {
            continue;
        };
        if is_critical_image(image) && !is_digest_pinned(image) {
            violations.push(Violation {
                image: image.clone(),
                message: format!(
                    "service `{name}` uses a critical image without a digest pin{}",
                    if mode.enforces_supply_chain() {
                        " (enforced in this deployment mode)"
                    } else {
                        " (advisory in development mode)"
                    }
                ),
            });
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::types::{ComposeFile, Service};
    use std::collections::BTreeMap;

    fn compose_with_image(name: &str, image: &str) -> ComposeFile {
        let mut services = BTreeMap::new();
        services.insert(
            name.to_string(),
            Service {
                image: Some(image.to_string()),
                ..Default::default()
            },
        );
        ComposeFile {
            name: "test".to_string(),
            services,
            networks: BTreeMap::new(),
            volumes: BTreeMap::new(),
            secrets: BTreeMap::new(),
        }
    }

    #[test]
    fn critical_image_patterns_detected() {
        assert!(is_critical_image("splunk/splunk:9.1.2"));
        assert!(is_critical_image("prom/prometheus:v2.50.0"));
        assert!(is_critical_image("grafana/grafana:10.0.0"));
        assert!(is_critical_image("redis:7.2"));
        assert!(is_critical_image("alpine:latest"));
        assert!(is_critical_image("myregistry.example.com/app:latest"));
        assert!(!is_critical_image("myregistry.example.com/app:1.2.3"));
    }

    #[test]
    fn production_mode_rejects_unpinned_critical_image() {
        let manifest = VersionsManifest::default();
        let compose = compose_with_image("splunk_idx1", "splunk/splunk:9.1.2");
        let violations = validate(&manifest, &compose, DeploymentMode::Production);
        assert_eq!(violations.len(), 1);
        assert!(enforce(&manifest, &compose, DeploymentMode::Production).is_err());
    }

    #[test]
    fn development_mode_is_advisory_only() {
        let manifest = VersionsManifest::default();
        let compose = compose_with_image("splunk_idx1", "splunk/splunk:9.1.2");
        let violations = validate(&manifest, &compose, DeploymentMode::Development);
        assert_eq!(violations.len(), 1);
        assert!(enforce(&manifest, &compose, DeploymentMode::Development).is_ok());
    }

    #[test]
    fn pinned_digest_passes_in_production() {
        let manifest = VersionsManifest::default();
        let compose = compose_with_image(
            "splunk_idx1",
            "splunk/splunk@sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
        );
        assert!(enforce(&manifest, &compose, DeploymentMode::Production).is_ok());
    }

    #[test]
    fn non_critical_image_never_flagged() {
        let manifest = VersionsManifest::default();
        let compose = compose_with_image("app", "myregistry.example.com/app:1.4.0");
        assert!(validate(&manifest, &compose, DeploymentMode::Production).is_empty());
    }
}
