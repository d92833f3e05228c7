//! Compose-spec document model. Mirrors the subset of the Compose Specification this
//! crate emits, using `BTreeMap` fields throughout for deterministic key ordering and
//! `skip_serializing_if` so absent optional sections never appear in rendered YAML.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A synthesized Compose-spec document is exactly a `ComposeFile`; the alias names
/// the concept at its call sites (`synthesize` / `render_atomic`).
pub type ComposeDocument = ComposeFile;

/// Top-level Compose-spec document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ComposeFile {
    /// Project name; usually left to the `name:` top-level key or the `-p` flag, but
    /// recorded here for documents that embed it explicitly.
    pub name: String,
    /// Service name -> service definition.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub services: BTreeMap<String, Service>,
    /// Network name -> network definition.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub networks: BTreeMap<String, Network>,
    /// Volume name -> volume definition.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, Volume>,
    /// Secret name -> secret definition.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub secrets: BTreeMap<String, Secret>,
}

/// A single service fragment.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Service {
    /// Image reference (`repo@sha256:...` or `repo:tag`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Container name override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    /// `HOST:CONTAINER[/proto]` port mappings.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    /// Environment variables, `KEY=value` form for deterministic ordering.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    /// Named volume or bind mounts, `source:target[:mode]` form.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    /// Networks this service attaches to.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<String>,
    /// Service names this service depends on, short or long form.
    #[serde(skip_serializing_if = "DependsOn::is_empty")]
    pub depends_on: DependsOn,
    /// Compose secrets attached to this service, gated on `capabilities.secrets`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<String>,
    /// Healthcheck block, gated on `capabilities.healthcheck`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<Healthcheck>,
    /// Resource limits/reservations block.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deploy: Option<Deploy>,
    /// Compose profiles this service activates under.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub profiles: Vec<String>,
    /// Restart policy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart: Option<String>,
    /// Override entrypoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
}

/// `depends_on`: either the short list-of-names form, or the long
/// `service: { condition }` form used when the target compose implementation
/// supports container-level health conditions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum DependsOn {
    /// Plain service names, no startup condition.
    Short(Vec<String>),
    /// Service name -> condition (e.g. `service_healthy`).
    Long(BTreeMap<String, DependsOnEntry>),
}

impl DependsOn {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Short(names) => names.is_empty(),
            Self::Long(conditions) => conditions.is_empty(),
        }
    }
}

impl Default for DependsOn {
    fn default() -> Self {
        Self::Short(Vec::new())
    }
}

/// A single long-form `depends_on` condition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DependsOnEntry {
    /// Startup condition, e.g. `"service_healthy"`, `"service_started"`.
    pub condition: String,
}

/// Compose-spec healthcheck block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Healthcheck {
    /// Test command, `CMD`/`CMD-SHELL` form.
    pub test: Vec<String>,
    /// Interval between checks, e.g. `"30s"`.
    pub interval: String,
    /// Timeout for a single check.
    pub timeout: String,
    /// Consecutive failures before unhealthy.
    pub retries: u32,
    /// Grace period before the first check counts.
    pub start_period: String,
}

/// `deploy.resources` block (limits/reservations).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Deploy {
    /// Resource constraints.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<Resources>,
}

/// CPU/memory limits and reservations.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Resources {
    /// Hard ceilings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceSpec>,
    /// Soft guarantees.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservations: Option<ResourceSpec>,
}

/// A single limits/reservations entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceSpec {
    /// CPU quota, e.g. `"2"` or `"${APP_CPU_LIMIT:-1}"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpus: Option<String>,
    /// Memory quota, e.g. `"4Gi"` or `"${APP_MEM_LIMIT:-512M}"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

/// A top-level network fragment.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Network {
    /// Use an externally-managed network instead of creating one.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub external: bool,
    /// Network driver, e.g. `"bridge"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
}

/// A top-level named-volume fragment.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Volume {
    /// Use an externally-managed volume instead of creating one.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub external: bool,
    /// Volume driver.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
}

/// A top-level secret fragment (file-backed or environment-backed).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Secret {
    /// Host file the secret's content is read from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Environment variable the secret's content is read from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sections_are_omitted_from_yaml() {
        let file = ComposeFile {
            name: "demo".to_string(),
            ..Default::default()
        };
        let yaml = serde_yaml::to_string(&file).unwrap();
        assert!(!yaml.contains("services"));
        assert!(!yaml.contains("networks"));
        assert!(!yaml.contains("volumes"));
        assert!(!yaml.contains("secrets"));
    }

    #[test]
    fn service_field_order_is_deterministic_via_btreemap() {
        let mut services = BTreeMap::new();
        services.insert("zeta".to_string(), Service::default());
        services.insert("alpha".to_string(), Service::default());
        let file = ComposeFile {
            name: "demo".to_string(),
            services,
            ..Default::default()
        };
        let yaml = serde_yaml::to_string(&file).unwrap();
        let alpha_pos = yaml.find("alpha").unwrap();
        let zeta_pos = yaml.find("zeta").unwrap();
        assert!(alpha_pos < zeta_pos);
    }

    #[test]
    fn depends_on_short_form_serializes_as_a_plain_list() {
        let depends_on = DependsOn::Short(vec!["redis".to_string()]);
        let yaml = serde_yaml::to_string(&depends_on).unwrap();
        assert_eq!(yaml.trim(), "- redis");
    }

    #[test]
    fn depends_on_long_form_serializes_as_a_condition_map() {
        let mut conditions = BTreeMap::new();
        conditions.insert(
            "redis".to_string(),
            DependsOnEntry {
                condition: "service_healthy".to_string(),
            },
        );
        let depends_on = DependsOn::Long(conditions);
        let yaml = serde_yaml::to_string(&depends_on).unwrap();
        assert!(yaml.contains("redis"));
        assert!(yaml.contains("condition: service_healthy"));
    }

    #[test]
    fn depends_on_default_is_empty() {
        assert!(DependsOn::default().is_empty());
    }
}
