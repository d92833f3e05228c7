//! Configuration resolver (C2): merges compiled defaults, an optional template file,
//! the process environment, and CLI flags under a fixed precedence, then validates
//! and normalizes the result into an `EffectiveConfig`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};
use crate::manifest::parse_kv_line;

/// Splunk topology mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterMode {
    /// A single indexer and search head, no cluster master.
    Single,
    /// A clustered deployment with a cluster master.
    Cluster,
}

/// Logging verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose.
    Debug,
    /// Default.
    Info,
    /// Warnings and errors only.
    Warn,
    /// Errors only.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for LogLevel {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(OrchestratorError::invalid_input(format!(
                "invalid log level: {other}"
            ))),
        }
    }
}

/// Deployment posture; production-class modes enforce digest pinning (C5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentMode {
    /// Local development; advisory-only supply-chain checks.
    Development,
    /// Enforced digest pinning.
    Production,
    /// Enforced digest pinning, offline image transfer.
    AirGapped,
    /// Enforced digest pinning, strictest posture.
    Secure,
}

impl DeploymentMode {
    /// Whether this mode enforces digest pinning (C5).
    #[must_use]
    pub fn enforces_supply_chain(self) -> bool {
        matches!(self, Self::Production | Self::AirGapped | Self::Secure)
    }
}

impl std::str::FromStr for DeploymentMode {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" | "enterprise" => Ok(Self::Production),
            "air-gapped" | "air_gapped" | "airgapped" => Ok(Self::AirGapped),
            "secure" => Ok(Self::Secure),
            other => Err(OrchestratorError::invalid_input(format!(
                "invalid deployment mode: {other}"
            ))),
        }
    }
}

/// Per-service resource limits, e.g. `{cpu_limit: "2", mem_limit: "4Gi"}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU limit, matching `^[0-9]+(\.[0-9]+)?$`.
    pub cpu_limit: Option<String>,
    /// Memory limit, matching `^[0-9]+[KMG]i?$|^[0-9]+$`.
    pub mem_limit: Option<String>,
    /// CPU reservation.
    pub cpu_reserve: Option<String>,
    /// Memory reservation.
    pub mem_reserve: Option<String>,
}

/// The normalized, validated result of configuration resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    /// Compose project name; `[a-z0-9]+`, at most 64 characters.
    pub project_name: String,
    /// Host port for the application sidecar.
    pub app_port: u16,
    /// Application data directory on the host.
    pub data_dir: PathBuf,
    /// Splunk data directory on the host.
    pub splunk_data_dir: PathBuf,

    /// Whether monitoring (Prometheus + Grafana) is enabled.
    pub enable_monitoring: bool,
    /// Whether the Splunk services are enabled.
    pub enable_splunk: bool,
    /// Whether compose secrets are used (gated further by detected capability).
    pub enable_secrets: bool,
    /// Whether healthchecks are emitted (gated further by detected capability).
    pub enable_healthchecks: bool,

    /// Splunk topology mode.
    pub splunk_cluster_mode: ClusterMode,
    /// Number of indexers.
    pub indexer_count: u32,
    /// Number of search heads.
    pub search_head_count: u32,
    /// Replication factor.
    pub rf: u32,
    /// Search factor.
    pub sf: u32,
    /// Web port for search heads (first instance).
    pub splunk_web_port: u16,

    /// Per-service resource limits.
    pub resource_limits: BTreeMap<String, ResourceLimits>,

    /// Logical secret name -> value. Never serialized; see `Self::redacted`.
    #[serde(skip)]
    pub secrets: BTreeMap<String, String>,

    /// Logging verbosity.
    pub log_level: LogLevel,
    /// Dry-run: log mutating actions without executing them.
    pub dry_run: bool,
    /// Verbose output.
    pub verbose: bool,
    /// Deployment posture.
    pub deployment_mode: DeploymentMode,

    /// User has pre-confirmed continuation past an `Insufficient` preflight report.
    pub confirm_insufficient: bool,
    /// Skip supply-chain / preflight validation entirely (`--no-validation`).
    pub no_validation: bool,
    /// Running with a TTY present and interactive prompting allowed.
    pub interactive: bool,
}

impl EffectiveConfig {
    /// Clone of self with secrets redacted, suitable for on-disk persistence
    /// (`--write-effective`).
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut clone = self.clone();
        clone.secrets = BTreeMap::new();
        clone
    }

    /// Validate cross-field invariants. Called after every merge pass that could
    /// have changed a relevant field.
    pub fn validate(&self) -> Result<Vec<String>> {
        let mut warnings = Vec::new();

        if self.project_name.is_empty()
            || self.project_name.len() > 64
            || !self
                .project_name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        {
            return Err(OrchestratorError::invalid_input(format!(
                "project_name must be 1-64 chars of [a-z0-9], got {:?}",
                self.project_name
            )));
        }

        if self.app_port == 0 {
            return Err(OrchestratorError::invalid_input("app_port must be 1..=65535"));
        }

        if self.enable_splunk {
            if self.indexer_count < 1 {
                return Err(OrchestratorError::invalid_input("indexer_count must be >= 1"));
            }
            if self.search_head_count < 1 {
                return Err(OrchestratorError::invalid_input(
                    "search_head_count must be >= 1",
                ));
            }
            if self.rf < 1 || self.sf < 1 {
                return Err(OrchestratorError::invalid_input("rf and sf must be >= 1"));
            }
            if self.rf > self.indexer_count {
                return Err(OrchestratorError::invalid_input(format!(
                    "rf ({}) must be <= indexer_count ({})",
                    self.rf, self.indexer_count
                )));
            }
            if self.sf > self.rf {
                return Err(OrchestratorError::invalid_input(format!(
                    "sf ({}) must be <= rf ({})",
                    self.sf, self.rf
                )));
            }

            let multi_node = self.indexer_count > 1 || self.search_head_count > 1;
            match self.splunk_cluster_mode {
                ClusterMode::Single if multi_node => {
                    warnings.push(
                        "splunk_cluster_mode=single with multiple indexers/search heads; \
                         a cluster master will be included"
                            .to_string(),
                    );
                }
                _ => {}
            }
        }

        for (service, limits) in &self.resource_limits {
            if let Some(cpu) = &limits.cpu_limit {
                validate_cpu(service, cpu)?;
            }
            if let Some(cpu) = &limits.cpu_reserve {
                validate_cpu(service, cpu)?;
            }
            if let Some(mem) = &limits.mem_limit {
                validate_mem(service, mem)?;
            }
            if let Some(mem) = &limits.mem_reserve {
                validate_mem(service, mem)?;
            }
        }

        Ok(warnings)
    }
}

fn validate_cpu(service: &str, value: &str) -> Result<()> {
    let ok = !value.is_empty()
        && value
            .chars()
            .enumerate()
            .all(|(i, c)| c.is_ascii_digit() || (c == '.' && value[..i].contains(char::is_numeric)));
    if ok && value.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(OrchestratorError::invalid_input(format!(
            "invalid cpu limit for {service}: {value}"
        )))
    }
}

fn validate_mem(service: &str, value: &str) -> Result<()> {
    let digits_end = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    if digits_end == 0 {
        return Err(OrchestratorError::invalid_input(format!(
            "invalid memory limit for {service}: {value}"
        )));
    }
    let suffix = &value[digits_end..];
    if suffix.is_empty() || matches!(suffix, "K" | "M" | "G" | "Ki" | "Mi" | "Gi") {
        Ok(())
    } else {
        Err(OrchestratorError::invalid_input(format!(
            "invalid memory limit for {service}: {value}"
        )))
    }
}

/// Provides admin credentials on behalf of an external credentials collaborator
/// (§6): "get(service, name) -> value | missing; put(service, name, value) -> ok".
/// The core only consumes this trait; it never implements a keyring itself.
pub trait CredentialsProvider: Send + Sync {
    /// Fetch a stored credential, if any.
    fn get(&self, service: &str, name: &str) -> Option<String>;
    /// Store a credential for later retrieval.
    fn put(&self, service: &str, name: &str, value: &str);
}

/// Default provider: never has anything stored, matching a host with no keyring
/// integration configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCredentialsProvider;

impl CredentialsProvider for NullCredentialsProvider {
    fn get(&self, _service: &str, _name: &str) -> Option<String> {
        None
    }

    fn put(&self, _service: &str, _name: &str, _value: &str) {}
}

/// Generate a fresh secret: base64 of 32 random bytes.
#[must_use]
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// A layer of raw string key-value overrides (template file, environment, CLI
/// flags), applied in increasing precedence order by `resolve`.
#[derive(Debug, Clone, Default)]
pub struct RawOverrides {
    values: BTreeMap<String, String>,
}

impl RawOverrides {
    /// Construct an empty override layer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a key, overwriting any prior value for this layer.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Parse a template file's text into an override layer using the shared K=V
    /// grammar (`#` comments, blank lines skipped, optional `export`, quote
    /// stripping, CRLF tolerant, unknown keys retained for forward compatibility).
    #[must_use]
    pub fn from_template_text(text: &str) -> Self {
        let mut values = BTreeMap::new();
        for line in text.lines() {
            if let Some((k, v)) = parse_kv_line(line) {
                values.insert(k, v);
            }
        }
        Self { values }
    }

    /// Parse process environment variables into an override layer, keeping only
    /// the keys this resolver understands.
    #[must_use]
    pub fn from_env(env: &BTreeMap<String, String>) -> Self {
        const KNOWN: &[&str] = &[
            "PROJECT_NAME",
            "APP_PORT",
            "DATA_DIR",
            "SPLUNK_DATA_DIR",
            "ENABLE_MONITORING",
            "ENABLE_SPLUNK",
            "ENABLE_SECRETS",
            "ENABLE_HEALTHCHECKS",
            "SPLUNK_MODE",
            "INDEXER_COUNT",
            "SEARCH_HEAD_COUNT",
            "REPLICATION_FACTOR",
            "SEARCH_FACTOR",
            "SPLUNK_WEB_PORT",
            "SPLUNK_PASSWORD",
            "SPLUNK_SECRET",
            "APP_CPU_LIMIT",
            "APP_MEM_LIMIT",
            "LOG_LEVEL",
            "DEPLOYMENT_MODE",
            "DRY_RUN",
            "VERBOSE",
        ];
        let mut values = BTreeMap::new();
        for key in KNOWN {
            if let Some(v) = env.get(*key) {
                values.insert((*key).to_string(), v.clone());
            }
        }
        Self { values }
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

fn derive_project_name_from_cwd(cwd: &std::path::Path) -> String {
    let basename = cwd
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("myapp")
        .to_ascii_lowercase();
    let cleaned: String = basename
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    if cleaned.is_empty() {
        "myapp".to_string()
    } else {
        cleaned
    }
}

/// Result of `resolve`: the normalized config plus any non-fatal warnings collected
/// along the way (e.g. mutable-tag usage, single-mode-with-multi-node sizing).
pub struct ResolveOutcome {
    /// The normalized, validated configuration.
    pub config: EffectiveConfig,
    /// Warnings collected during validation; non-fatal.
    pub warnings: Vec<String>,
}

/// Resolve defaults < template < environment < CLI flags into an `EffectiveConfig`.
/// A key seen at a higher-precedence layer replaces the lower one; ties (same value
/// at two layers) are a no-op by construction of last-writer-wins.
pub fn resolve(
    template: Option<&RawOverrides>,
    env: &RawOverrides,
    cli: &RawOverrides,
    cwd: &std::path::Path,
    credentials: &dyn CredentialsProvider,
) -> Result<ResolveOutcome> {
    let layers: [&RawOverrides; 3] = [
        template.unwrap_or(&EMPTY_OVERRIDES),
        env,
        cli,
    ];

    let lookup = |key: &str| -> Option<String> {
        let mut found = None;
        for layer in &layers {
            if let Some(v) = layer.get(key) {
                found = Some(v.to_string());
            }
        }
        found
    };

    let project_name = lookup("PROJECT_NAME")
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| derive_project_name_from_cwd(cwd));

    let app_port: u16 = parse_port(lookup("APP_PORT").as_deref().unwrap_or("8080"))?;
    let splunk_web_port: u16 = parse_port(lookup("SPLUNK_WEB_PORT").as_deref().unwrap_or("8000"))?;

    let data_dir = PathBuf::from(lookup("DATA_DIR").unwrap_or_else(|| "./data".to_string()));
    let splunk_data_dir = PathBuf::from(
        lookup("SPLUNK_DATA_DIR").unwrap_or_else(|| "./splunk-data".to_string()),
    );

    let enable_monitoring = parse_bool(lookup("ENABLE_MONITORING").as_deref().unwrap_or("false"));
    let enable_splunk = parse_bool(lookup("ENABLE_SPLUNK").as_deref().unwrap_or("false"));
    let enable_secrets = parse_bool(lookup("ENABLE_SECRETS").as_deref().unwrap_or("true"));
    let enable_healthchecks =
        parse_bool(lookup("ENABLE_HEALTHCHECKS").as_deref().unwrap_or("true"));

    let splunk_cluster_mode = match lookup("SPLUNK_MODE").as_deref().unwrap_or("single") {
        "cluster" => ClusterMode::Cluster,
        "single" => ClusterMode::Single,
        other => {
            return Err(OrchestratorError::invalid_input(format!(
                "invalid splunk_mode: {other}"
            )))
        }
    };

    let indexer_count: u32 = parse_count(lookup("INDEXER_COUNT").as_deref().unwrap_or("1"))?;
    let search_head_count: u32 =
        parse_count(lookup("SEARCH_HEAD_COUNT").as_deref().unwrap_or("1"))?;
    let rf: u32 = parse_count(lookup("REPLICATION_FACTOR").as_deref().unwrap_or("1"))?;
    let sf: u32 = parse_count(lookup("SEARCH_FACTOR").as_deref().unwrap_or("1"))?;

    let log_level: LogLevel = lookup("LOG_LEVEL")
        .as_deref()
        .unwrap_or("info")
        .parse()?;
    let deployment_mode: DeploymentMode = lookup("DEPLOYMENT_MODE")
        .as_deref()
        .unwrap_or("development")
        .parse()?;
    let dry_run = parse_bool(lookup("DRY_RUN").as_deref().unwrap_or("false"));
    let verbose = parse_bool(lookup("VERBOSE").as_deref().unwrap_or("false"));

    let mut resource_limits = BTreeMap::new();
    let app_cpu = lookup("APP_CPU_LIMIT");
    let app_mem = lookup("APP_MEM_LIMIT");
    if app_cpu.is_some() || app_mem.is_some() {
        resource_limits.insert(
            "app".to_string(),
            ResourceLimits {
                cpu_limit: app_cpu,
                mem_limit: app_mem,
                cpu_reserve: None,
                mem_reserve: None,
            },
        );
    }

    let mut secrets = BTreeMap::new();
    if enable_splunk && enable_secrets {
        let password = lookup("SPLUNK_PASSWORD")
            .or_else(|| credentials.get("splunk", "admin_password"))
            .unwrap_or_else(generate_secret);
        secrets.insert("splunk_admin_password".to_string(), password);

        let secret_key = lookup("SPLUNK_SECRET")
            .or_else(|| credentials.get("splunk", "secret_key"))
            .unwrap_or_else(generate_secret);
        secrets.insert("splunk_secret_key".to_string(), secret_key);
    }

    let config = EffectiveConfig {
        project_name,
        app_port,
        data_dir,
        splunk_data_dir,
        enable_monitoring,
        enable_splunk,
        enable_secrets,
        enable_healthchecks,
        splunk_cluster_mode,
        indexer_count,
        search_head_count,
        rf,
        sf,
        splunk_web_port,
        resource_limits,
        secrets,
        log_level,
        dry_run,
        verbose,
        deployment_mode,
        confirm_insufficient: parse_bool(lookup("CONFIRM_INSUFFICIENT").as_deref().unwrap_or("false")),
        no_validation: parse_bool(lookup("NO_VALIDATION").as_deref().unwrap_or("false")),
        interactive: parse_bool(lookup("INTERACTIVE").as_deref().unwrap_or("false")),
    };

    let warnings = config.validate()?;
    Ok(ResolveOutcome { config, warnings })
}

static EMPTY_OVERRIDES: RawOverrides = RawOverrides {
    values: BTreeMap::new(),
};

fn parse_port(s: &str) -> Result<u16> {
    let n: u32 = s
        .parse()
        .map_err(|_| OrchestratorError::invalid_input(format!("invalid port: {s}")))?;
    if n == 0 || n > 65535 {
        return Err(OrchestratorError::invalid_input(format!(
            "port out of range 1..=65535: {s}"
        )));
    }
    Ok(n as u16)
}

fn parse_count(s: &str) -> Result<u32> {
    let n: u32 = s
        .parse()
        .map_err(|_| OrchestratorError::invalid_input(format!("invalid count: {s}")))?;
    if n < 1 {
        return Err(OrchestratorError::invalid_input(format!(
            "count must be >= 1: {s}"
        )));
    }
    Ok(n)
}

fn parse_bool(s: &str) -> bool {
    matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
