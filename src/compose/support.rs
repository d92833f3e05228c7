//! Supporting-config generation (§4.6 "Files written"): the `.env` template consumed
//! by the compose variable substitution, and the `config/` directory's Prometheus
//! scrape config and Grafana datasource, written alongside the compose document itself
//! since no other stage owns these artifacts.

use std::path::Path;

use crate::config::EffectiveConfig;
use crate::error::Result;
use crate::orchestrator::cleanup::CleanupRegistry;

use super::render::write_atomic;

/// Render the `.env` template: every `${VAR}`/`${VAR:-default}` substitution point the
/// synthesized compose document references, with generated secrets and resource-limit
/// defaults filled in.
#[must_use]
pub fn render_env_template(config: &EffectiveConfig) -> String {
    let mut lines = vec![
        "# Generated by splunk-orchestrator. Do not commit secrets to version control.".to_string(),
        format!("PROJECT={}", config.project_name),
        format!("LOG_LEVEL={}", config.log_level),
        String::new(),
        "# Resource limits".to_string(),
    ];

    for (service, limits) in &config.resource_limits {
        let prefix = service.to_ascii_uppercase();
        if let Some(cpu) = &limits.cpu_limit {
            lines.push(format!("{prefix}_CPU_LIMIT={cpu}"));
        }
        if let Some(mem) = &limits.mem_limit {
            lines.push(format!("{prefix}_MEM_LIMIT={mem}"));
        }
    }
    if !config.resource_limits.contains_key("app") {
        lines.push("APP_CPU_LIMIT=1".to_string());
        lines.push("APP_MEM_LIMIT=512M".to_string());
    }

    if config.enable_splunk {
        lines.push(String::new());
        lines.push("# Splunk".to_string());
        if let Some(password) = config.secrets.get("splunk_admin_password") {
            lines.push(format!("SPLUNK_PASSWORD={password}"));
        } else {
            lines.push("SPLUNK_PASSWORD=".to_string());
        }
        if let Some(secret) = config.secrets.get("splunk_secret_key") {
            lines.push(format!("SPLUNK_SECRET={secret}"));
        }
    }

    lines.push(String::new());
    lines.join("\n") + "\n"
}

fn prometheus_target(service: &str, port: u16) -> String {
    format!("          - '{service}:{port}'")
}

/// Render the Prometheus scrape config naming every service that exposes the `/metrics`
/// (or compatible) endpoint in the synthesized topology.
#[must_use]
pub fn render_prometheus_config(config: &EffectiveConfig) -> String {
    let mut targets = vec![prometheus_target("app", 8080)];
    if config.enable_splunk {
        for i in 1..=config.indexer_count {
            targets.push(prometheus_target(&format!("splunk_idx{i}"), 8088));
        }
        for i in 1..=config.search_head_count {
            let mgmt_port = 8089 + i + 9;
            targets.push(prometheus_target(&format!("splunk_sh{i}"), mgmt_port as u16));
        }
    }
    targets.sort();

    format!(
        "global:\n  scrape_interval: 15s\n\nscrape_configs:\n  - job_name: 'splunk-orchestrator'\n    static_configs:\n      - targets:\n{}\n",
        targets.join("\n")
    )
}

/// Render the Grafana provisioning datasource pointing at the Prometheus service.
#[must_use]
pub fn render_grafana_datasource() -> String {
    "apiVersion: 1\n\
     datasources:\n\
     \x20\x20- name: Prometheus\n\
     \x20\x20\x20\x20type: prometheus\n\
     \x20\x20\x20\x20access: proxy\n\
     \x20\x20\x20\x20url: http://prometheus:9090\n\
     \x20\x20\x20\x20isDefault: true\n\
     \x20\x20\x20\x20editable: false\n"
        .to_string()
}

/// Write the `.env` template plus, when monitoring is enabled, the Prometheus and
/// Grafana config files under `<workdir>/config/`.
///
/// # Errors
///
/// Returns an error on any I/O failure during the atomic writes.
pub fn write_support_configs(config: &EffectiveConfig, workdir: &Path, cleanup: &CleanupRegistry) -> Result<()> {
    write_atomic(&workdir.join(".env"), &render_env_template(config), cleanup)?;
    set_owner_only_mode(&workdir.join(".env"))?;

    if config.enable_monitoring {
        let config_dir = workdir.join("config");
        write_atomic(
            &config_dir.join("prometheus.yml"),
            &render_prometheus_config(config),
            cleanup,
        )?;
        write_atomic(
            &config_dir.join("grafana-datasource.yml"),
            &render_grafana_datasource(),
            cleanup,
        )?;
    }

    Ok(())
}

#[cfg(unix)]
fn set_owner_only_mode(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o600);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_owner_only_mode(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClusterMode, DeploymentMode, LogLevel, ResourceLimits};
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn sample_config() -> EffectiveConfig {
        EffectiveConfig {
            project_name: "demo".to_string(),
            app_port: 8080,
            data_dir: PathBuf::from("/data"),
            splunk_data_dir: PathBuf::from("/data/splunk"),
            enable_monitoring: true,
            enable_splunk: true,
            enable_secrets: false,
            enable_healthchecks: true,
            splunk_cluster_mode: ClusterMode::Cluster,
            indexer_count: 2,
            search_head_count: 1,
            rf: 2,
            sf: 2,
            splunk_web_port: 8000,
            resource_limits: BTreeMap::<String, ResourceLimits>::new(),
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
    fn env_template_includes_project_name() {
        let rendered = render_env_template(&sample_config());
        assert!(rendered.contains("PROJECT=demo"));
    }

    #[test]
    fn prometheus_config_lists_indexers_and_search_heads() {
        let rendered = render_prometheus_config(&sample_config());
        assert!(rendered.contains("splunk_idx1:8088"));
        assert!(rendered.contains("splunk_idx2:8088"));
        assert!(rendered.contains("splunk_sh1:8099"));
    }

    #[test]
    fn grafana_datasource_points_at_prometheus_service() {
        assert!(render_grafana_datasource().contains("http://prometheus:9090"));
    }

    #[test]
    fn write_support_configs_creates_env_and_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let cleanup = CleanupRegistry::new();
        write_support_configs(&sample_config(), dir.path(), &cleanup).unwrap();
        assert!(dir.path().join(".env").exists());
        assert!(dir.path().join("config/prometheus.yml").exists());
        assert!(dir.path().join("config/grafana-datasource.yml").exists());
    }
}
