//! Fragment assembler (C6): builds a `ComposeDocument` from resolved config,
//! detected capabilities, and the versions manifest. One typed fragment per logical
//! service; optional sub-blocks are gated on the capability flags that must be
//! present for the target compose implementation to accept them.

use std::collections::BTreeMap;

use crate::config::EffectiveConfig;
use crate::error::Result;
use crate::manifest::{image_ref, VersionsManifest};
use crate::platform::Capabilities;

use super::types::{
    ComposeDocument, ComposeFile, DependsOn, DependsOnEntry, Deploy, Healthcheck, Network, Resources, Secret,
    Service, Volume,
};

const APP_NET: &str = "app-net";
const SPLUNK_NET: &str = "splunk-net";
const PROFILE_SPLUNK: &str = "splunk";
const PROFILE_MONITORING: &str = "monitoring";

/// Build a `depends_on` entry for `names`: the long `condition: service_healthy` form
/// when the target compose implementation supports health conditions, the plain list
/// otherwise.
fn depends_on(names: &[&str], capabilities: &Capabilities) -> DependsOn {
    if capabilities.healthcheck() {
        DependsOn::Long(
            names
                .iter()
                .map(|name| {
                    (
                        (*name).to_string(),
                        DependsOnEntry {
                            condition: "service_healthy".to_string(),
                        },
                    )
                })
                .collect(),
        )
    } else {
        DependsOn::Short(names.iter().map(|name| (*name).to_string()).collect())
    }
}

fn profiles_for(capabilities: &Capabilities, profile: &str) -> Vec<String> {
    if capabilities.profiles() {
        vec![profile.to_string()]
    } else {
        Vec::new()
    }
}

fn healthcheck_for(service: &str) -> Healthcheck {
    let test = match service {
        "app" => vec!["CMD".to_string(), "curl".to_string(), "-f".to_string(), "http://localhost:8080/healthz".to_string()],
        "redis" => vec!["CMD".to_string(), "redis-cli".to_string(), "ping".to_string()],
        "prometheus" => vec!["CMD".to_string(), "wget".to_string(), "-qO-".to_string(), "http://localhost:9090/-/healthy".to_string()],
        "grafana" => vec!["CMD".to_string(), "wget".to_string(), "-qO-".to_string(), "http://localhost:3000/api/health".to_string()],
        _ if service.starts_with("splunk") => vec![
            "CMD".to_string(),
            "/opt/splunk/bin/splunk".to_string(),
            "status".to_string(),
        ],
        _ => vec!["CMD-SHELL".to_string(), "exit 0".to_string()],
    };
    Healthcheck {
        test,
        interval: "30s".to_string(),
        timeout: "10s".to_string(),
        retries: 3,
        start_period: "60s".to_string(),
    }
}

fn deploy_for(service: &str, config: &EffectiveConfig) -> Option<Deploy> {
    let limits = config.resource_limits.get(service);
    let cpu_limit = limits.and_then(|l| l.cpu_limit.clone());
    let mem_limit = limits.and_then(|l| l.mem_limit.clone());
    let cpu_reserve = limits.and_then(|l| l.cpu_reserve.clone());
    let mem_reserve = limits.and_then(|l| l.mem_reserve.clone());

    if cpu_limit.is_none() && mem_limit.is_none() && cpu_reserve.is_none() && mem_reserve.is_none() {
        return None;
    }

    Some(Deploy {
        resources: Some(Resources {
            limits: Some(super::types::ResourceSpec {
                cpus: Some(cpu_limit.unwrap_or_else(|| format!("${{{}_CPU_LIMIT:-1}}", service.to_ascii_uppercase()))),
                memory: Some(mem_limit.unwrap_or_else(|| format!("${{{}_MEM_LIMIT:-512M}}", service.to_ascii_uppercase()))),
            }),
            reservations: Some(super::types::ResourceSpec {
                cpus: cpu_reserve,
                memory: mem_reserve,
            }),
        }),
    })
}

fn base_service(image: String, healthcheck_enabled: bool, name: &str) -> Service {
    Service {
        image: Some(image),
        container_name: Some(format!("${{PROJECT}}-{name}")),
        restart: Some("unless-stopped".to_string()),
        healthcheck: healthcheck_enabled.then(|| healthcheck_for(name)),
        ..Default::default()
    }
}

fn app_service(config: &EffectiveConfig, capabilities: &Capabilities, manifest: &VersionsManifest) -> Result<Service> {
    let image = manifest_image_ref(manifest, "APP")?;
    let mut service = base_service(image, capabilities.healthcheck() && config.enable_healthchecks, "app");
    service.ports = vec![format!("{}:8080", config.app_port)];
    service.networks = vec![APP_NET.to_string()];
    service.depends_on = depends_on(&["redis"], capabilities);
    service.environment.insert("LOG_LEVEL".to_string(), "${LOG_LEVEL:-info}".to_string());
    service.deploy = deploy_for("app", config);
    Ok(service)
}

fn redis_service(config: &EffectiveConfig, capabilities: &Capabilities, manifest: &VersionsManifest) -> Result<Service> {
    let image = manifest_image_ref(manifest, "REDIS")?;
    let mut service = base_service(image, capabilities.healthcheck() && config.enable_healthchecks, "redis");
    service.networks = vec![APP_NET.to_string()];
    service.volumes = vec!["${PROJECT}-redis-data:/data".to_string()];
    service.deploy = deploy_for("redis", config);
    Ok(service)
}

fn splunk_common_env(config: &EffectiveConfig, capabilities: &Capabilities) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert("SPLUNK_START_ARGS".to_string(), "--accept-license".to_string());
    if capabilities.secrets() && config.enable_secrets {
        env.insert("SPLUNK_PASSWORD_FILE".to_string(), "/run/secrets/splunk_admin_password".to_string());
    } else {
        env.insert("SPLUNK_PASSWORD".to_string(), "${SPLUNK_PASSWORD:?required}".to_string());
    }
    env
}

fn splunk_cm_service(config: &EffectiveConfig, capabilities: &Capabilities, manifest: &VersionsManifest) -> Result<Service> {
    let image = manifest_image_ref(manifest, "SPLUNK")?;
    let mut service = base_service(image, capabilities.healthcheck() && config.enable_healthchecks, "splunk_cm");
    service.networks = vec![SPLUNK_NET.to_string()];
    service.environment = splunk_common_env(config, capabilities);
    service.environment.insert("SPLUNK_ROLE".to_string(), "splunk_cluster_master".to_string());
    service.volumes = vec![
        "${PROJECT}-splunk-cm-etc:/opt/splunk/etc".to_string(),
        "${PROJECT}-splunk-cm-var:/opt/splunk/var".to_string(),
    ];
    attach_secrets(&mut service, config, capabilities);
    service.deploy = deploy_for("splunk_cm", config);
    service.profiles = profiles_for(capabilities, PROFILE_SPLUNK);
    Ok(service)
}

fn splunk_indexer_service(
    index: u32,
    config: &EffectiveConfig,
    capabilities: &Capabilities,
    manifest: &VersionsManifest,
) -> Result<Service> {
    let image = manifest_image_ref(manifest, "SPLUNK")?;
    let name = format!("splunk_idx{index}");
    let mut service = base_service(image, capabilities.healthcheck() && config.enable_healthchecks, &name);
    service.networks = vec![SPLUNK_NET.to_string()];
    service.environment = splunk_common_env(config, capabilities);
    service.environment.insert("SPLUNK_ROLE".to_string(), "splunk_indexer".to_string());
    if config.splunk_cluster_mode == crate::config::ClusterMode::Cluster || config.indexer_count > 1 {
        service.depends_on = depends_on(&["splunk_cm"], capabilities);
    }
    let s2s_port = 9997 + (index - 1);
    let hec_port = 8088 + (index - 1);
    service.ports = vec![
        format!("{s2s_port}:9997"),
        format!("{hec_port}:8088"),
    ];
    service.volumes = vec![
        format!("${{PROJECT}}-splunk-idx{index}-etc:/opt/splunk/etc"),
        format!("${{PROJECT}}-splunk-idx{index}-var:/opt/splunk/var"),
    ];
    attach_secrets(&mut service, config, capabilities);
    service.deploy = deploy_for("splunk_idx", config);
    service.profiles = profiles_for(capabilities, PROFILE_SPLUNK);
    Ok(service)
}

fn splunk_search_head_service(
    index: u32,
    config: &EffectiveConfig,
    capabilities: &Capabilities,
    manifest: &VersionsManifest,
) -> Result<Service> {
    let image = manifest_image_ref(manifest, "SPLUNK")?;
    let name = format!("splunk_sh{index}");
    let mut service = base_service(image, capabilities.healthcheck() && config.enable_healthchecks, &name);
    service.networks = vec![SPLUNK_NET.to_string()];
    service.environment = splunk_common_env(config, capabilities);
    service.environment.insert("SPLUNK_ROLE".to_string(), "splunk_search_head".to_string());
    if config.splunk_cluster_mode == crate::config::ClusterMode::Cluster || config.indexer_count > 1 {
        service.depends_on = depends_on(&["splunk_cm"], capabilities);
    }
    let web_port = 8000 + (index - 1);
    let mgmt_port = 8089 + index + 9;
    service.ports = vec![
        format!("{web_port}:8000"),
        format!("{mgmt_port}:8089"),
    ];
    service.volumes = vec![
        format!("${{PROJECT}}-splunk-sh{index}-etc:/opt/splunk/etc"),
        format!("${{PROJECT}}-splunk-sh{index}-var:/opt/splunk/var"),
    ];
    attach_secrets(&mut service, config, capabilities);
    service.deploy = deploy_for("splunk_sh", config);
    service.profiles = profiles_for(capabilities, PROFILE_SPLUNK);
    Ok(service)
}

fn attach_secrets(service: &mut Service, config: &EffectiveConfig, capabilities: &Capabilities) {
    if capabilities.secrets() && config.enable_secrets {
        service.secrets = vec!["splunk_admin_password".to_string()];
    }
}

fn prometheus_service(config: &EffectiveConfig, capabilities: &Capabilities, manifest: &VersionsManifest) -> Result<Service> {
    let image = manifest_image_ref(manifest, "PROMETHEUS")?;
    let mut service = base_service(image, capabilities.healthcheck() && config.enable_healthchecks, "prometheus");
    service.networks = vec![APP_NET.to_string()];
    let mut networks = service.networks.clone();
    if config.enable_splunk {
        networks.push(SPLUNK_NET.to_string());
    }
    service.networks = networks;
    service.ports = vec!["9090:9090".to_string()];
    service.volumes = vec![
        "./config/prometheus.yml:/etc/prometheus/prometheus.yml:ro".to_string(),
        "${PROJECT}-prometheus-data:/prometheus".to_string(),
    ];
    service.deploy = deploy_for("prometheus", config);
    service.profiles = profiles_for(capabilities, PROFILE_MONITORING);
    Ok(service)
}

fn grafana_service(config: &EffectiveConfig, capabilities: &Capabilities, manifest: &VersionsManifest) -> Result<Service> {
    let image = manifest_image_ref(manifest, "GRAFANA")?;
    let mut service = base_service(image, capabilities.healthcheck() && config.enable_healthchecks, "grafana");
    let mut networks = vec![APP_NET.to_string()];
    if config.enable_splunk {
        networks.push(SPLUNK_NET.to_string());
    }
    service.networks = networks;
    service.ports = vec!["3000:3000".to_string()];
    service.environment.insert(
        "GF_SECURITY_ADMIN_PASSWORD".to_string(),
        "${GRAFANA_ADMIN_PASSWORD:-admin}".to_string(),
    );
    service.volumes = vec![
        "./config/grafana-datasource.yml:/etc/grafana/provisioning/datasources/datasource.yml:ro".to_string(),
        "${PROJECT}-grafana-data:/var/lib/grafana".to_string(),
    ];
    service.depends_on = depends_on(&["prometheus"], capabilities);
    service.deploy = deploy_for("grafana", config);
    service.profiles = profiles_for(capabilities, PROFILE_MONITORING);
    Ok(service)
}

fn manifest_image_ref(manifest: &VersionsManifest, key: &str) -> Result<String> {
    if let Some(entry) = manifest.get(key) {
        return image_ref(&entry.repo, entry.digest.as_deref(), entry.version_tag.as_deref());
    }
    // No manifest entry: fall back to a late-bound placeholder so synthesis can still
    // proceed for optional services the manifest doesn't name; supply-chain
    // enforcement will reject this in production-class modes.
    Ok(format!("${{{key}_IMAGE:?no image configured for {key}}}"))
}

fn named_volume() -> Volume {
    Volume::default()
}

/// Assemble a `ComposeDocument` from resolved inputs. Never emits a `secrets:`
/// attachment unless `capabilities.secrets() && config.enable_secrets`.
pub fn synthesize(
    config: &EffectiveConfig,
    capabilities: &Capabilities,
    manifest: &VersionsManifest,
) -> Result<ComposeDocument> {
    let mut services = BTreeMap::new();
    let mut volumes = BTreeMap::new();
    let mut networks = BTreeMap::new();
    let mut secrets = BTreeMap::new();

    networks.insert(APP_NET.to_string(), Network::default());
    if config.enable_splunk {
        networks.insert(SPLUNK_NET.to_string(), Network::default());
    }

    services.insert("app".to_string(), app_service(config, capabilities, manifest)?);
    services.insert("redis".to_string(), redis_service(config, capabilities, manifest)?);
    volumes.insert("${PROJECT}-redis-data".to_string(), named_volume());

    if config.enable_splunk {
        let multi_node = config.indexer_count > 1 || config.search_head_count > 1;
        if config.splunk_cluster_mode == crate::config::ClusterMode::Cluster || multi_node {
            services.insert(
                "splunk_cm".to_string(),
                splunk_cm_service(config, capabilities, manifest)?,
            );
            volumes.insert("${PROJECT}-splunk-cm-etc".to_string(), named_volume());
            volumes.insert("${PROJECT}-splunk-cm-var".to_string(), named_volume());
        }

        for i in 1..=config.indexer_count {
            services.insert(
                format!("splunk_idx{i}"),
                splunk_indexer_service(i, config, capabilities, manifest)?,
            );
            volumes.insert(format!("${{PROJECT}}-splunk-idx{i}-etc"), named_volume());
            volumes.insert(format!("${{PROJECT}}-splunk-idx{i}-var"), named_volume());
        }

        for i in 1..=config.search_head_count {
            services.insert(
                format!("splunk_sh{i}"),
                splunk_search_head_service(i, config, capabilities, manifest)?,
            );
            volumes.insert(format!("${{PROJECT}}-splunk-sh{i}-etc"), named_volume());
            volumes.insert(format!("${{PROJECT}}-splunk-sh{i}-var"), named_volume());
        }

        if capabilities.secrets() && config.enable_secrets {
            secrets.insert(
                "splunk_admin_password".to_string(),
                Secret {
                    environment: Some("SPLUNK_ADMIN_PASSWORD".to_string()),
                    ..Default::default()
                },
            );
        }
    }

    if config.enable_monitoring {
        services.insert("prometheus".to_string(), prometheus_service(config, capabilities, manifest)?);
        services.insert("grafana".to_string(), grafana_service(config, capabilities, manifest)?);
        volumes.insert("${PROJECT}-prometheus-data".to_string(), named_volume());
        volumes.insert("${PROJECT}-grafana-data".to_string(), named_volume());
    }

    Ok(ComposeFile {
        name: "${PROJECT}".to_string(),
        services,
        networks,
        volumes,
        secrets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClusterMode, DeploymentMode, LogLevel};
    use crate::platform::{Capabilities, ComposeImpl};
    use std::path::PathBuf;

    fn sample_manifest() -> VersionsManifest {
        VersionsManifest::parse(
            "APP_IMAGE=example.com/app\n\
             APP_DIGEST=sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\n\
             REDIS_IMAGE=redis\n\
             REDIS_DIGEST=sha256:bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb\n\
             SPLUNK_IMAGE=splunk/splunk\n\
             SPLUNK_DIGEST=sha256:cccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccc\n\
             PROMETHEUS_IMAGE=prom/prometheus\n\
             PROMETHEUS_DIGEST=sha256:dddddddddddddddddddddddddddddddddddddddddddddddddddddddddddddddd\n\
             GRAFANA_IMAGE=grafana/grafana\n\
             GRAFANA_DIGEST=sha256:eeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee\n",
        )
        .unwrap()
    }

    fn base_config() -> EffectiveConfig {
        EffectiveConfig {
            project_name: "demo".into(),
            app_port: 8080,
            data_dir: PathBuf::from("./data"),
            splunk_data_dir: PathBuf::from("./splunk-data"),
            enable_monitoring: false,
            enable_splunk: false,
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
            deployment_mode: DeploymentMode::Development,
            confirm_insufficient: false,
            no_validation: false,
            interactive: false,
        }
    }

    #[test]
    fn minimal_doc_has_app_and_redis_only() {
        let config = base_config();
        let caps = Capabilities::for_test(ComposeImpl::DockerComposeV2);
        let doc = synthesize(&config, &caps, &sample_manifest()).unwrap();
        assert_eq!(doc.services.len(), 2);
        assert!(doc.services.contains_key("app"));
        assert!(doc.services.contains_key("redis"));
        assert!(!doc.networks.contains_key(SPLUNK_NET));
    }

    #[test]
    fn splunk_cluster_ports_follow_the_formula() {
        let mut config = base_config();
        config.enable_splunk = true;
        config.splunk_cluster_mode = ClusterMode::Cluster;
        config.indexer_count = 3;
        config.search_head_count = 2;
        let caps = Capabilities::for_test(ComposeImpl::DockerComposeV2);
        let doc = synthesize(&config, &caps, &sample_manifest()).unwrap();

        let idx2 = &doc.services["splunk_idx2"];
        assert!(idx2.ports.contains(&"9998:9997".to_string()));
        assert!(idx2.ports.contains(&"8089:8088".to_string()));

        let sh2 = &doc.services["splunk_sh2"];
        assert!(sh2.ports.contains(&"8001:8000".to_string()));
        assert!(sh2.ports.contains(&"8100:8089".to_string()));

        assert!(doc.services.contains_key("splunk_cm"));
        assert!(doc.networks.contains_key(SPLUNK_NET));
    }

    #[test]
    fn secrets_never_emitted_without_capability_and_config_both_true() {
        let mut config = base_config();
        config.enable_splunk = true;
        config.enable_secrets = false;
        let caps = Capabilities::for_test(ComposeImpl::DockerComposeV2);
        let doc = synthesize(&config, &caps, &sample_manifest()).unwrap();
        assert!(doc.secrets.is_empty());
        assert!(doc.services["splunk_idx1"].secrets.is_empty());

        let mut config2 = base_config();
        config2.enable_splunk = true;
        let caps_no_secrets = Capabilities::for_test(ComposeImpl::PodmanComposePy);
        let doc2 = synthesize(&config2, &caps_no_secrets, &sample_manifest()).unwrap();
        assert!(doc2.secrets.is_empty());
        assert!(doc2.services["splunk_idx1"].secrets.is_empty());
    }

    #[test]
    fn secrets_emitted_when_both_capability_and_config_true() {
        let mut config = base_config();
        config.enable_splunk = true;
        config.enable_secrets = true;
        let caps = Capabilities::for_test(ComposeImpl::DockerComposeV2);
        let doc = synthesize(&config, &caps, &sample_manifest()).unwrap();
        assert!(!doc.secrets.is_empty());
        assert_eq!(doc.services["splunk_idx1"].secrets, vec!["splunk_admin_password".to_string()]);
    }

    #[test]
    fn monitoring_services_attach_to_both_networks_when_splunk_enabled() {
        let mut config = base_config();
        config.enable_splunk = true;
        config.enable_monitoring = true;
        let caps = Capabilities::for_test(ComposeImpl::DockerComposeV2);
        let doc = synthesize(&config, &caps, &sample_manifest()).unwrap();
        let prometheus = &doc.services["prometheus"];
        assert!(prometheus.networks.contains(&APP_NET.to_string()));
        assert!(prometheus.networks.contains(&SPLUNK_NET.to_string()));
    }

    #[test]
    fn instance_numbering_is_stable_across_regenerations() {
        let mut config = base_config();
        config.enable_splunk = true;
        config.indexer_count = 2;
        let caps = Capabilities::for_test(ComposeImpl::DockerComposeV2);
        let doc1 = synthesize(&config, &caps, &sample_manifest()).unwrap();
        let doc2 = synthesize(&config, &caps, &sample_manifest()).unwrap();
        assert_eq!(
            doc1.services["splunk_idx1"].ports,
            doc2.services["splunk_idx1"].ports
        );
        assert_eq!(
            doc1.services["splunk_idx2"].ports,
            doc2.services["splunk_idx2"].ports
        );
    }

    #[test]
    fn splunk_and_grafana_depend_on_their_upstream_with_health_condition() {
        let mut config = base_config();
        config.enable_splunk = true;
        config.enable_monitoring = true;
        let caps = Capabilities::for_test(ComposeImpl::DockerComposeV2);
        let doc = synthesize(&config, &caps, &sample_manifest()).unwrap();
        assert_eq!(
            doc.services["splunk_idx1"].depends_on,
            DependsOn::Long(BTreeMap::from([(
                "splunk_cm".to_string(),
                DependsOnEntry {
                    condition: "service_healthy".to_string(),
                },
            )]))
        );
        assert_eq!(
            doc.services["grafana"].depends_on,
            DependsOn::Long(BTreeMap::from([(
                "prometheus".to_string(),
                DependsOnEntry {
                    condition: "service_healthy".to_string(),
                },
            )]))
        );
    }

    #[test]
    fn profiles_attach_only_when_capability_present() {
        let mut config = base_config();
        config.enable_splunk = true;
        config.enable_monitoring = true;

        let caps = Capabilities::for_test(ComposeImpl::DockerComposeV2);
        let doc = synthesize(&config, &caps, &sample_manifest()).unwrap();
        assert_eq!(doc.services["splunk_idx1"].profiles, vec!["splunk".to_string()]);
        assert_eq!(doc.services["splunk_cm"].profiles, vec!["splunk".to_string()]);
        assert_eq!(doc.services["grafana"].profiles, vec!["monitoring".to_string()]);
        assert_eq!(doc.services["prometheus"].profiles, vec!["monitoring".to_string()]);
        assert!(doc.services["app"].profiles.is_empty());

        let caps_no_profiles = Capabilities::for_test(ComposeImpl::PodmanComposePy);
        let doc2 = synthesize(&config, &caps_no_profiles, &sample_manifest()).unwrap();
        assert!(doc2.services["splunk_idx1"].profiles.is_empty());
        assert!(doc2.services["grafana"].profiles.is_empty());
    }
}
