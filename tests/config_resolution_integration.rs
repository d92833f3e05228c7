//! End-to-end precedence tests for `config::resolve`: defaults < template <
//! environment < CLI. Exercised from outside the crate so it only sees the public
//! surface a binary or another crate would use.

use splunk_orchestrator::config::{CredentialsProvider, NullCredentialsProvider, RawOverrides};

#[test]
fn cli_overrides_template_and_env() {
    let template = RawOverrides::from_template_text("PROJECT_NAME=from-template\nAPP_PORT=9000\n");
    let env = RawOverrides::new()
        .with("APP_PORT", "9100")
        .with("ENABLE_MONITORING", "true");
    let cli = RawOverrides::new().with("APP_PORT", "9200");

    let cwd = std::env::current_dir().unwrap();
    let outcome = splunk_orchestrator::config::resolve(
        Some(&template),
        &env,
        &cli,
        &cwd,
        &NullCredentialsProvider,
    )
    .unwrap();

    assert_eq!(outcome.config.project_name, "from-template");
    assert_eq!(outcome.config.app_port, 9200);
    assert!(outcome.config.enable_monitoring);
}

#[test]
fn absent_layers_fall_back_to_documented_defaults() {
    let cwd = std::env::current_dir().unwrap();
    let outcome = splunk_orchestrator::config::resolve(
        None,
        &RawOverrides::new(),
        &RawOverrides::new(),
        &cwd,
        &NullCredentialsProvider,
    )
    .unwrap();

    assert_eq!(outcome.config.app_port, 8080);
    assert_eq!(outcome.config.splunk_web_port, 8000);
    assert!(!outcome.config.enable_splunk);
}

#[test]
fn generated_secrets_are_never_surfaced_by_the_null_provider() {
    let provider = NullCredentialsProvider;
    assert!(provider.get("splunk", "admin_password").is_none());
}
