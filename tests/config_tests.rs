//! Configuration loading from YAML files

use std::io::Write;
use std::time::Duration;

use pretty_assertions::assert_eq;

use odoo_mcp_gateway::config::Config;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn yaml_file_overrides_defaults() {
    let file = write_config(
        r#"
server:
  port: 9100
  request_timeout: "5s"
auth:
  api_key: "shared-secret"
odoo:
  url: "https://erp.example.com/"
  database: "prod"
  username: "bot"
  api_key: "abc123"
  version: "16.0"
  timeout: "2m"
cache:
  ttl: "10m"
  max_entries: 50
tools:
  preflight: true
  database_admin: true
"#,
    );

    let mut config = Config::load(Some(file.path())).unwrap();
    config.validate().unwrap();

    assert_eq!(config.server.port, 9100);
    assert_eq!(config.server.request_timeout, Duration::from_secs(5));
    assert_eq!(config.odoo.url, "https://erp.example.com");
    assert_eq!(config.odoo.timeout, Duration::from_secs(120));
    assert_eq!(config.odoo.resolve_secret().as_deref(), Some("abc123"));
    assert_eq!(config.cache.ttl, Duration::from_secs(600));
    assert_eq!(config.cache.max_entries, 50);
    assert_eq!(config.auth.resolve_api_key().as_deref(), Some("shared-secret"));

    let settings = config.dispatch_settings();
    assert!(settings.preflight);
    assert!(config.gates().database_admin);
    assert!(!config.gates().passthrough);
}

#[test]
fn placeholders_expand_with_defaults() {
    let file = write_config(
        r#"
odoo:
  url: "${ODOO_GW_TEST_NEVER_SET_URL:-http://localhost:8069}"
  db: "${ODOO_GW_TEST_NEVER_SET_DB:-devel}"
  username: "admin"
  password: "admin"
"#,
    );

    let mut config = Config::load(Some(file.path())).unwrap();
    config.validate().unwrap();

    assert_eq!(config.odoo.url, "http://localhost:8069");
    assert_eq!(config.odoo.database, "devel");
}

#[test]
fn missing_file_is_a_config_error() {
    let err = Config::load(Some(std::path::Path::new("/nonexistent/gateway.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
}

#[test]
fn missing_required_value_names_the_key() {
    let file = write_config(
        r#"
odoo:
  url: "http://localhost:8069"
  username: "admin"
  password: "admin"
"#,
    );

    let mut config = Config::load(Some(file.path())).unwrap();
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("odoo.database"));
}

#[test]
fn unknown_version_hint_is_rejected_at_startup() {
    let file = write_config(
        r#"
odoo:
  url: "http://localhost:8069"
  database: "d"
  username: "admin"
  password: "admin"
  version: "5.0"
"#,
    );

    let mut config = Config::load(Some(file.path())).unwrap();
    assert!(config.validate().unwrap_err().to_string().contains("odoo.version"));
}
