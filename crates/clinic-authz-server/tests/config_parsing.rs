use std::{env, fs, time::Duration};

use clinic_authz_server::ServerBuilder;
use clinic_authz_server::config::loader::load_config;

#[test]
fn config_parsing_and_env_overrides_and_validation() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("clinic-authz.toml");

    let toml_content = r#"
[server]
host = "127.0.0.1"
port = 8181

[logging]
level = "debug"

[membership]
base_url = "http://membership.internal:8080"
request_timeout = "750ms"

[authz]
resolver_timeout = "1s"
"#;
    fs::write(&path, toml_content).expect("write toml");

    // 1) Valid config parses
    let cfg = load_config(path.to_str()).expect("should parse config");
    assert_eq!(cfg.server.port, 8181);
    assert_eq!(cfg.logging.level, "debug");
    assert_eq!(
        cfg.membership.base_url.as_deref(),
        Some("http://membership.internal:8080")
    );
    assert_eq!(cfg.membership.request_timeout, Duration::from_millis(750));
    assert_eq!(cfg.authz.resolver_timeout, Duration::from_secs(1));
    assert!(cfg.authz.policy_path.is_none());

    // 2) Env override should win over file
    unsafe {
        env::set_var("CLINIC_AUTHZ__SERVER__PORT", "9191");
    }
    let cfg_env = load_config(path.to_str()).expect("should parse config with env overrides");
    assert_eq!(cfg_env.server.port, 9191);
    unsafe {
        env::remove_var("CLINIC_AUTHZ__SERVER__PORT");
    }

    // 3) Invalid config should error
    let invalid_path = dir.path().join("invalid.toml");
    let invalid_toml = r#"
[authz]
resolver_timeout = "0s"
"#;
    fs::write(&invalid_path, invalid_toml).expect("write invalid toml");
    let err = load_config(invalid_path.to_str()).expect_err("expected validation error");
    assert!(err.contains("resolver_timeout"));

    // 4) Missing file falls back to defaults
    let missing = dir.path().join("absent.toml");
    let cfg_default = load_config(missing.to_str()).expect("defaults are valid");
    assert_eq!(cfg_default.server.port, 8080);
}

#[test]
fn broken_rule_file_fails_startup() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let rules = dir.path().join("rules.toml");
    fs::write(
        &rules,
        r#"
[[rule]]
path = "/v1/clinics/{clinicId}"
methods = ["GET"]
allow = { owner = "patientId" }
"#,
    )
    .expect("write rules");

    let config_path = dir.path().join("clinic-authz.toml");
    let escaped = rules.display().to_string().replace('\\', "\\\\");
    fs::write(
        &config_path,
        format!("[authz]\npolicy_path = \"{escaped}\"\n"),
    )
    .expect("write config");

    let cfg = load_config(config_path.to_str()).expect("config itself is valid");
    let err = ServerBuilder::new()
        .with_config(cfg)
        .build()
        .err()
        .expect("rule compilation should fail");
    assert!(err.to_string().contains("patientId"));
}
