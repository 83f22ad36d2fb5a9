// tests/config_load.rs
//
// Config discovery (env var, then config/pws.toml, then config/pws.json) and
// API key resolution. Env and CWD are process-global, so tests run serially.

use std::{env, fs};

use pws_fallback::config::{AppConfig, ENV_API_KEY, ENV_CONFIG_PATH};
use serial_test::serial;

const TOML_CFG: &str = r#"
api_key = "ENV"
forecast = true
calendar_day = true
language = "hu-HU"
poll_interval_secs = 120

[[groups]]
name = "velence"
latitude = 47.23
longitude = 18.61

[[groups.stations]]
id = "IVELEN12"
name = "Velence Lakeside"
priority = 1

[[groups.stations]]
id = "IGARDO3"
priority = 2
"#;

const JSON_CFG: &str = r#"{
  "api_key": "json-key",
  "groups": [ { "name": "backyard", "stations": [ { "id": "KNCCARY89", "priority": 1 } ] } ]
}"#;

struct CwdGuard(std::path::PathBuf);

impl Drop for CwdGuard {
    fn drop(&mut self) {
        let _ = env::set_current_dir(&self.0);
    }
}

fn enter_tempdir() -> (tempfile::TempDir, CwdGuard) {
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();
    (tmp, CwdGuard(old))
}

#[test]
#[serial]
fn env_path_wins_and_env_key_resolves() {
    let (tmp, _guard) = enter_tempdir();
    let path = tmp.path().join("custom.toml");
    fs::write(&path, TOML_CFG).unwrap();

    env::set_var(ENV_CONFIG_PATH, &path);
    env::set_var(ENV_API_KEY, "from-env");
    let cfg = AppConfig::load().unwrap();
    env::remove_var(ENV_CONFIG_PATH);
    env::remove_var(ENV_API_KEY);

    assert_eq!(cfg.api_key, "from-env");
    assert_eq!(cfg.poll_interval().as_secs(), 120);
    let opts = cfg.fetch_options();
    assert!(opts.forecast && opts.calendar_day);
    assert_eq!(opts.language, "hu-HU");

    let groups = cfg.groups().unwrap();
    assert_eq!(groups.len(), 1);
    let g = &groups[0];
    assert_eq!(g.sources()[0].display_name, "Velence Lakeside");
    assert_eq!(g.sources()[1].display_name, "IGARDO3");
    assert!(g.coordinates().is_some());
}

#[test]
#[serial]
fn env_key_missing_is_an_error() {
    let (tmp, _guard) = enter_tempdir();
    let path = tmp.path().join("pws.toml");
    fs::write(&path, TOML_CFG).unwrap();

    env::remove_var(ENV_API_KEY);
    let err = AppConfig::load_from_file(&path).unwrap_err();
    assert!(format!("{err:#}").contains(ENV_API_KEY));
}

#[test]
#[serial]
fn env_path_to_missing_file_is_an_error() {
    let (_tmp, _guard) = enter_tempdir();
    env::set_var(ENV_CONFIG_PATH, "does/not/exist.toml");
    let res = AppConfig::load();
    env::remove_var(ENV_CONFIG_PATH);
    assert!(res.is_err());
}

#[test]
#[serial]
fn falls_back_to_config_dir() {
    let (_tmp, _guard) = enter_tempdir();
    env::remove_var(ENV_CONFIG_PATH);

    assert!(AppConfig::load().is_err(), "no file at all is an error");

    fs::create_dir_all("config").unwrap();
    fs::write("config/pws.json", JSON_CFG).unwrap();
    let cfg = AppConfig::load().unwrap();
    assert_eq!(cfg.api_key, "json-key");
    assert_eq!(cfg.groups[0].name, "backyard");

    // TOML takes precedence over JSON
    env::set_var(ENV_API_KEY, "toml-env-key");
    fs::write("config/pws.toml", TOML_CFG).unwrap();
    let cfg = AppConfig::load().unwrap();
    env::remove_var(ENV_API_KEY);
    assert_eq!(cfg.groups[0].name, "velence");
}
