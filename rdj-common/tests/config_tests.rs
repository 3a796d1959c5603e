//! Config file resolution and graceful degradation tests
//!
//! Tests that manipulate RDJ_TEST_CONFIG are marked #[serial] so they do not
//! race on the process environment.

use rdj_common::config::{load_toml_or_default, parse_toml, resolve_config_path};
use serde::Deserialize;
use serial_test::serial;
use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
struct SampleConfig {
    poll_interval_ms: u64,
    label: String,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 3000,
            label: "default".to_string(),
        }
    }
}

#[test]
#[serial]
fn test_cli_argument_wins_over_env() {
    env::set_var("RDJ_TEST_CONFIG", "/tmp/from-env.toml");
    let resolved = resolve_config_path(Some(Path::new("/tmp/from-cli.toml")), "RDJ_TEST_CONFIG");
    assert_eq!(resolved, Some(PathBuf::from("/tmp/from-cli.toml")));
    env::remove_var("RDJ_TEST_CONFIG");
}

#[test]
#[serial]
fn test_env_var_used_without_cli() {
    env::set_var("RDJ_TEST_CONFIG", "/tmp/from-env.toml");
    let resolved = resolve_config_path(None, "RDJ_TEST_CONFIG");
    assert_eq!(resolved, Some(PathBuf::from("/tmp/from-env.toml")));
    env::remove_var("RDJ_TEST_CONFIG");
}

#[test]
fn test_missing_file_falls_back_to_defaults() {
    let loaded: SampleConfig =
        load_toml_or_default(Some(Path::new("/nonexistent/rdj/config.toml"))).unwrap();
    assert_eq!(loaded, SampleConfig::default());

    let none: SampleConfig = load_toml_or_default(None).unwrap();
    assert_eq!(none, SampleConfig::default());
}

#[test]
fn test_partial_file_keeps_remaining_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "poll_interval_ms = 1500").unwrap();

    let loaded: SampleConfig = load_toml_or_default(Some(file.path())).unwrap();
    assert_eq!(loaded.poll_interval_ms, 1500);
    assert_eq!(loaded.label, "default");
}

#[test]
fn test_malformed_file_is_an_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "poll_interval_ms = \"soon\"").unwrap();

    let result: rdj_common::Result<SampleConfig> = load_toml_or_default(Some(file.path()));
    assert!(result.is_err());
}

#[test]
fn test_parse_toml_inline() {
    let parsed: SampleConfig = parse_toml("label = \"lobby\"").unwrap();
    assert_eq!(parsed.label, "lobby");
    assert_eq!(parsed.poll_interval_ms, 3000);
}
