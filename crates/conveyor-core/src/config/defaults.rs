//! Default configuration values

use super::types::Config;

/// Default configuration file name (YAML)
pub const DEFAULT_CONFIG_YAML: &str = "conveyor.yaml";

/// Default configuration file name (TOML)
pub const DEFAULT_CONFIG_TOML: &str = "conveyor.toml";

/// Alternative configuration file name
pub const ALT_CONFIG_FILE: &str = ".conveyor.yaml";

/// Get list of config file names to search for
pub fn config_file_names() -> Vec<&'static str> {
    vec![
        DEFAULT_CONFIG_YAML,
        DEFAULT_CONFIG_TOML,
        ALT_CONFIG_FILE,
        ".conveyor.toml",
    ]
}

/// Generate default configuration YAML
pub fn default_config_yaml() -> String {
    let config = Config::default();
    serde_yaml::to_string(&config).unwrap_or_else(|_| DEFAULT_CONFIG_TEMPLATE.to_string())
}

/// Default configuration template
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Conveyor Configuration

flow:
  concurrency: 1

cache:
  enabled: true
  dir: .conveyor/cache
  step_result_ttl_days: 30

constraints:
  unspecified_skip_status: skippedAsPassed

report:
  json: .conveyor/report.json

steps:
  - name: install
    run: root
    command: npm install
    cache: off
  - name: build
    command: npm run build
    only_if_script: build
    skip_if_some_direct_prev_steps_failed_on_package: true
  - name: test
    command: npm test
    only_if_script: test
    skip_if_some_direct_prev_steps_failed_on_package: true
    cache: honor
  - name: publish
    command: npm publish
    skip_private: true
    skip_if_some_direct_prev_steps_failed_on_package: true
    cache: honor
    enabled: false
"#;
