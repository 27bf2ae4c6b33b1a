//! Config loader — reads `~/.aeon/config.json`, expands `${VAR}`
//! placeholders from the environment, and applies env-var overrides.
//!
//! # Loading precedence
//! 1. Defaults (from `Config::default()`)
//! 2. JSON file at `~/.aeon/config.json`
//! 3. Environment variables `AEON_<SECTION>__<FIELD>` (override JSON)
//!
//! Loading fails if a `${VAR}` placeholder in a secret field cannot be
//! expanded — a silently empty API key would surface much later as a
//! confusing provider error.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use super::schema::Config;

/// Default config file path.
pub fn get_config_path() -> PathBuf {
    crate::utils::get_data_path().join("config.json")
}

/// Load configuration from the given path (or the default), expand
/// placeholders, apply env overrides, and validate.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);

    let mut config = if config_path.exists() {
        debug!(path = %config_path.display(), "loading config");
        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("reading {}", config_path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", config_path.display()))?
    } else {
        info!(path = %config_path.display(), "no config file, using defaults");
        Config::default()
    };

    expand_placeholders(&mut config);
    apply_env_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

/// Save configuration to disk (pretty-printed JSON with camelCase keys).
pub fn save_config(config: &Config, path: Option<&Path>) -> Result<()> {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&config_path, json)?;
    debug!(path = %config_path.display(), "config saved");
    Ok(())
}

/// Expand `${VAR}` placeholders in secret fields from the environment.
///
/// Placeholders that resolve to nothing are left in place; `validate()`
/// then rejects them.
fn expand_placeholders(config: &mut Config) {
    for settings in config.providers.values_mut() {
        settings.api_key = expand_one(&settings.api_key);
    }
}

fn expand_one(value: &str) -> String {
    let Some(start) = value.find("${") else {
        return value.to_string();
    };
    let Some(end) = value[start..].find('}') else {
        return value.to_string();
    };
    let var = &value[start + 2..start + end];
    match std::env::var(var) {
        Ok(resolved) => format!("{}{}{}", &value[..start], resolved, &value[start + end + 1..]),
        Err(_) => value.to_string(),
    }
}

/// Apply environment variable overrides on top of a loaded config.
///
/// Env var format: `AEON_<SECTION>__<FIELD>` (double underscore delimiter).
fn apply_env_overrides(config: &mut Config) {
    if let Ok(val) = std::env::var("AEON_AGENT__MAX_HISTORY_MESSAGES") {
        if let Ok(n) = val.parse() {
            config.agent.max_history_messages = n;
        }
    }
    if let Ok(val) = std::env::var("AEON_AGENT__MAX_TOOL_ITERATIONS") {
        if let Ok(n) = val.parse() {
            config.agent.max_tool_iterations = n;
        }
    }
    if let Ok(val) = std::env::var("AEON_AGENT__WORKSPACE") {
        config.agent.workspace = val;
    }
    if let Ok(val) = std::env::var("AEON_ROUTING__PRIMARY") {
        config.routing.primary = val;
    }
    if let Ok(val) = std::env::var("AEON_MEMORY__DB_PATH") {
        config.memory.db_path = val;
    }
    if let Ok(val) = std::env::var("AEON_LOGGING__LEVEL") {
        config.logging.level = val;
    }

    // Provider API keys: AEON_PROVIDERS__<NAME>__API_KEY
    let names: Vec<String> = config.providers.keys().cloned().collect();
    for name in names {
        let var = format!("AEON_PROVIDERS__{}__API_KEY", name.to_uppercase());
        if let Ok(val) = std::env::var(&var) {
            if let Some(settings) = config.providers.get_mut(&name) {
                settings.api_key = val;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::ProviderSettings;

    fn write_config(dir: &tempfile::TempDir, json: &str) -> PathBuf {
        let path = dir.path().join("config.json");
        std::fs::write(&path, json).unwrap();
        path
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.json");
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.agent.name, "Aeon");
    }

    #[test]
    fn test_load_parses_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"{"agent": {"name": "TestKernel", "maxToolIterations": 7}}"#,
        );
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.agent.name, "TestKernel");
        assert_eq!(config.agent.max_tool_iterations, 7);
    }

    #[test]
    fn test_load_rejects_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "{ not json");
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn test_placeholder_expansion() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("AEON_TEST_KEY_VAR", "sk-expanded");
        let path = write_config(
            &dir,
            r#"{"providers": {"anthropic": {"apiKey": "${AEON_TEST_KEY_VAR}", "model": "m"}}}"#,
        );
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.providers["anthropic"].api_key, "sk-expanded");
        std::env::remove_var("AEON_TEST_KEY_VAR");
    }

    #[test]
    fn test_unexpanded_placeholder_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"{"providers": {"x": {"apiKey": "${AEON_DEFINITELY_UNSET_VAR}", "model": "m"}}}"#,
        );
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.providers.insert(
            "openai".into(),
            ProviderSettings {
                api_key: "sk-saved".into(),
                api_base: None,
                model: "gpt-4o".into(),
            },
        );
        save_config(&config, Some(&path)).unwrap();

        let loaded = load_config(Some(&path)).unwrap();
        assert_eq!(loaded.providers["openai"].api_key, "sk-saved");
    }

    #[test]
    fn test_expand_one_partial() {
        std::env::set_var("AEON_TEST_PARTIAL", "abc");
        assert_eq!(expand_one("pre-${AEON_TEST_PARTIAL}-post"), "pre-abc-post");
        assert_eq!(expand_one("no placeholder"), "no placeholder");
        std::env::remove_var("AEON_TEST_PARTIAL");
    }
}
