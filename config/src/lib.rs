//! Load configuration from `~/.config/<app>/config.toml` and a project `.env`, then apply
//! both to the process environment with priority: **existing env > .env > config.toml**.
//!
//! The `[env]` table of `config.toml` holds plain `KEY = "value"` pairs; the `.env` file
//! uses the usual `KEY=value` lines. Neither source ever overwrites a variable that is
//! already set in the environment, so deployment-level configuration always wins.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("read config.toml: {0}")]
    TomlRead(std::io::Error),
    #[error("parse config.toml: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("read .env: {0}")]
    EnvRead(std::io::Error),
}

#[derive(serde::Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    env: HashMap<String, String>,
}

fn app_config_path(app_name: &str) -> Option<PathBuf> {
    let path = dirs::config_dir()?.join(app_name).join("config.toml");
    path.is_file().then_some(path)
}

/// Reads the `[env]` table of `config.toml` for `app_name`. Missing file yields an empty map.
fn load_toml_map(app_name: &str) -> Result<HashMap<String, String>, LoadError> {
    let Some(path) = app_config_path(app_name) else {
        return Ok(HashMap::new());
    };
    let content = std::fs::read_to_string(&path).map_err(LoadError::TomlRead)?;
    let parsed: ConfigFile = toml::from_str(&content)?;
    Ok(parsed.env)
}

/// Minimal `.env` line parser: `KEY=VALUE`, `#` comment lines skipped, keys and values
/// trimmed. Double-quoted values support `\"`; single-quoted values are stripped verbatim.
/// No multiline values.
fn parse_env_lines(content: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let raw = raw.trim();
        let value = if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
            raw[1..raw.len() - 1].replace("\\\"", "\"")
        } else if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
            raw[1..raw.len() - 1].to_string()
        } else {
            raw.to_string()
        };
        out.insert(key.to_string(), value);
    }
    out
}

/// Reads `.env` from `dir` (or the current directory). Missing file yields an empty map.
fn load_env_map(dir: Option<&Path>) -> Result<HashMap<String, String>, LoadError> {
    let base = match dir {
        Some(d) => d.to_path_buf(),
        None => std::env::current_dir().map_err(LoadError::EnvRead)?,
    };
    let path = base.join(".env");
    if !path.is_file() {
        return Ok(HashMap::new());
    }
    let content = std::fs::read_to_string(&path).map_err(LoadError::EnvRead)?;
    Ok(parse_env_lines(&content))
}

/// Loads both sources and sets each key that is **not** already present in the process
/// environment, choosing the `.env` value over the `config.toml` value when both define it.
///
/// * `app_name`: e.g. `"tether"` — resolves `~/.config/tether/config.toml`.
/// * `override_dir`: when `Some`, `.env` is looked up there instead of the current directory.
pub fn load_and_apply(app_name: &str, override_dir: Option<&Path>) -> Result<(), LoadError> {
    let toml_map = load_toml_map(app_name)?;
    let env_map = load_env_map(override_dir)?;

    let mut keys: std::collections::HashSet<&String> = toml_map.keys().collect();
    keys.extend(env_map.keys());

    for key in keys {
        if std::env::var(key).is_ok() {
            continue;
        }
        if let Some(v) = env_map.get(key).or_else(|| toml_map.get(key)) {
            std::env::set_var(key, v);
        }
    }
    Ok(())
}
