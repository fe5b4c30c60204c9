//! Configuration file loading
//!
//! Supports `~/.config/wakeloop/config.toml` (or any `.toml`, `.yaml`, `.yml`
//! file given explicitly). Nested tables are flattened into dotted keys, so
//!
//! ```toml
//! [audio.buffer]
//! snapshot_ms = 120
//! ```
//!
//! and a top-level `"audio.buffer.snapshot_ms" = 120` are equivalent.

use std::path::{Path, PathBuf};

use serde_json::Value;

use super::Settings;
use crate::{Error, Result};

/// Location of the per-user configuration file
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "wakeloop", "wakeloop")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Read and flatten a configuration file
///
/// # Errors
///
/// Returns error if the file cannot be read, has an unsupported extension,
/// or fails to parse
pub fn load_settings(path: &Path) -> Result<Settings> {
    let contents = std::fs::read_to_string(path)?;
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    let settings = match extension.as_deref() {
        Some("toml") => parse_toml(&contents)?,
        Some("yaml" | "yml") => parse_yaml(&contents)?,
        _ => {
            return Err(Error::Config(format!(
                "unsupported config file type: {}",
                path.display()
            )));
        }
    };

    tracing::debug!(path = %path.display(), keys = settings.len(), "loaded config file");
    Ok(settings)
}

/// Parse TOML text into flat settings
///
/// # Errors
///
/// Returns error if the text is not valid TOML
pub fn parse_toml(contents: &str) -> Result<Settings> {
    let table: toml::Table = toml::from_str(contents)?;
    let value = serde_json::to_value(table)?;
    Ok(flatten(value))
}

/// Parse YAML text into flat settings
///
/// # Errors
///
/// Returns error if the text is not valid YAML
pub fn parse_yaml(contents: &str) -> Result<Settings> {
    let value: Value = serde_yaml::from_str(contents)?;
    Ok(flatten(value))
}

fn flatten(root: Value) -> Settings {
    let mut settings = Settings::new();
    let mut stack = vec![(String::new(), root)];

    while let Some((prefix, value)) = stack.pop() {
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    let full = if prefix.is_empty() {
                        key
                    } else {
                        format!("{prefix}.{key}")
                    };
                    stack.push((full, child));
                }
            }
            Value::Null => {}
            leaf if !prefix.is_empty() => settings.set(prefix, leaf),
            _ => {}
        }
    }

    settings
}
