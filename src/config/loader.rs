//! Configuration loading from disk.
//!
//! `resolve` layers the persisted file over a set of defaults. Missing fields
//! are taken from the defaults and the file is rewritten so that it always
//! carries the complete tree.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;

use crate::config::schema::EffectiveConfig;
use crate::config::validation::ValidationError;

/// Map-valued fields. A persisted value replaces the default instead of being
/// merged key by key.
const REPLACED_WHOLE: &[&str] = &["inject.rules", "tunnel_core.extra"];

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Parse error in {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    #[error("Serialize error: {0}")]
    Serialize(String),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// On-disk format, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Toml,
}

impl Format {
    fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Format::Toml,
            _ => Format::Json,
        }
    }

    fn parse(self, path: &Path, content: &str) -> Result<Value, ConfigError> {
        let parsed = match self {
            Format::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
            Format::Toml => toml::from_str(content).map_err(|e| e.to_string()),
        };
        parsed.map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    fn render(self, config: &EffectiveConfig) -> Result<String, ConfigError> {
        match self {
            Format::Json => serde_json::to_string_pretty(config)
                .map(|mut s| {
                    s.push('\n');
                    s
                })
                .map_err(|e| ConfigError::Serialize(e.to_string())),
            Format::Toml => toml::to_string_pretty(config).map_err(|e| ConfigError::Serialize(e.to_string())),
        }
    }
}

/// Resolve the effective configuration from `path` and `defaults`.
///
/// The file is created from `defaults` when absent, and rewritten when it
/// lacks any field. IO failures are returned as-is and are fatal to startup.
pub fn resolve(path: &Path, defaults: &EffectiveConfig) -> Result<EffectiveConfig, ConfigError> {
    let format = Format::from_path(path);

    let persisted = match fs::read_to_string(path) {
        Ok(content) => Some(format.parse(path, &content)?),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let mut merged = serde_json::to_value(defaults).map_err(|e| ConfigError::Serialize(e.to_string()))?;
    if let Some(document) = &persisted {
        merge(&mut merged, document.clone(), "");
    }

    let config: EffectiveConfig = serde_json::from_value(merged).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let canonical = serde_json::to_value(&config).map_err(|e| ConfigError::Serialize(e.to_string()))?;
    if persisted.as_ref() != Some(&canonical) {
        store(path, format, &config)?;
        tracing::info!(
            path = %path.display(),
            created = persisted.is_none(),
            "Configuration file written"
        );
    }

    Ok(config)
}

/// Overlay `overlay` onto `base`. Objects merge recursively except at the
/// paths listed in `REPLACED_WHOLE`; every other value replaces the base.
fn merge(base: &mut Value, overlay: Value, path: &str) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) if !REPLACED_WHOLE.contains(&path) => {
            for (key, value) in overlay {
                let child = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", path, key)
                };
                match base.get_mut(&key) {
                    Some(slot) => merge(slot, value, &child),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, overlay) => *slot = overlay,
    }
}

fn store(path: &Path, format: Format, config: &EffectiveConfig) -> Result<(), ConfigError> {
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let content = format.render(config)?;
    fs::write(path, content).map_err(io_err)
}
