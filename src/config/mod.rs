//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! EffectiveConfig::default()
//!     → loader.rs (layer config.json over the defaults, write back gaps)
//!     → overrides.rs (command-line flags)
//!     → validation.rs (semantic checks)
//!     → EffectiveConfig (immutable, owned by the Supervisor)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once the Supervisor starts
//! - All fields have defaults to allow minimal config files
//! - Validation separates syntactic (serde) from semantic checks

use std::path::{Path, PathBuf};

pub mod loader;
pub mod overrides;
pub mod schema;
pub mod validation;

pub use loader::{resolve, ConfigError};
pub use overrides::ConfigOverrides;
pub use schema::EffectiveConfig;
pub use schema::InjectConfig;
pub use schema::ProxyRotatorConfig;
pub use schema::RedirectConfig;
pub use schema::TunnelCoreConfig;

/// Name of the persisted config file, next to the executable.
pub const CONFIG_FILE: &str = "config.json";

/// Resolve `relative` against `base_dir` unless it is already absolute.
pub fn real_path(base_dir: &Path, relative: impl AsRef<Path>) -> PathBuf {
    let relative = relative.as_ref();
    if relative.is_absolute() {
        relative.to_path_buf()
    } else {
        base_dir.join(relative)
    }
}

impl EffectiveConfig {
    /// Run the semantic checks, folding failures into a `ConfigError`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validation::validate_config(self).map_err(ConfigError::Validation)
    }
}
