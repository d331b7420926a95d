use crate::config::{ConfigError, PoolSettings};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
struct SettingsFile {
    #[serde(default)]
    pool: PoolSettings,
}

/// Load and validate pool settings from an HCL file.
///
/// The file holds a single optional `pool { ... }` block; every attribute in it
/// falls back to its default when omitted.
pub fn load_settings(path: &Path) -> Result<PoolSettings, ConfigError> {
    let s = fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
    let parsed: SettingsFile = hcl::from_str(&s).map_err(|e| ConfigError::parse(path, e))?;

    parsed.pool.validate()?;

    tracing::debug!(
        path = %path.display(),
        max_connections = parsed.pool.max_connections,
        min_connections = parsed.pool.min_connections,
        "pool settings loaded"
    );

    Ok(parsed.pool)
}
