use std::env;
use std::path::{Path, PathBuf};

use crate::models::BridgeConfig;
use crate::validation::{ConfigError, validate};

/// Environment variable naming the config file.
pub const ENV_CONFIG_PATH: &str = "CONFIG_PATH";
/// Environment override for `server.listen`.
pub const ENV_BRIDGE_LISTEN: &str = "BRIDGE_LISTEN";
/// Environment override for `archive.root`.
pub const ENV_ARCHIVE_ROOT: &str = "ARCHIVE_ROOT";

const DEFAULT_CONFIG_FILE: &str = "tickbridge.toml";

/// A loaded, validated configuration plus provenance for the status output.
#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: BridgeConfig,
    pub path: PathBuf,
    pub env_file_loaded: bool,
}

/// Resolve the config file path: explicit flag, then `CONFIG_PATH`, then
/// `./tickbridge.toml`.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Ok(path) = env::var(ENV_CONFIG_PATH)
        && !path.is_empty()
    {
        return PathBuf::from(path);
    }
    PathBuf::from(DEFAULT_CONFIG_FILE)
}

/// Load, apply environment overrides, and validate. The same entry point
/// serves startup and `reload`; on any error the caller keeps whatever
/// configuration it already had.
pub fn load(explicit: Option<&Path>) -> Result<ConfigLoad, ConfigError> {
    let env_file_loaded = dotenvy::dotenv().is_ok();

    let path = resolve_config_path(explicit);
    if !path.exists() {
        return Err(ConfigError::NotFound(path));
    }

    let raw = std::fs::read_to_string(&path)?;
    let mut config: BridgeConfig = toml::from_str(&raw)?;
    apply_env_overrides(&mut config);
    validate(&config)?;

    Ok(ConfigLoad {
        config,
        path,
        env_file_loaded,
    })
}

fn apply_env_overrides(config: &mut BridgeConfig) {
    if let Ok(listen) = env::var(ENV_BRIDGE_LISTEN)
        && !listen.is_empty()
    {
        config.server.listen = listen;
    }
    if let Ok(root) = env::var(ENV_ARCHIVE_ROOT)
        && !root.is_empty()
    {
        config.archive.root = PathBuf::from(root);
    }
}
