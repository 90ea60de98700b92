use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::TetherConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["tether.toml", "tether.yaml", "tether.yml", "tether.json"];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<TetherConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./tether.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/tether/tether.{toml,yaml,yml,json}` (user-global)
///
/// Returns `TetherConfig::default()` if no config file is found or the one
/// found fails to load.
pub fn discover_and_load() -> TetherConfig {
    let mut dirs = vec![PathBuf::from(".")];
    dirs.extend(config_dir());
    let Some(path) = find_config_file(&dirs) else {
        debug!("no config file found, using defaults");
        return TetherConfig::default();
    };
    debug!(path = %path.display(), "loading config");
    match load_config(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            TetherConfig::default()
        },
    }
}

/// First existing config file in `dirs`, trying every file name per directory.
pub fn find_config_file(dirs: &[PathBuf]) -> Option<PathBuf> {
    dirs.iter()
        .flat_map(|dir| CONFIG_FILENAMES.iter().map(move |name| dir.join(name)))
        .find(|p| p.exists())
}

/// Returns the user-global config directory: `~/.config/tether/`.
pub fn config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().join(".config").join("tether"))
}

/// Serialize `config` as TOML.
pub fn to_toml(config: &TetherConfig) -> anyhow::Result<String> {
    toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("serialize config: {e}"))
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<TetherConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
