//! Locating the harness configuration file.
//!
//! Resolution order:
//! - `--config PATH` (or `FARM_CONFIG`)
//! - `cluster.toml` in the platform config directory

use std::path::{Path, PathBuf};

use anyhow::Result;
use directories::ProjectDirs;
use farm_controller::HarnessConfig;
use tracing::debug;

/// Configuration file name.
const CONFIG_FILE: &str = "cluster.toml";

/// Get the config directory path.
fn config_dir() -> Result<PathBuf> {
    ProjectDirs::from("", "", "farmctl")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))
}

/// Path of the config file to load.
pub fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => Ok(config_dir()?.join(CONFIG_FILE)),
    }
}

/// Load, apply `FARM_*` overrides and validate.
pub fn load(explicit: Option<&Path>) -> Result<HarnessConfig> {
    let path = resolve_path(explicit)?;
    if !path.exists() {
        anyhow::bail!(
            "config file {} not found. Pass --config or set FARM_CONFIG.",
            path.display()
        );
    }
    let config = HarnessConfig::load(&path)?;
    debug!(path = %path.display(), nodes = config.nodes.len(), "Loaded cluster config");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_path_wins() {
        let path = resolve_path(Some(Path::new("/tmp/farm.toml"))).unwrap();
        assert_eq!(path, PathBuf::from("/tmp/farm.toml"));
    }

    #[test]
    fn missing_file_is_reported() {
        let err = load(Some(Path::new("/nonexistent/farm/cluster.toml"))).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
