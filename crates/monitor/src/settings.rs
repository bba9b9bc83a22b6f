//! Layered settings: defaults, optional file, then `ARB__*` environment variables

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use tracing::{info, warn};

use arb_core::{AssetLists, EngineConfig};

pub const DEFAULT_CONFIG_PATH: &str = "configs/engine";
pub const DEFAULT_LISTS_PATH: &str = "configs/asset_lists.json";
pub const ENV_PREFIX: &str = "ARB";

/// Load the engine configuration.
///
/// An explicit `path` must exist; the default path is optional. Environment
/// variables such as `ARB__BASE_CURRENCY` or `ARB__MONITOR__INTERVAL_MS`
/// override file values, `ARB__MONITORED_COINS` takes a comma-separated list.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let (source, required) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
    };

    let settings = Config::builder()
        .add_source(File::from(source.as_path()).required(required))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("monitored_coins")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("Failed to read settings from {}", source.display()))?;

    let config: EngineConfig = settings
        .try_deserialize()
        .context("Failed to parse engine settings")?;
    config.validate()?;

    info!(
        "Loaded settings: base={} fee={} threshold={}% max_cycle_length={} strategy={}",
        config.base_currency,
        config.trading_fee,
        config.min_profit_threshold,
        config.max_cycle_length,
        config.strategy
    );
    Ok(config)
}

/// Load persisted asset lists. A missing default file means "no lists".
pub fn load_lists(path: Option<&Path>) -> Result<Option<AssetLists>> {
    let (path, required) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_LISTS_PATH), false),
    };

    if !required && !path.exists() {
        warn!(
            "No asset lists at {}, falling back to monitored coins",
            path.display()
        );
        return Ok(None);
    }

    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let lists = AssetLists::from_json(&json)?;
    info!(
        "Loaded asset lists from {}: {} whitelisted, {} blacklisted",
        path.display(),
        lists.whitelist.len(),
        lists.blacklist.len()
    );
    Ok(Some(lists))
}

pub fn save_lists(lists: &AssetLists, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    std::fs::write(path, lists.to_json()?)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Asset lists saved to {}", path.display());
    Ok(())
}
