pub mod analyses;
pub mod run;
pub mod status;

use std::path::Path;

use anyhow::{Context, Result};
use harvest_core::{default_database_path, HarvestConfig, SqliteStore};

/// Load configuration, falling back to the per-user database when none is set.
pub fn load_config(path: Option<&Path>) -> Result<HarvestConfig> {
    let mut config = HarvestConfig::from_env(path)?;
    if config.storage.database_url.is_none() {
        config.storage.database_url =
            default_database_path().map(|path| path.display().to_string());
    }
    Ok(config)
}

/// Open the configured store for read-only commands.
pub async fn open_store(config: &HarvestConfig) -> Result<Option<SqliteStore>> {
    let Some(url) = config.storage.database_url.as_deref() else {
        return Ok(None);
    };
    let store = SqliteStore::connect(url)
        .await
        .with_context(|| format!("failed to open store at {}", url))?;
    Ok(Some(store))
}
