use std::path::Path;

use anyhow::Result;
use console::style;
use harvest_core::{HarvestConfig, HarvestStore, StoreCounts};
use serde::Serialize;

use super::{load_config, open_store};
use crate::ui;

#[derive(Serialize)]
struct Status {
    scheme: String,
    workspace_token: bool,
    generator_key: bool,
    generator_model: String,
    database: Option<String>,
    store: Option<StoreCounts>,
}

pub async fn run(config_path: Option<&Path>, json: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let store = match open_store(&config).await? {
        Some(store) => Some(store.counts().await?),
        None => None,
    };
    let status = build_status(&config, store);

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    ui::title("📋 Harvest status");
    let check = |ok: bool| {
        if ok {
            style("✔").green()
        } else {
            style("✖").red()
        }
    };
    println!("  {} Workspace token", check(status.workspace_token));
    println!(
        "  {} Generator key ({})",
        check(status.generator_key),
        status.generator_model
    );
    ui::field("Scheme", &status.scheme);
    println!();

    match (&status.database, &status.store) {
        (Some(database), Some(store)) => {
            ui::field("Store", style(database).dim());
            ui::field("Channels", store.channels);
            ui::field("Authors", store.authors);
            ui::field("Messages", store.messages);
            ui::field("Analyses", store.analyses);
        }
        _ => ui::error("No database configured."),
    }
    println!();
    Ok(())
}

fn build_status(config: &HarvestConfig, store: Option<StoreCounts>) -> Status {
    Status {
        scheme: config.analysis.scheme.to_string(),
        workspace_token: config.workspace_token().is_ok(),
        generator_key: config.generator_key().is_some(),
        generator_model: config.generator.model.clone(),
        database: config.storage.database_url.clone(),
        store,
    }
}
