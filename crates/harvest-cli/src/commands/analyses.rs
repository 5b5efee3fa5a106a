use std::path::Path;

use anyhow::Result;
use console::style;
use harvest_core::HarvestStore;

use super::{load_config, open_store};
use crate::ui;

pub async fn run(config_path: Option<&Path>, author: Option<&str>, json: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let Some(store) = open_store(&config).await? else {
        ui::error("No database configured.");
        return Ok(());
    };
    let records = store.list_analyses(author).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No analyses stored yet. Run `harvest run` first.");
        return Ok(());
    }

    for record in &records {
        println!();
        println!(
            "  {} {} {}",
            style(&record.author_id).bold(),
            style("·").dim(),
            style(format!("{} ({})", record.period_label, record.scheme)).cyan()
        );
        for line in record.text.lines() {
            println!("    {}", line);
        }
    }
    println!();
    ui::success(&format!("{} analyses", records.len()));
    Ok(())
}
