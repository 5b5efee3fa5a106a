use std::path::Path;

use anyhow::Result;
use harvest_core::{emit_result, CalendarScheme, Harvester, RunReport, StdoutSink, StoreStatus};
use serde_json::json;

use super::load_config;
use crate::ui;

pub async fn run(
    config_path: Option<&Path>,
    scheme: Option<&str>,
    no_store: bool,
    json: bool,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(scheme) = scheme {
        config.analysis.scheme = scheme.parse::<CalendarScheme>()?;
    }
    if no_store {
        config.storage.database_url = None;
    }

    let harvester = match Harvester::from_config(&config).await {
        Ok(harvester) => harvester,
        Err(err) => {
            if json {
                emit_result("error", json!({ "message": format!("{:#}", err) }));
            } else {
                ui::error(&format!("{:#}", err));
            }
            return Err(err);
        }
    };

    if json {
        let report = harvester.run(&StdoutSink).await;
        emit_result("success", serde_json::to_value(&report)?);
        return Ok(());
    }

    ui::title(&format!("📊 Harvesting ({} periods)", config.analysis.scheme));
    let sink = ui::BarSink::new("Starting");
    let report = harvester.run(&sink).await;
    if report.channels == 0 {
        sink.abandon("No channels harvested");
    } else {
        sink.finish("Done");
    }
    print_report(&report);
    Ok(())
}

fn print_report(report: &RunReport) {
    println!();
    ui::success(&format!(
        "{} messages from {} channels, {} authors",
        report.messages_collected, report.channels, report.authors
    ));
    ui::field(
        "Window",
        format!(
            "{} ~ {}{}",
            report.window.start.format("%Y-%m-%d"),
            report.window.end.format("%Y-%m-%d"),
            if report.window.first_run { " (first run)" } else { "" }
        ),
    );
    ui::field(
        "Buckets",
        format!(
            "{} analyzed, {} empty, {} already analyzed, {} still open",
            report.buckets.analyzed,
            report.buckets.analyzed_empty,
            report.buckets.skipped_already_analyzed,
            report.buckets.skipped_current_period
        ),
    );
    if report.buckets.skipped_no_generator > 0 {
        ui::field(
            "Not analyzed",
            format!(
                "{} buckets, no generator key (set OPENAI_API_KEY)",
                report.buckets.skipped_no_generator
            ),
        );
    }
    match &report.store_status {
        StoreStatus::Connected => ui::field(
            "Saved",
            format!(
                "{} new messages, {} analyses ({} failed writes)",
                report.stats.messages_saved,
                report.stats.analyses_saved,
                report.stats.messages_failed + report.stats.analyses_failed
            ),
        ),
        status => ui::error(&format!("Store {}; nothing was saved", status.describe())),
    }
    ui::field("Took", format!("{:.1}s", report.duration_ms as f64 / 1000.0));
    println!();
}
