//! End-to-end harvest run.
//!
//! A run computes the collection window, enumerates channels, fetches and
//! stores every message (with thread replies), normalizes text, buckets
//! messages by author and period, and hands the buckets to the
//! [`AnalysisScheduler`]. All steps run one call at a time in program order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, FixedOffset};
use harvest_store::{AnalysisRecord, HarvestStore, SqliteStore};
use serde::Serialize;
use tracing::{info, warn};

use crate::buckets::{BucketBook, BucketMessage};
use crate::channels::{channel_label, enumerate_channels, ChannelFilter};
use crate::config::HarvestConfig;
use crate::context::{RunContext, RunStats};
use crate::generator::{ChatCompletionsGenerator, NarrativeGenerator};
use crate::history::fetch_channel_messages;
use crate::normalize::normalize;
use crate::period::{now_in_zone, zone, CalendarScheme};
use crate::progress::{ProgressSink, Reporter};
use crate::scheduler::{AnalysisScheduler, OutcomeTally};
use crate::walker::{ApiWalker, HttpTransport, RetryPolicy, Transport};
use crate::window::CollectionWindow;

/// Persistence state for the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum StoreStatus {
    Connected,
    /// No database configured; every run is a first run.
    NotConfigured,
    /// Connecting failed at startup; the run continues without persistence.
    Unavailable(String),
}

impl StoreStatus {
    pub fn describe(&self) -> String {
        match self {
            StoreStatus::Connected => "connected".to_string(),
            StoreStatus::NotConfigured => "not configured".to_string(),
            StoreStatus::Unavailable(reason) => format!("unavailable ({})", reason),
        }
    }
}

/// Run settings that do not involve I/O handles.
#[derive(Debug, Clone)]
pub struct HarvestOptions {
    pub scheme: CalendarScheme,
    pub epoch: DateTime<FixedOffset>,
    pub denylist: Vec<String>,
    pub page_size: u32,
    pub max_attempts: u32,
}

impl HarvestOptions {
    pub fn from_config(config: &HarvestConfig) -> Self {
        Self {
            scheme: config.analysis.scheme,
            epoch: config.analysis.epoch(),
            denylist: config.workspace.channel_denylist.clone(),
            page_size: config.workspace.page_size,
            max_attempts: config.workspace.max_attempts,
        }
    }
}

impl Default for HarvestOptions {
    fn default() -> Self {
        Self::from_config(&HarvestConfig::default())
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub scheme: CalendarScheme,
    pub window: CollectionWindow,
    pub store_status: StoreStatus,
    pub channels: usize,
    pub authors: usize,
    pub messages_collected: usize,
    pub buckets: OutcomeTally,
    pub stats: RunStats,
    pub produced: Vec<AnalysisRecord>,
    pub duration_ms: u64,
}

pub struct Harvester {
    walker: ApiWalker,
    store: Option<Arc<dyn HarvestStore>>,
    store_status: StoreStatus,
    generator: Option<Arc<dyn NarrativeGenerator>>,
    options: HarvestOptions,
}

impl Harvester {
    /// Build a harvester from configuration.
    ///
    /// A missing workspace token is fatal. A missing or unreachable database
    /// and a missing generator key only disable their features.
    pub async fn from_config(config: &HarvestConfig) -> Result<Self> {
        let token = config.workspace_token()?;
        let transport = HttpTransport::new(
            &config.workspace.api_base_url,
            token,
            Duration::from_secs(config.workspace.request_timeout_secs),
        )?;

        let (store, store_status) = match config.storage.database_url.as_deref() {
            None => (None, StoreStatus::NotConfigured),
            Some(url) => match SqliteStore::connect(url).await {
                Ok(store) => {
                    info!("connected to store at {}", url);
                    (
                        Some(Arc::new(store) as Arc<dyn HarvestStore>),
                        StoreStatus::Connected,
                    )
                }
                Err(err) => {
                    warn!("store unavailable, continuing without persistence: {:#}", err);
                    (None, StoreStatus::Unavailable(format!("{:#}", err)))
                }
            },
        };

        let generator = match config.generator_key() {
            Some(key) => match ChatCompletionsGenerator::new(&config.generator, key) {
                Ok(generator) => Some(Arc::new(generator) as Arc<dyn NarrativeGenerator>),
                Err(err) => {
                    warn!("generator disabled, bad configuration: {:#}", err);
                    None
                }
            },
            None => {
                info!("no generator key configured; analyses will be skipped");
                None
            }
        };

        let mut harvester = Self::with_parts(
            Arc::new(transport),
            store,
            generator,
            HarvestOptions::from_config(config),
        );
        harvester.store_status = store_status;
        Ok(harvester)
    }

    pub fn with_parts(
        transport: Arc<dyn Transport>,
        store: Option<Arc<dyn HarvestStore>>,
        generator: Option<Arc<dyn NarrativeGenerator>>,
        options: HarvestOptions,
    ) -> Self {
        let store_status = if store.is_some() {
            StoreStatus::Connected
        } else {
            StoreStatus::NotConfigured
        };
        Self {
            walker: ApiWalker::new(transport, RetryPolicy::new(options.max_attempts)),
            store,
            store_status,
            generator,
            options,
        }
    }

    pub fn store_status(&self) -> &StoreStatus {
        &self.store_status
    }

    pub async fn run(&self, sink: &dyn ProgressSink) -> RunReport {
        self.run_at(sink, now_in_zone()).await
    }

    /// Run with an explicit "now", which fixes both the window end and the
    /// current-period cutoff. Any offset is accepted; it is read in UTC+9.
    pub async fn run_at(&self, sink: &dyn ProgressSink, now: DateTime<FixedOffset>) -> RunReport {
        let now = now.with_timezone(&zone());
        let started = Instant::now();
        let reporter = Reporter::new(sink);
        let store = self.store.as_deref();
        let scheme = self.options.scheme;

        reporter.log(&format!("📊 Harvest run ({} periods)", scheme));
        if let StoreStatus::Unavailable(reason) = &self.store_status {
            reporter.log(&format!("⚠️ Store unavailable, running without persistence: {}", reason));
        }

        let has_previous = match store {
            Some(store) => match store.has_any_message().await {
                Ok(found) => found,
                Err(err) => {
                    warn!("could not inspect store, treating as first run: {:#}", err);
                    reporter.log(&format!(
                        "⚠️ [DB] could not inspect store, treating as first run: {:#}",
                        err
                    ));
                    false
                }
            },
            None => false,
        };
        let window = CollectionWindow::compute(has_previous, now, scheme, self.options.epoch);
        reporter.log(&format!(
            "📅 Window: {} ~ {}{}",
            window.start.format("%Y-%m-%d"),
            window.end.format("%Y-%m-%d"),
            if window.first_run { " (first run)" } else { "" }
        ));
        reporter.progress(0.05, "Window computed");

        let mut ctx = RunContext::new(&self.walker, store, &reporter);

        reporter.progress(0.10, "Listing channels...");
        let filter = ChannelFilter::new(&self.options.denylist);
        let channels = enumerate_channels(&mut ctx, &filter, self.options.page_size).await;
        if channels.is_empty() {
            reporter.log("❌ No channels to harvest");
        }

        let mut book = BucketBook::new(scheme);
        let total = channels.len();
        for (idx, channel) in channels.iter().enumerate() {
            let label = channel_label(channel);
            reporter.progress(
                0.10 + ((idx + 1) as f64 / total as f64) * 0.50,
                &format!("Collecting [{}/{}] {}", idx + 1, total, label),
            );

            ctx.save_channel(channel).await;
            let messages =
                fetch_channel_messages(&mut ctx, channel, &window, self.options.page_size).await;
            if messages.is_empty() {
                reporter.log(&format!("[{}/{}] {}: no messages", idx + 1, total, label));
                continue;
            }
            reporter.log(&format!(
                "[{}/{}] {}: {} messages",
                idx + 1,
                total,
                label,
                messages.len()
            ));

            for message in messages {
                ctx.save_message(&message).await;
                let author_name = ctx.resolve_author(&message.author_id).await;
                let text = normalize(&mut ctx, &message.text).await;
                book.assign(
                    &message.author_id,
                    &author_name,
                    BucketMessage {
                        ts: message.ts,
                        posted_at: message.posted_at,
                        channel_name: channel.name.clone(),
                        text,
                    },
                );
            }
        }

        reporter.progress(0.60, "Collection finished, analyzing...");
        let authors = book.author_count();
        let messages_collected = book.message_count();
        let buckets = book.into_buckets();

        let scheduler =
            AnalysisScheduler::new(store, self.generator.as_deref(), scheme, now);
        let scheduled = scheduler.run(&buckets, &reporter, &mut ctx.stats).await;

        let report = RunReport {
            scheme,
            window,
            store_status: self.store_status.clone(),
            channels: channels.len(),
            authors,
            messages_collected,
            buckets: scheduled.tally,
            stats: ctx.stats.clone(),
            produced: scheduled.produced,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };

        log_summary(&reporter, &report);
        reporter.progress(1.0, "✅ Done");
        report
    }
}

fn log_summary(reporter: &Reporter<'_>, report: &RunReport) {
    let stats = &report.stats;
    let lines = [
        "📋 Summary".to_string(),
        format!(
            "Window: {} ~ {}",
            report.window.start.format("%Y-%m-%d"),
            report.window.end.format("%Y-%m-%d")
        ),
        format!("Channels: {}", report.channels),
        format!("Authors: {}", report.authors),
        format!("Messages: {}", report.messages_collected),
        format!(
            "Buckets: {} analyzed, {} empty, {} skipped",
            report.buckets.analyzed,
            report.buckets.analyzed_empty,
            report.buckets.skipped()
        ),
        format!("Store: {}", report.store_status.describe()),
        format!(
            "Saved: {} messages, {} channels, {} authors, {} analyses",
            stats.messages_saved, stats.channels_saved, stats.authors_saved, stats.analyses_saved
        ),
        format!(
            "Failed: {} messages, {} channels, {} authors, {} analyses",
            stats.messages_failed, stats.channels_failed, stats.authors_failed, stats.analyses_failed
        ),
    ];
    for line in lines {
        reporter.log(&line);
    }
    info!(
        "harvest finished in {}ms: {} channels, {} messages, {} analyses",
        report.duration_ms, report.channels, report.messages_collected, report.buckets.analyzed
    );
}
