//! Idempotent analysis scheduling.
//!
//! Every author-period bucket gets at most one stored analysis:
//! - Still-open monthly periods are held back until the cutoff day.
//! - Buckets with an existing record are never regenerated.
//! - Without a generator, buckets are counted but left untouched.
//!
//! Buckets are visited author by author, oldest period first.

use chrono::{DateTime, Datelike, FixedOffset, Utc};
use harvest_store::{AnalysisKey, AnalysisRecord, HarvestStore};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::buckets::AuthorPeriodBucket;
use crate::context::RunStats;
use crate::generator::{NarrativeGenerator, NarrativeRequest};
use crate::period::{zone, CalendarScheme, Period};
use crate::progress::Reporter;

/// Terminal state of one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketOutcome {
    /// The bucket's period is still open and before the cutoff day.
    /// Nothing is generated or stored.
    SkippedCurrentPeriod,

    /// A record already exists for (author, scheme, period start).
    SkippedAlreadyAnalyzed,

    /// No generator is configured.
    SkippedNoGenerator,

    /// Generated text was non-empty and handed to the store.
    Analyzed,

    /// The generator failed or returned nothing. Not retried.
    AnalyzedEmpty,
}

/// Count of buckets per outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeTally {
    pub skipped_current_period: usize,
    pub skipped_already_analyzed: usize,
    pub skipped_no_generator: usize,
    pub analyzed: usize,
    pub analyzed_empty: usize,
}

impl OutcomeTally {
    pub fn record(&mut self, outcome: BucketOutcome) {
        match outcome {
            BucketOutcome::SkippedCurrentPeriod => self.skipped_current_period += 1,
            BucketOutcome::SkippedAlreadyAnalyzed => self.skipped_already_analyzed += 1,
            BucketOutcome::SkippedNoGenerator => self.skipped_no_generator += 1,
            BucketOutcome::Analyzed => self.analyzed += 1,
            BucketOutcome::AnalyzedEmpty => self.analyzed_empty += 1,
        }
    }

    pub fn skipped(&self) -> usize {
        self.skipped_current_period + self.skipped_already_analyzed + self.skipped_no_generator
    }

    pub fn total(&self) -> usize {
        self.skipped() + self.analyzed + self.analyzed_empty
    }
}

/// Result of a scheduling pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerReport {
    pub tally: OutcomeTally,
    /// Analyses generated during this pass, stored or not.
    pub produced: Vec<AnalysisRecord>,
}

pub struct AnalysisScheduler<'a> {
    store: Option<&'a dyn HarvestStore>,
    generator: Option<&'a dyn NarrativeGenerator>,
    scheme: CalendarScheme,
    now: DateTime<FixedOffset>,
}

impl<'a> AnalysisScheduler<'a> {
    /// `now` is converted to the fixed zone before any period math.
    pub fn new(
        store: Option<&'a dyn HarvestStore>,
        generator: Option<&'a dyn NarrativeGenerator>,
        scheme: CalendarScheme,
        now: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            store,
            generator,
            scheme,
            now: now.with_timezone(&zone()),
        }
    }

    /// Whether `period` is the open period and still before the cutoff day.
    fn held_back(&self, period: &Period) -> bool {
        let current = Period::containing(&self.now, self.scheme);
        if !current.contains(&period.start()) {
            return false;
        }
        self.scheme
            .analysis_cutoff_day()
            .map_or(false, |cutoff| self.now.day() < cutoff)
    }

    async fn already_analyzed(&self, bucket: &AuthorPeriodBucket, reporter: &Reporter<'_>) -> bool {
        let Some(store) = self.store else {
            return false;
        };
        let key = AnalysisKey {
            author_id: bucket.author_id.clone(),
            scheme: self.scheme.as_str().to_string(),
            period_start: bucket.period_start(),
        };
        match store.analysis_exists(&key).await {
            Ok(exists) => exists,
            Err(err) => {
                warn!(
                    "analysis lookup failed for {} {}: {:#}",
                    bucket.author_id,
                    bucket.period.label(),
                    err
                );
                reporter.log(&format!(
                    "⚠️ [DB] analysis lookup failed for {} ({}): {:#}",
                    bucket.author_name,
                    bucket.period.label(),
                    err
                ));
                false
            }
        }
    }

    /// Decide and, if due, run the analysis for one bucket.
    ///
    /// Store failures are counted in `stats` and reported through `reporter`;
    /// a generated record that could not be saved is still returned.
    pub async fn process(
        &self,
        bucket: &AuthorPeriodBucket,
        reporter: &Reporter<'_>,
        stats: &mut RunStats,
    ) -> (BucketOutcome, Option<AnalysisRecord>) {
        if self.held_back(&bucket.period) {
            return (BucketOutcome::SkippedCurrentPeriod, None);
        }
        if self.already_analyzed(bucket, reporter).await {
            return (BucketOutcome::SkippedAlreadyAnalyzed, None);
        }
        let Some(generator) = self.generator else {
            return (BucketOutcome::SkippedNoGenerator, None);
        };

        let request = NarrativeRequest {
            author_name: bucket.author_name.clone(),
            period_label: bucket.period.label(),
            transcript: bucket.transcript(),
        };

        let text = match generator.generate(&request).await {
            Ok(text) => text.trim().to_string(),
            Err(err) => {
                warn!(
                    "generation failed for {} ({}): {:#}",
                    request.author_name, request.period_label, err
                );
                String::new()
            }
        };
        if text.is_empty() {
            return (BucketOutcome::AnalyzedEmpty, None);
        }

        let record = AnalysisRecord {
            author_id: bucket.author_id.clone(),
            scheme: self.scheme.as_str().to_string(),
            period_start: bucket.period_start(),
            period_label: request.period_label,
            text,
            created_at: Utc::now(),
        };

        if let Some(store) = self.store {
            match store.upsert_analysis(&record).await {
                Ok(()) => stats.analyses_saved += 1,
                Err(err) => {
                    stats.analyses_failed += 1;
                    warn!("failed to save analysis for {}: {:#}", record.author_id, err);
                    reporter.log(&format!(
                        "⚠️ [DB] analysis save failed for {} ({}): {:#}",
                        bucket.author_name, record.period_label, err
                    ));
                }
            }
        }

        (BucketOutcome::Analyzed, Some(record))
    }

    /// Process `buckets` in order, reporting progress across `0.60..=0.95`.
    pub async fn run(
        &self,
        buckets: &[AuthorPeriodBucket],
        reporter: &Reporter<'_>,
        stats: &mut RunStats,
    ) -> SchedulerReport {
        let mut report = SchedulerReport::default();
        let total = buckets.len();
        let mut current_author: Option<&str> = None;

        for (idx, bucket) in buckets.iter().enumerate() {
            if current_author != Some(bucket.author_name.as_str()) {
                current_author = Some(bucket.author_name.as_str());
                reporter.log(&format!("👤 {}", bucket.author_name));
            }

            let label = bucket.period.label();
            reporter.progress(
                0.60 + (idx as f64 / total as f64) * 0.35,
                &format!(
                    "Analyzing [{}/{}] {} - {}",
                    idx + 1,
                    total,
                    bucket.author_name,
                    label
                ),
            );

            let failed_before = stats.analyses_failed;
            let (outcome, record) = self.process(bucket, reporter, stats).await;
            let unsaved = stats.analyses_failed > failed_before;
            report.tally.record(outcome);
            if let Some(record) = record {
                report.produced.push(record);
            }

            let count = bucket.messages.len();
            let line = match outcome {
                BucketOutcome::SkippedCurrentPeriod => {
                    format!("  → {} ({} messages) current period, skipped ⏭️", label, count)
                }
                BucketOutcome::SkippedAlreadyAnalyzed => {
                    format!("  → {} ({} messages) already analyzed ⏭️", label, count)
                }
                BucketOutcome::SkippedNoGenerator => {
                    format!("  → {} ({} messages) no generator configured ⏭️", label, count)
                }
                BucketOutcome::Analyzed if unsaved => {
                    format!("  → {} ({} messages) generated but not saved ⚠️", label, count)
                }
                BucketOutcome::Analyzed => format!("  → {} ({} messages) ✅", label, count),
                BucketOutcome::AnalyzedEmpty => {
                    format!("  → {} ({} messages) nothing produced ⚠️", label, count)
                }
            };
            debug!("{}", line);
            reporter.log(&line);
        }

        reporter.progress(
            0.95,
            &format!(
                "Analysis complete ({} analyzed, {} skipped)",
                report.tally.analyzed,
                report.tally.skipped()
            ),
        );
        info!(
            "scheduled {} buckets: {} analyzed, {} empty, {} skipped",
            report.tally.total(),
            report.tally.analyzed,
            report.tally.analyzed_empty,
            report.tally.skipped()
        );
        report
    }
}
