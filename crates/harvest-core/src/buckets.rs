//! Author-period bucketing.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, Utc};

use crate::period::{zone, CalendarScheme, Period};

/// Per-message cap in generator transcripts, in characters.
pub const TRANSCRIPT_TEXT_LIMIT: usize = 400;

/// A normalized message ready for analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketMessage {
    pub ts: String,
    pub posted_at: DateTime<Utc>,
    pub channel_name: String,
    pub text: String,
}

impl BucketMessage {
    fn transcript_line(&self) -> String {
        let local = self.posted_at.with_timezone(&zone());
        let text: String = self.text.chars().take(TRANSCRIPT_TEXT_LIMIT).collect();
        format!(
            "[{} | #{}] {}",
            local.format("%Y-%m-%d %H:%M"),
            self.channel_name,
            text
        )
    }
}

/// Messages from one author within one period, ordered by timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorPeriodBucket {
    pub author_name: String,
    /// Id of the author of the first message assigned to this bucket.
    pub author_id: String,
    pub period: Period,
    pub messages: Vec<BucketMessage>,
}

impl AuthorPeriodBucket {
    /// One line per message: `[YYYY-MM-DD HH:MM | #channel] text`.
    pub fn transcript(&self) -> String {
        self.messages
            .iter()
            .map(BucketMessage::transcript_line)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn period_start(&self) -> DateTime<FixedOffset> {
        self.period.start()
    }
}

/// Accumulates messages into buckets keyed by (author name, period start).
#[derive(Debug)]
pub struct BucketBook {
    scheme: CalendarScheme,
    buckets: BTreeMap<(String, DateTime<FixedOffset>), AuthorPeriodBucket>,
}

impl BucketBook {
    pub fn new(scheme: CalendarScheme) -> Self {
        Self {
            scheme,
            buckets: BTreeMap::new(),
        }
    }

    pub fn assign(&mut self, author_id: &str, author_name: &str, message: BucketMessage) {
        let period = Period::containing(&message.posted_at, self.scheme);
        self.buckets
            .entry((author_name.to_string(), period.start()))
            .or_insert_with(|| AuthorPeriodBucket {
                author_name: author_name.to_string(),
                author_id: author_id.to_string(),
                period,
                messages: Vec::new(),
            })
            .messages
            .push(message);
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Distinct author names with at least one bucket.
    pub fn author_count(&self) -> usize {
        let mut names: Vec<&str> = self.buckets.keys().map(|(name, _)| name.as_str()).collect();
        names.dedup();
        names.len()
    }

    pub fn message_count(&self) -> usize {
        self.buckets.values().map(|b| b.messages.len()).sum()
    }

    /// Buckets ordered by author name, then period; messages by timestamp.
    pub fn into_buckets(self) -> Vec<AuthorPeriodBucket> {
        self.buckets
            .into_values()
            .map(|mut bucket| {
                bucket
                    .messages
                    .sort_by(|a, b| a.posted_at.cmp(&b.posted_at).then_with(|| a.ts.cmp(&b.ts)));
                bucket
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn message(ts: i64, channel: &str, text: &str) -> BucketMessage {
        BucketMessage {
            ts: format!("{}.000000", ts),
            posted_at: Utc.timestamp_opt(ts, 0).unwrap(),
            channel_name: channel.to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_buckets_by_author_and_period() {
        let mut book = BucketBook::new(CalendarScheme::Monthly);
        // 2025-09-30 14:00 UTC is 23:00 in UTC+9; 15:30 UTC is already October.
        book.assign("U2", "Bob", message(1759240800, "dev", "late september"));
        book.assign("U1", "Alice", message(1759246200, "dev", "october"));
        book.assign("U1", "Alice", message(1756782000, "general", "early september"));
        book.assign("U9", "Alice", message(1756700000, "general", "other id same name"));

        assert_eq!(book.len(), 3);
        assert_eq!(book.author_count(), 2);
        assert_eq!(book.message_count(), 4);

        let buckets = book.into_buckets();
        let keys: Vec<(&str, String)> = buckets
            .iter()
            .map(|b| (b.author_name.as_str(), b.period.label()))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("Alice", "September 2025".to_string()),
                ("Alice", "October 2025".to_string()),
                ("Bob", "September 2025".to_string()),
            ]
        );

        // Same display name shares a bucket; the first assigned id is kept.
        assert_eq!(buckets[0].author_id, "U1");
        let texts: Vec<&str> = buckets[0].messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["other id same name", "early september"]);
    }

    #[test]
    fn test_transcript_format_and_truncation() {
        let mut book = BucketBook::new(CalendarScheme::Weekly);
        let long = "x".repeat(450);
        // 2025-09-02 01:00 UTC == 10:00 UTC+9
        book.assign("U1", "Alice", message(1756774800, "dev", &long));
        book.assign("U1", "Alice", message(1756771200, "general", "hello"));

        let bucket = book.into_buckets().remove(0);
        let transcript = bucket.transcript();
        let lines: Vec<&str> = transcript.lines().collect();
        assert_eq!(lines[0], "[2025-09-02 09:00 | #general] hello");
        assert!(lines[1].starts_with("[2025-09-02 10:00 | #dev] "));
        assert_eq!(lines[1].chars().filter(|c| *c == 'x').count(), TRANSCRIPT_TEXT_LIMIT);
        assert_eq!(bucket.period.label(), "2025-09-01 ~ 2025-09-07");
    }
}
