//! Persistence for the harvest engine.
//!
//! The engine talks to storage only through [`HarvestStore`]. [`SqliteStore`]
//! is the production implementation; every write is committed on its own so
//! an interrupted run keeps whatever it already wrote.

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{sqlite::SqliteConnectOptions, sqlite::SqlitePoolOptions, SqlitePool};
use tracing::instrument;

/// Channel partition kinds, in the order the workspace API is walked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Public,
    Private,
    GroupDm,
    DirectDm,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 4] = [
        ChannelKind::Public,
        ChannelKind::Private,
        ChannelKind::GroupDm,
        ChannelKind::DirectDm,
    ];

    /// Value of the `types` filter on the list-channels endpoint.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Public => "public_channel",
            ChannelKind::Private => "private_channel",
            ChannelKind::GroupDm => "mpim",
            ChannelKind::DirectDm => "im",
        }
    }

    pub fn is_dm(&self) -> bool {
        matches!(self, ChannelKind::GroupDm | ChannelKind::DirectDm)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ChannelKind::Public => "public channels",
            ChannelKind::Private => "private channels",
            ChannelKind::GroupDm => "group DMs",
            ChannelKind::DirectDm => "direct messages",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub kind: ChannelKind,
    pub is_archived: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    pub display_name: String,
    pub handle: Option<String>,
}

/// A message row. `(channel_id, ts)` is the identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub channel_id: String,
    pub ts: String,
    pub author_id: String,
    pub text: String,
    pub thread_ts: Option<String>,
    pub edited_ts: Option<String>,
    pub content_hash: String,
}

impl StoredMessage {
    pub fn new(
        channel_id: impl Into<String>,
        ts: impl Into<String>,
        author_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        let text = text.into();
        let content_hash = content_hash(&text);
        Self {
            channel_id: channel_id.into(),
            ts: ts.into(),
            author_id: author_id.into(),
            text,
            thread_ts: None,
            edited_ts: None,
            content_hash,
        }
    }

    pub fn with_thread_ts(mut self, thread_ts: Option<String>) -> Self {
        self.thread_ts = thread_ts;
        self
    }

    pub fn with_edited_ts(mut self, edited_ts: Option<String>) -> Self {
        self.edited_ts = edited_ts;
        self
    }
}

/// Key of an analysis record. `scheme` keeps weekly and monthly keys apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AnalysisKey {
    pub author_id: String,
    pub scheme: String,
    pub period_start: DateTime<FixedOffset>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub author_id: String,
    pub scheme: String,
    pub period_start: DateTime<FixedOffset>,
    pub period_label: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl AnalysisRecord {
    pub fn key(&self) -> AnalysisKey {
        AnalysisKey {
            author_id: self.author_id.clone(),
            scheme: self.scheme.clone(),
            period_start: self.period_start,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub channels: i64,
    pub authors: i64,
    pub messages: i64,
    pub analyses: i64,
}

/// Hex SHA-256 of the raw message text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    let mut output = String::with_capacity(digest.len() * 2);
    for byte in digest {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

/// Operations the harvest engine requires of its persistence layer.
#[async_trait]
pub trait HarvestStore: Send + Sync {
    async fn upsert_channel(&self, channel: &Channel) -> Result<()>;

    async fn upsert_author(&self, author: &Author) -> Result<()>;

    /// Returns `true` when a row was written, `false` when the key already existed.
    async fn insert_message_if_absent(&self, message: &StoredMessage) -> Result<bool>;

    async fn has_any_message(&self) -> Result<bool>;

    async fn analysis_exists(&self, key: &AnalysisKey) -> Result<bool>;

    async fn upsert_analysis(&self, record: &AnalysisRecord) -> Result<()>;

    async fn list_analyses(&self, author_id: Option<&str>) -> Result<Vec<AnalysisRecord>>;

    async fn counts(&self) -> Result<StoreCounts>;
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a database from a `sqlite:` URL or a bare file path.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = if database_url.starts_with("sqlite:") {
            SqliteConnectOptions::from_str(database_url)
                .with_context(|| format!("invalid database url: {}", database_url))?
                .create_if_missing(true)
        } else {
            let path = Path::new(database_url);
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Single-connection in-memory database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    #[instrument(skip_all)]
    async fn init_schema(&self) -> Result<()> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS channels (\
                id TEXT PRIMARY KEY,\
                name TEXT NOT NULL,\
                kind TEXT NOT NULL,\
                is_archived INTEGER NOT NULL DEFAULT 0,\
                updated_at TEXT NOT NULL\
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS authors (\
                id TEXT PRIMARY KEY,\
                display_name TEXT NOT NULL,\
                handle TEXT,\
                updated_at TEXT NOT NULL\
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (\
                channel_id TEXT NOT NULL,\
                ts TEXT NOT NULL,\
                author_id TEXT NOT NULL,\
                text TEXT NOT NULL,\
                thread_ts TEXT,\
                edited_ts TEXT,\
                content_hash TEXT NOT NULL,\
                harvested_at TEXT NOT NULL,\
                PRIMARY KEY (channel_id, ts)\
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_author ON messages(author_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS analyses (\
                author_id TEXT NOT NULL,\
                scheme TEXT NOT NULL,\
                period_start TEXT NOT NULL,\
                period_label TEXT NOT NULL,\
                text TEXT NOT NULL,\
                created_at TEXT NOT NULL,\
                PRIMARY KEY (author_id, scheme, period_start)\
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn count(&self, table: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl HarvestStore for SqliteStore {
    #[instrument(skip(self), fields(channel = %channel.id))]
    async fn upsert_channel(&self, channel: &Channel) -> Result<()> {
        sqlx::query(
            "INSERT INTO channels (id, name, kind, is_archived, updated_at) \
            VALUES (?1, ?2, ?3, ?4, ?5) \
            ON CONFLICT(id) DO UPDATE SET \
                name=excluded.name, \
                kind=excluded.kind, \
                is_archived=excluded.is_archived, \
                updated_at=excluded.updated_at",
        )
        .bind(&channel.id)
        .bind(&channel.name)
        .bind(channel.kind.as_str())
        .bind(channel.is_archived)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(author = %author.id))]
    async fn upsert_author(&self, author: &Author) -> Result<()> {
        sqlx::query(
            "INSERT INTO authors (id, display_name, handle, updated_at) \
            VALUES (?1, ?2, ?3, ?4) \
            ON CONFLICT(id) DO UPDATE SET \
                display_name=excluded.display_name, \
                handle=excluded.handle, \
                updated_at=excluded.updated_at",
        )
        .bind(&author.id)
        .bind(&author.display_name)
        .bind(&author.handle)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(channel = %message.channel_id, ts = %message.ts))]
    async fn insert_message_if_absent(&self, message: &StoredMessage) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO messages \
                (channel_id, ts, author_id, text, thread_ts, edited_ts, content_hash, harvested_at) \
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
            ON CONFLICT(channel_id, ts) DO NOTHING",
        )
        .bind(&message.channel_id)
        .bind(&message.ts)
        .bind(&message.author_id)
        .bind(&message.text)
        .bind(&message.thread_ts)
        .bind(&message.edited_ts)
        .bind(&message.content_hash)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn has_any_message(&self) -> Result<bool> {
        let row = sqlx::query_scalar::<_, i64>("SELECT 1 FROM messages LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    #[instrument(skip(self))]
    async fn analysis_exists(&self, key: &AnalysisKey) -> Result<bool> {
        let row = sqlx::query_scalar::<_, i64>(
            "SELECT 1 FROM analyses WHERE author_id = ?1 AND scheme = ?2 AND period_start = ?3",
        )
        .bind(&key.author_id)
        .bind(&key.scheme)
        .bind(key.period_start.to_rfc3339())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    #[instrument(skip(self, record), fields(author = %record.author_id, period = %record.period_label))]
    async fn upsert_analysis(&self, record: &AnalysisRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO analyses (author_id, scheme, period_start, period_label, text, created_at) \
            VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
            ON CONFLICT(author_id, scheme, period_start) DO UPDATE SET \
                period_label=excluded.period_label, \
                text=excluded.text, \
                created_at=excluded.created_at",
        )
        .bind(&record.author_id)
        .bind(&record.scheme)
        .bind(record.period_start.to_rfc3339())
        .bind(&record.period_label)
        .bind(&record.text)
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_analyses(&self, author_id: Option<&str>) -> Result<Vec<AnalysisRecord>> {
        let rows = sqlx::query_as::<_, (String, String, String, String, String, String)>(
            "SELECT author_id, scheme, period_start, period_label, text, created_at \
            FROM analyses \
            WHERE ?1 IS NULL OR author_id = ?1 \
            ORDER BY author_id, period_start",
        )
        .bind(author_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(author_id, scheme, period_start, period_label, text, created_at)| {
                Ok(AnalysisRecord {
                    author_id,
                    scheme,
                    period_start: DateTime::parse_from_rfc3339(&period_start)
                        .with_context(|| format!("corrupt period_start: {}", period_start))?,
                    period_label,
                    text,
                    created_at: DateTime::parse_from_rfc3339(&created_at)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                })
            })
            .collect()
    }

    async fn counts(&self) -> Result<StoreCounts> {
        Ok(StoreCounts {
            channels: self.count("channels").await?,
            authors: self.count("authors").await?,
            messages: self.count("messages").await?,
            analyses: self.count("analyses").await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn kst() -> FixedOffset {
        FixedOffset::east_opt(9 * 3600).unwrap()
    }

    fn record(author: &str, text: &str) -> AnalysisRecord {
        AnalysisRecord {
            author_id: author.to_string(),
            scheme: "monthly".to_string(),
            period_start: kst().with_ymd_and_hms(2025, 9, 1, 0, 0, 0).unwrap(),
            period_label: "September 2025".to_string(),
            text: text.to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_insert_message_is_deduplicated() {
        let store = SqliteStore::in_memory().await.unwrap();
        let msg = StoredMessage::new("C1", "1700000000.000100", "U1", "hello");

        assert!(store.insert_message_if_absent(&msg).await.unwrap());
        assert!(!store.insert_message_if_absent(&msg).await.unwrap());

        assert_eq!(store.counts().await.unwrap().messages, 1);
    }

    #[tokio::test]
    async fn test_stored_message_is_never_rewritten() {
        let store = SqliteStore::in_memory().await.unwrap();
        let original = StoredMessage::new("C1", "1700000000.000100", "U1", "first");
        let edited = StoredMessage::new("C1", "1700000000.000100", "U1", "second")
            .with_edited_ts(Some("1700000100.000000".to_string()));

        store.insert_message_if_absent(&original).await.unwrap();
        store.insert_message_if_absent(&edited).await.unwrap();

        let text: String = sqlx::query_scalar("SELECT text FROM messages WHERE channel_id = 'C1'")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(text, "first");
    }

    #[tokio::test]
    async fn test_connect_from_bare_path_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("harvest.db");
        let path_str = path.display().to_string();

        let store = SqliteStore::connect(&path_str).await.unwrap();
        store
            .insert_message_if_absent(&StoredMessage::new("C1", "1.0", "U1", "hi"))
            .await
            .unwrap();
        store.pool().close().await;
        assert!(path.exists());

        let reopened = SqliteStore::connect(&path_str).await.unwrap();
        assert!(reopened.has_any_message().await.unwrap());
    }

    #[tokio::test]
    async fn test_has_any_message() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert!(!store.has_any_message().await.unwrap());

        store
            .insert_message_if_absent(&StoredMessage::new("C1", "1.0", "U1", "hi"))
            .await
            .unwrap();
        assert!(store.has_any_message().await.unwrap());
    }

    #[tokio::test]
    async fn test_analysis_upsert_and_exists() {
        let store = SqliteStore::in_memory().await.unwrap();
        let first = record("U1", "draft");
        assert!(!store.analysis_exists(&first.key()).await.unwrap());

        store.upsert_analysis(&first).await.unwrap();
        assert!(store.analysis_exists(&first.key()).await.unwrap());

        store.upsert_analysis(&record("U1", "final")).await.unwrap();
        let stored = store.list_analyses(Some("U1")).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].text, "final");
        assert_eq!(stored[0].period_start, first.period_start);
    }

    #[tokio::test]
    async fn test_analysis_keys_are_scheme_scoped() {
        let store = SqliteStore::in_memory().await.unwrap();
        let monthly = record("U1", "month");
        store.upsert_analysis(&monthly).await.unwrap();

        let mut weekly_key = monthly.key();
        weekly_key.scheme = "weekly".to_string();
        assert!(!store.analysis_exists(&weekly_key).await.unwrap());
    }

    #[tokio::test]
    async fn test_channel_and_author_upserts() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut channel = Channel {
            id: "C1".to_string(),
            name: "general".to_string(),
            kind: ChannelKind::Public,
            is_archived: false,
        };
        store.upsert_channel(&channel).await.unwrap();
        channel.name = "general-renamed".to_string();
        store.upsert_channel(&channel).await.unwrap();

        let author = Author {
            id: "U1".to_string(),
            display_name: "Alice".to_string(),
            handle: Some("alice".to_string()),
        };
        store.upsert_author(&author).await.unwrap();
        store.upsert_author(&author).await.unwrap();

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.channels, 1);
        assert_eq!(counts.authors, 1);
    }

    #[test]
    fn test_channel_kind_filters() {
        let types: Vec<&str> = ChannelKind::ALL.iter().map(ChannelKind::as_str).collect();
        assert_eq!(types, vec!["public_channel", "private_channel", "mpim", "im"]);
        assert!(ChannelKind::DirectDm.is_dm());
        assert!(!ChannelKind::Private.is_dm());
    }

    #[test]
    fn test_content_hash_is_stable() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
        assert_eq!(content_hash("").len(), 64);
    }
}
