//! Per-run state shared by the harvest stages.

use std::collections::{HashMap, HashSet};

use harvest_store::{Author, Channel, HarvestStore};
use serde::Serialize;
use tracing::{debug, warn};

use crate::progress::Reporter;
use crate::walker::ApiWalker;
use crate::workspace::{Envelope, HarvestedMessage, UserInfoResponse, WireUser};

/// Write and read counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub messages_seen: usize,
    pub messages_saved: usize,
    pub messages_duplicate: usize,
    pub messages_failed: usize,
    pub messages_rejected: usize,
    pub channels_saved: usize,
    pub channels_failed: usize,
    pub authors_saved: usize,
    pub authors_failed: usize,
    pub analyses_saved: usize,
    pub analyses_failed: usize,
}

/// Run-owned context: the walker, optional store, reporter, author
/// directory cache, dedup set, and statistics.
///
/// Only the running flow mutates it; nothing here is shared across runs.
pub struct RunContext<'a> {
    pub walker: &'a ApiWalker,
    pub store: Option<&'a dyn HarvestStore>,
    pub reporter: &'a Reporter<'a>,
    pub stats: RunStats,
    authors: HashMap<String, String>,
    seen: HashSet<(String, String)>,
}

impl<'a> RunContext<'a> {
    pub fn new(
        walker: &'a ApiWalker,
        store: Option<&'a dyn HarvestStore>,
        reporter: &'a Reporter<'a>,
    ) -> Self {
        Self {
            walker,
            store,
            reporter,
            stats: RunStats::default(),
            authors: HashMap::new(),
            seen: HashSet::new(),
        }
    }

    /// Display name for `author_id`, looked up at most once per run.
    ///
    /// Resolved authors are persisted. Ids the directory cannot resolve
    /// fall back to the raw id.
    pub async fn resolve_author(&mut self, author_id: &str) -> String {
        if let Some(name) = self.authors.get(author_id) {
            return name.clone();
        }

        let name = match self.lookup_user(author_id).await {
            Some(user) => {
                let author = Author {
                    id: author_id.to_string(),
                    display_name: user.display_name(),
                    handle: user.name.clone().filter(|n| !n.is_empty()),
                };
                self.save_author(&author).await;
                author.display_name
            }
            None => author_id.to_string(),
        };

        self.authors.insert(author_id.to_string(), name.clone());
        name
    }

    async fn lookup_user(&self, author_id: &str) -> Option<WireUser> {
        let params = [("user".to_string(), author_id.to_string())];
        let page = self.walker.fetch("users.info", &params, self.reporter).await;
        if page.is_empty() {
            return None;
        }

        let envelope = Envelope::of(&page);
        if let Some(code) = envelope.error_code() {
            debug!("users.info {} failed: {}", author_id, code);
            return None;
        }

        match page.parse::<UserInfoResponse>() {
            Ok(response) => response.user,
            Err(err) => {
                debug!("users.info {} undecodable: {}", author_id, err);
                None
            }
        }
    }

    async fn save_author(&mut self, author: &Author) {
        let Some(store) = self.store else { return };
        match store.upsert_author(author).await {
            Ok(()) => self.stats.authors_saved += 1,
            Err(err) => {
                self.stats.authors_failed += 1;
                warn!("failed to save author {}: {:#}", author.id, err);
                self.reporter
                    .log(&format!("⚠️ [DB] author save failed ({}): {}", author.id, err));
            }
        }
    }

    pub async fn save_channel(&mut self, channel: &Channel) {
        let Some(store) = self.store else { return };
        match store.upsert_channel(channel).await {
            Ok(()) => self.stats.channels_saved += 1,
            Err(err) => {
                self.stats.channels_failed += 1;
                warn!("failed to save channel {}: {:#}", channel.id, err);
                self.reporter
                    .log(&format!("⚠️ [DB] channel save failed ({}): {}", channel.id, err));
            }
        }
    }

    /// Persist a message unless its `(channel, ts)` already exists.
    /// Failures are counted and the row is dropped.
    pub async fn save_message(&mut self, message: &HarvestedMessage) {
        let Some(store) = self.store else { return };
        match store.insert_message_if_absent(&message.to_stored()).await {
            Ok(true) => self.stats.messages_saved += 1,
            Ok(false) => self.stats.messages_duplicate += 1,
            Err(err) => {
                self.stats.messages_failed += 1;
                warn!(
                    "failed to save message {}/{}: {:#}",
                    message.channel_id, message.ts, err
                );
                self.reporter.log(&format!(
                    "⚠️ [DB] message save failed ({}/{}): {}",
                    message.channel_id, message.ts, err
                ));
            }
        }
    }

    /// True the first time `(channel_id, ts)` is seen in this run.
    pub fn first_sighting(&mut self, channel_id: &str, ts: &str) -> bool {
        self.seen.insert((channel_id.to_string(), ts.to_string()))
    }
}
