//! In-crate fakes for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use harvest_store::{
    AnalysisKey, AnalysisRecord, Author, Channel, HarvestStore, StoreCounts, StoredMessage,
};

use crate::generator::{NarrativeGenerator, NarrativeRequest};
use crate::progress::ProgressSink;
use crate::walker::{RawResponse, Transport};

#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub endpoint: String,
    pub params: Vec<(String, String)>,
}

struct Route {
    endpoint: String,
    filters: Vec<(String, String)>,
    /// `None` stands for a connection failure.
    queued: VecDeque<Option<RawResponse>>,
    sticky: Option<RawResponse>,
}

impl Route {
    fn matches(&self, endpoint: &str, params: &[(String, String)]) -> bool {
        self.endpoint == endpoint && self.filters.iter().all(|f| params.contains(f))
    }

    fn same_key(&self, endpoint: &str, filters: &[(String, String)]) -> bool {
        self.endpoint == endpoint && self.filters == filters
    }
}

/// Transport answering from scripted routes.
///
/// A route matches when the endpoint is equal and every filter pair is
/// present in the request parameters. Queued responses are served once, in
/// order; a sticky response answers after the queue is drained. Unmatched
/// requests get an `ok: false` body.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    routes: Mutex<Vec<Route>>,
    calls: Mutex<Vec<Call>>,
}

fn owned(filters: &[(&str, &str)]) -> Vec<(String, String)> {
    filters
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, endpoint: &str, filters: &[(&str, &str)], response: RawResponse) {
        self.queue(endpoint, filters, Some(response));
    }

    /// Queue a transport error (as if the connection dropped).
    pub fn fail(&self, endpoint: &str, filters: &[(&str, &str)]) {
        self.queue(endpoint, filters, None);
    }

    fn queue(&self, endpoint: &str, filters: &[(&str, &str)], response: Option<RawResponse>) {
        let filters = owned(filters);
        let mut routes = self.routes.lock().unwrap();
        if let Some(route) = routes.iter_mut().find(|r| r.same_key(endpoint, &filters)) {
            route.queued.push_back(response);
            return;
        }
        routes.push(Route {
            endpoint: endpoint.to_string(),
            filters,
            queued: VecDeque::from([response]),
            sticky: None,
        });
    }

    pub fn always(&self, endpoint: &str, filters: &[(&str, &str)], response: RawResponse) {
        let filters = owned(filters);
        let mut routes = self.routes.lock().unwrap();
        if let Some(route) = routes.iter_mut().find(|r| r.same_key(endpoint, &filters)) {
            route.sticky = Some(response);
            return;
        }
        routes.push(Route {
            endpoint: endpoint.to_string(),
            filters,
            queued: VecDeque::new(),
            sticky: Some(response),
        });
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, endpoint: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.endpoint == endpoint)
            .count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(&self, endpoint: &str, params: &[(String, String)]) -> Result<RawResponse> {
        self.calls.lock().unwrap().push(Call {
            endpoint: endpoint.to_string(),
            params: params.to_vec(),
        });

        let mut routes = self.routes.lock().unwrap();
        for route in routes.iter_mut().filter(|r| r.matches(endpoint, params)) {
            if let Some(response) = route.queued.pop_front() {
                return response.ok_or_else(|| anyhow!("connection reset by peer"));
            }
            if let Some(response) = &route.sticky {
                return Ok(response.clone());
            }
        }

        Ok(RawResponse::json(
            serde_json::json!({"ok": false, "error": "not_scripted"}),
        ))
    }
}

/// In-memory [`HarvestStore`].
#[derive(Default)]
pub(crate) struct FakeStore {
    pub channels: Mutex<HashMap<String, Channel>>,
    pub authors: Mutex<HashMap<String, Author>>,
    pub messages: Mutex<Vec<StoredMessage>>,
    pub analyses: Mutex<Vec<AnalysisRecord>>,
    /// Channel ids whose message writes fail.
    pub failing_channels: Mutex<Vec<String>>,
    /// Makes `upsert_analysis` fail.
    pub failing_analysis_writes: AtomicBool,
    /// Makes `has_any_message` and `analysis_exists` fail.
    pub failing_lookups: AtomicBool,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message(self, message: StoredMessage) -> Self {
        self.messages.lock().unwrap().push(message);
        self
    }

    pub fn with_analysis(self, record: AnalysisRecord) -> Self {
        self.analyses.lock().unwrap().push(record);
        self
    }

    pub fn failing_analysis_writes(self) -> Self {
        self.failing_analysis_writes.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_lookups(self) -> Self {
        self.failing_lookups.store(true, Ordering::SeqCst);
        self
    }
}

#[async_trait]
impl HarvestStore for FakeStore {
    async fn upsert_channel(&self, channel: &Channel) -> Result<()> {
        self.channels
            .lock()
            .unwrap()
            .insert(channel.id.clone(), channel.clone());
        Ok(())
    }

    async fn upsert_author(&self, author: &Author) -> Result<()> {
        self.authors
            .lock()
            .unwrap()
            .insert(author.id.clone(), author.clone());
        Ok(())
    }

    async fn insert_message_if_absent(&self, message: &StoredMessage) -> Result<bool> {
        if self
            .failing_channels
            .lock()
            .unwrap()
            .contains(&message.channel_id)
        {
            return Err(anyhow!("disk full"));
        }
        let mut messages = self.messages.lock().unwrap();
        if messages
            .iter()
            .any(|m| m.channel_id == message.channel_id && m.ts == message.ts)
        {
            return Ok(false);
        }
        messages.push(message.clone());
        Ok(true)
    }

    async fn has_any_message(&self) -> Result<bool> {
        if self.failing_lookups.load(Ordering::SeqCst) {
            return Err(anyhow!("database is locked"));
        }
        Ok(!self.messages.lock().unwrap().is_empty())
    }

    async fn analysis_exists(&self, key: &AnalysisKey) -> Result<bool> {
        if self.failing_lookups.load(Ordering::SeqCst) {
            return Err(anyhow!("database is locked"));
        }
        Ok(self
            .analyses
            .lock()
            .unwrap()
            .iter()
            .any(|r| &r.key() == key))
    }

    async fn upsert_analysis(&self, record: &AnalysisRecord) -> Result<()> {
        if self.failing_analysis_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("disk full"));
        }
        let mut analyses = self.analyses.lock().unwrap();
        analyses.retain(|r| r.key() != record.key());
        analyses.push(record.clone());
        Ok(())
    }

    async fn list_analyses(&self, author_id: Option<&str>) -> Result<Vec<AnalysisRecord>> {
        Ok(self
            .analyses
            .lock()
            .unwrap()
            .iter()
            .filter(|r| author_id.map_or(true, |id| r.author_id == id))
            .cloned()
            .collect())
    }

    async fn counts(&self) -> Result<StoreCounts> {
        Ok(StoreCounts {
            channels: self.channels.lock().unwrap().len() as i64,
            authors: self.authors.lock().unwrap().len() as i64,
            messages: self.messages.lock().unwrap().len() as i64,
            analyses: self.analyses.lock().unwrap().len() as i64,
        })
    }
}

/// Generator that records requests and answers with a fixed reply.
pub(crate) struct CountingGenerator {
    reply: Option<String>,
    calls: AtomicUsize,
    pub requests: Mutex<Vec<NarrativeRequest>>,
}

impl CountingGenerator {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A generator whose every call fails.
    pub fn failing() -> Self {
        Self {
            reply: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NarrativeGenerator for CountingGenerator {
    async fn generate(&self, request: &NarrativeRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        self.reply
            .clone()
            .ok_or_else(|| anyhow!("generator unavailable"))
    }
}

/// Sink that keeps everything it is given.
#[derive(Default)]
pub(crate) struct CapturingSink {
    progress: Mutex<Vec<f64>>,
    lines: Mutex<Vec<String>>,
}

impl CapturingSink {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn fractions(&self) -> Vec<f64> {
        self.progress.lock().unwrap().clone()
    }
}

impl ProgressSink for CapturingSink {
    fn progress(&self, fraction: f64, _status: &str) {
        self.progress.lock().unwrap().push(fraction);
    }

    fn log(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }
}
