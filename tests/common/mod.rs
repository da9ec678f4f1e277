#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use stackharvest::api::Endpoints;
use stackharvest::collect::{Collector, CollectorSettings};
use stackharvest::request::{Direct, Fetcher, RetryPolicy, Transport};
use stackharvest::{Error, Result};

pub const BASE: &str = "https://api.test/api/v1";

type Handler = dyn Fn(&str) -> Result<String> + Send + Sync;

/// Answers every GET with a closure and remembers what was asked.
pub struct ScriptedTransport {
    handler: Box<Handler>,
    calls: Mutex<Vec<(String, tokio::time::Instant)>>,
}

impl ScriptedTransport {
    pub fn new(handler: impl Fn(&str) -> Result<String> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn urls(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(u, _)| u.clone()).collect()
    }

    pub fn times(&self) -> Vec<tokio::time::Instant> {
        self.calls.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }

    pub fn count_matching(&self, needle: &str) -> usize {
        self.urls().iter().filter(|u| u.contains(needle)).count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(&self, url: &str, _proxy: Option<&str>) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), tokio::time::Instant::now()));
        (self.handler)(url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Started(String),
    Finished(String),
}

/// Like [`ScriptedTransport`], but every GET takes `latency` to answer, so
/// concurrent calls overlap and can be counted.
pub struct SlowTransport {
    handler: Box<Handler>,
    latency: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: Mutex<Vec<Call>>,
}

impl SlowTransport {
    pub fn new(
        latency: Duration,
        handler: impl Fn(&str) -> Result<String> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            latency,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Most calls that were ever in flight at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Checks that every url in `earlier` finished before any url in `later` started.
    pub fn finished_before(
        &self,
        earlier: impl Fn(&str) -> bool,
        later: impl Fn(&str) -> bool,
    ) -> bool {
        let calls = self.calls();
        let last_finish = calls.iter().rposition(|c| matches!(c, Call::Finished(u) if earlier(u)));
        let first_start = calls.iter().position(|c| matches!(c, Call::Started(u) if later(u)));
        match (last_finish, first_start) {
            (Some(finish), Some(start)) => finish < start,
            _ => false,
        }
    }
}

#[async_trait]
impl Transport for SlowTransport {
    async fn get(&self, url: &str, _proxy: Option<&str>) -> Result<String> {
        self.calls.lock().unwrap().push(Call::Started(url.to_string()));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.latency).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(Call::Finished(url.to_string()));
        (self.handler)(url)
    }
}

pub fn transient(url: &str) -> Error {
    Error::Transient {
        url: url.to_string(),
        message: "status 503 Service Unavailable".into(),
    }
}

/// Reads an integer query parameter back out of a request url.
pub fn param(url: &str, name: &str) -> Option<u64> {
    let query = url.split_once('?')?.1;
    query
        .split('&')
        .filter_map(|kv| kv.split_once('='))
        .find(|(k, _)| *k == name)
        .and_then(|(_, v)| v.parse().ok())
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
    }
}

pub fn collector(transport: Arc<dyn Transport>, settings: CollectorSettings) -> Collector {
    let fetcher = Fetcher::new(transport, Arc::new(Direct), fast_retry());
    Collector::new(fetcher, Endpoints::new(BASE), settings)
}

pub fn raw_post(id: u64, likes: u64, kind: &str) -> Value {
    json!({
        "id": id,
        "title": format!("post {id}"),
        "type": kind,
        "slug": format!("post-{id}"),
        "post_date": "2024-09-30T12:00:00.000Z",
        "audience": "everyone",
        "canonical_url": format!("https://pub.test/p/post-{id}"),
        "reaction_count": likes,
        "comment_count": 1,
    })
}

pub fn posts_page(posts: Vec<Value>) -> String {
    json!({ "posts": posts }).to_string()
}

pub fn search_result(author_id: u64, subscribers: Option<&str>) -> Value {
    let mut v = json!({
        "author_id": author_id,
        "copyright": format!("Publication {author_id}"),
        "bio": "about",
        "base_url": format!("https://pub{author_id}.test"),
        "author_name": "Author",
        "author_handle": format!("author{author_id}"),
        "author_photo_url": null,
        "author_bio": null,
        "twitter_screen_name": null,
    });
    if let Some(count) = subscribers {
        v["freeSubscriberCount"] = json!(count);
    }
    v
}

pub fn search_page(results: Vec<Value>, more: bool) -> String {
    json!({ "results": results, "more": more }).to_string()
}
