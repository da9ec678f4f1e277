use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::{Error, Result, DEFAULT_BACKOFF_MS, DEFAULT_MAX_ATTEMPTS};

const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36";

/// Performs a single GET, optionally through a proxy, and returns the body of a 2xx response.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, proxy: Option<&str>) -> Result<String>;
}

/// Hands out the proxy endpoint for the next attempt. `Ok(None)` means go direct.
pub trait ProxySource: Send + Sync {
    fn proxy_url(&self) -> Result<Option<String>>;
}

/// No proxying at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct Direct;

impl ProxySource for Direct {
    fn proxy_url(&self) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Round-robin over a fixed list of proxy urls.
#[derive(Debug)]
pub struct RotatingProxies {
    urls: Vec<String>,
    next: AtomicUsize,
}

impl RotatingProxies {
    pub fn new(urls: Vec<String>) -> Self {
        Self {
            urls,
            next: AtomicUsize::new(0),
        }
    }
}

impl ProxySource for RotatingProxies {
    fn proxy_url(&self) -> Result<Option<String>> {
        if self.urls.is_empty() {
            return Err(Error::ProxyUnavailable("proxy pool is empty".into()));
        }
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.urls.len();
        Ok(Some(self.urls[idx].clone()))
    }
}

/// `reqwest` backed transport. Keeps one `Client` per proxy endpoint.
pub struct HttpTransport {
    timeout: Duration,
    clients: Mutex<HashMap<Option<String>, Client>>,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client_for(&self, proxy: Option<&str>) -> Result<Client> {
        let key = proxy.map(str::to_string);
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = clients.get(&key) {
            // Client uses Arc so we can clone cheaply
            return Ok(client.clone());
        }

        let mut builder = Client::builder()
            .timeout(self.timeout)
            .user_agent(USER_AGENT);
        if let Some(proxy) = proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| Error::ProxyUnavailable(format!("{proxy}: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder.build()?;
        clients.insert(key, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str, proxy: Option<&str>) -> Result<String> {
        let client = self.client_for(proxy)?;
        let transient = |e: reqwest::Error| Error::Transient {
            url: url.to_string(),
            message: e.to_string(),
        };

        let res = client.get(url).send().await.map_err(transient)?;
        let status = res.status();
        if !status.is_success() {
            return Err(Error::Transient {
                url: url.to_string(),
                message: format!("status {status}"),
            });
        }
        res.text().await.map_err(transient)
    }
}

/// How the response body should be handed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Structured,
    Raw,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Structured(serde_json::Value),
    Raw(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    /// Delay between attempt `attempt` (0-indexed) and the one after it.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub shape: Shape,
    pub policy: RetryPolicy,
}

impl FetchRequest {
    pub fn structured(url: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            url: url.into(),
            shape: Shape::Structured,
            policy,
        }
    }

    pub fn raw(url: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            url: url.into(),
            shape: Shape::Raw,
            policy,
        }
    }
}

/// Book-keeping for one in-flight fetch.
#[derive(Debug, Default)]
struct RetryState {
    attempt: u32,
    last_error: Option<Error>,
    next_delay: Duration,
}

/// Retrying, proxy-rotating fetcher. Cheap to clone.
#[derive(Clone)]
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    proxies: Arc<dyn ProxySource>,
    policy: RetryPolicy,
}

impl Fetcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        proxies: Arc<dyn ProxySource>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            proxies,
            policy,
        }
    }

    pub async fn fetch(&self, req: &FetchRequest) -> Result<Payload> {
        let shape = req.shape;
        self.fetch_with(&req.url, req.policy, move |url, body| match shape {
            Shape::Structured => serde_json::from_str(&body)
                .map(Payload::Structured)
                .map_err(|e| Error::Parse {
                    url: url.to_string(),
                    message: e.to_string(),
                }),
            Shape::Raw => Ok(Payload::Raw(body)),
        })
        .await
    }

    /// Fetches and deserializes a JSON body. A body that doesn't fit `T` is retried.
    pub async fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        self.fetch_with(url, self.policy, |url, body| {
            serde_json::from_str(&body).map_err(|e| Error::Parse {
                url: url.to_string(),
                message: e.to_string(),
            })
        })
        .await
    }

    pub async fn fetch_text(&self, url: &str) -> Result<String> {
        self.fetch_with(url, self.policy, |_, body| Ok(body)).await
    }

    async fn fetch_with<T, F>(&self, url: &str, policy: RetryPolicy, decode: F) -> Result<T>
    where
        F: Fn(&str, String) -> Result<T>,
    {
        let attempts = policy.max_attempts.max(1);
        let mut state = RetryState::default();

        while state.attempt < attempts {
            if state.attempt > 0 {
                tokio::time::sleep(state.next_delay).await;
            }

            let result = match self.proxies.proxy_url() {
                Ok(proxy) => match self.transport.get(url, proxy.as_deref()).await {
                    Ok(body) => decode(url, body),
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            };

            match result {
                Ok(value) => {
                    debug!(url, attempt = state.attempt + 1, "fetched");
                    return Ok(value);
                }
                Err(e) => {
                    warn!(url, attempt = state.attempt + 1, error = %e, "Attempt failed");
                    state.next_delay = policy.delay_after(state.attempt);
                    state.attempt += 1;
                    let retryable = e.is_retryable();
                    state.last_error = Some(e);
                    if !retryable {
                        // Another attempt would fail the same way.
                        break;
                    }
                }
            }
        }

        Err(Error::FetchExhausted {
            url: url.to_string(),
            attempts: state.attempt,
            last_error: Box::new(state.last_error.unwrap_or_else(|| Error::Transient {
                url: url.to_string(),
                message: "no attempt was made".into(),
            })),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_after(2), Duration::from_millis(4000));
    }

    #[test]
    fn rotating_proxies_cycle() {
        let pool = RotatingProxies::new(vec!["http://a:1".into(), "http://b:2".into()]);
        let picks: Vec<_> = (0..3).map(|_| pool.proxy_url().unwrap().unwrap()).collect();
        assert_eq!(picks, ["http://a:1", "http://b:2", "http://a:1"]);
    }

    #[test]
    fn empty_pool_is_a_retryable_failure() {
        let err = RotatingProxies::new(vec![]).proxy_url().unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn bad_proxy_url_is_retryable_but_a_local_failure_is_not() {
        let err = HttpTransport::new(Duration::from_secs(1))
            .client_for(Some("not a proxy url"))
            .unwrap_err();
        assert!(matches!(err, Error::ProxyUnavailable(_)));
        assert!(err.is_retryable());
        assert!(!Error::Io(std::io::Error::other("disk gone")).is_retryable());
    }
}
