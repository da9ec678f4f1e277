use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Request to {url} failed: {message}")]
    Transient { url: String, message: String },
    #[error("Couldn't acquire a proxy endpoint: {0}")]
    ProxyUnavailable(String),
    #[error("Malformed body from {url}: {message}")]
    Parse { url: String, message: String },
    #[error("Gave up on {url} after {attempts} attempts. Last error: {last_error}")]
    FetchExhausted {
        url: String,
        attempts: u32,
        last_error: Box<Error>,
    },

    #[error("The selector you are trying to scrape for is invalid. Selector: {0}")]
    ParseMissingSelector(String),

    #[error("Couldn't persist to {target}: {message}")]
    Persistence { target: String, message: String },
    #[error("Invalid config value for {key}: {message}")]
    Config { key: String, message: String },

    #[error("Io Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Tokio Join Error, couldn't await a task! {0}")]
    RuntimeJoin(#[from] tokio::task::JoinError),

    #[error("Reqwest Error: {0}")]
    Reqwest(#[from] reqwest::Error),
}

impl Error {
    /// Whether another attempt at the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Transient { .. } | Error::ProxyUnavailable(_) | Error::Parse { .. }
        )
    }
}
