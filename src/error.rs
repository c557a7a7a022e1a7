//! Error type shared by the crawler core and the batch shell.
//!
//! Only two variants are meant to stop a batch: [`CrawlError::Rejected`]
//! (the search engine refused us, usually because the crawling identity was
//! blocked) and [`CrawlError::Cancelled`]. Transport and decode failures are
//! retried inside the fetcher and only escape when a retry cap is configured.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("upstream rejected {url} with status {status}")]
    Rejected { url: String, status: u16 },

    #[error("transport error for {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("response from {url} is not valid UTF-8")]
    Decode { url: String },

    #[error("gave up on {url} after {attempts} attempts")]
    RetriesExhausted { url: String, attempts: usize },

    #[error("fetch cancelled")]
    Cancelled,

    #[error("invalid URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("http client error: {0}")]
    Client(#[source] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CrawlError {
    /// Whether the fetcher should try the request again.
    pub fn is_transient(&self) -> bool {
        matches!(self, CrawlError::Transport { .. } | CrawlError::Decode { .. })
    }
}

pub type Result<T> = std::result::Result<T, CrawlError>;
