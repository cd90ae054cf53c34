//! Feed sources and bounded fetching: a hard byte ceiling and a hard timeout on every download.

use crate::config::FeedConfig;
use crate::error::FeedError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;
use url::Url;

const INITIAL_BUFFER: usize = 1 << 20;

/// Where a feed is read from: an `http(s)` URL, a `file://` URL or a plain path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FeedSource {
    Http(Url),
    File(PathBuf),
}

impl FromStr for FeedSource {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(FeedError::InvalidSource("empty source".into()));
        }
        if !s.contains("://") {
            return Ok(FeedSource::File(PathBuf::from(s)));
        }
        let url = Url::parse(s).map_err(|err| FeedError::InvalidSource(format!("{s}: {err}")))?;
        match url.scheme() {
            "http" | "https" => Ok(FeedSource::Http(url)),
            "file" => url
                .to_file_path()
                .map(FeedSource::File)
                .map_err(|_| FeedError::InvalidSource(format!("{s}: not a local path"))),
            scheme => Err(FeedError::InvalidSource(format!("{s}: unsupported scheme {scheme}"))),
        }
    }
}

impl TryFrom<String> for FeedSource {
    type Error = FeedError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FeedSource> for String {
    fn from(source: FeedSource) -> Self {
        source.to_string()
    }
}

impl fmt::Display for FeedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedSource::Http(url) => write!(f, "{url}"),
            FeedSource::File(path) => write!(f, "{}", path.display()),
        }
    }
}

pub struct Downloader {
    client: Client,
    max_bytes: u64,
    timeout: Duration,
}

impl Downloader {
    pub fn new(config: &FeedConfig) -> Result<Self, FeedError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(5))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;
        Ok(Self { client, max_bytes: config.max_feed_bytes, timeout: Duration::from_secs(config.download_timeout_secs) })
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// The whole feed body. Exceeding the size ceiling or the timeout fails the fetch.
    pub async fn fetch(&self, source: &FeedSource) -> Result<Vec<u8>, FeedError> {
        let fetch = async {
            match source {
                FeedSource::Http(url) => self.fetch_http(url).await,
                FeedSource::File(path) => self.read_file(path).await,
            }
        };
        match tokio::time::timeout(self.timeout, fetch).await {
            Ok(result) => result,
            Err(_) => Err(FeedError::Timeout(self.timeout)),
        }
    }

    async fn fetch_http(&self, url: &Url) -> Result<Vec<u8>, FeedError> {
        let mut response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Download(format!("{url}: HTTP {status}")));
        }
        if let Some(length) = response.content_length() {
            if length > self.max_bytes {
                return Err(FeedError::TooLarge { limit: self.max_bytes });
            }
        }
        let capacity = response.content_length().unwrap_or(0).min(INITIAL_BUFFER as u64) as usize;
        let mut body = Vec::with_capacity(capacity);
        while let Some(chunk) = response.chunk().await? {
            if (body.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(FeedError::TooLarge { limit: self.max_bytes });
            }
            body.extend_from_slice(&chunk);
        }
        debug!(%url, bytes = body.len(), "feed downloaded");
        Ok(body)
    }

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>, FeedError> {
        let io_err = |err: std::io::Error| FeedError::Download(format!("{}: {err}", path.display()));
        let meta = tokio::fs::metadata(path).await.map_err(io_err)?;
        if meta.len() > self.max_bytes {
            return Err(FeedError::TooLarge { limit: self.max_bytes });
        }
        let body = tokio::fs::read(path).await.map_err(io_err)?;
        debug!(path = %path.display(), bytes = body.len(), "feed read");
        Ok(body)
    }
}
