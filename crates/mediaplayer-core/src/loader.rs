//! Subtitle Source Loader
//!
//! Resolves a subtitle `src` (http(s) URL, `file://` URI, or bare path) to its
//! text content. Loading never fails: any error yields an empty string, which
//! the parsers treat as "no cues".

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

/// Default fetch timeout for remote subtitle files
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// Byte source for subtitle files
#[async_trait]
pub trait SubtitleLoader: Send + Sync {
    /// Returns the content at `src`, or an empty string on any failure.
    async fn load_subtitle_content(&self, src: &str) -> String;
}

/// Where a subtitle `src` points
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubtitleLocation {
    Remote(String),
    Local(PathBuf),
}

impl SubtitleLocation {
    pub fn resolve(src: &str) -> Option<Self> {
        let src = src.trim();
        if src.is_empty() {
            return None;
        }

        let lower = src.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            return Some(Self::Remote(src.to_string()));
        }
        if lower.starts_with("file://") {
            let path = &src["file://".len()..];
            if path.is_empty() {
                return None;
            }
            return Some(Self::Local(PathBuf::from(path)));
        }
        if lower.contains("://") {
            // Unsupported scheme
            return None;
        }

        Some(Self::Local(PathBuf::from(src)))
    }
}

/// Loader backed by the local filesystem and, with the `remote-sources`
/// feature, an HTTP client.
pub struct DefaultSubtitleLoader {
    timeout: Duration,
    #[cfg(feature = "remote-sources")]
    client: Option<reqwest::Client>,
}

impl DefaultSubtitleLoader {
    pub fn new(timeout_secs: u64) -> Self {
        let timeout = Duration::from_secs(timeout_secs.max(1));

        #[cfg(feature = "remote-sources")]
        let client = match reqwest::Client::builder().timeout(timeout).build() {
            Ok(client) => Some(client),
            Err(e) => {
                warn!("Failed to create HTTP client, remote subtitles disabled: {}", e);
                None
            }
        };

        Self {
            timeout,
            #[cfg(feature = "remote-sources")]
            client,
        }
    }

    async fn load_local(&self, path: PathBuf) -> String {
        let read = tokio::time::timeout(self.timeout, tokio::fs::read(&path)).await;
        match read {
            Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
            Ok(Err(e)) => {
                warn!("Failed to read subtitle file {}: {}", path.display(), e);
                String::new()
            }
            Err(_) => {
                warn!("Timed out reading subtitle file {}", path.display());
                String::new()
            }
        }
    }

    #[cfg(feature = "remote-sources")]
    async fn load_remote(&self, url: &str) -> String {
        let Some(client) = &self.client else {
            return String::new();
        };

        let response = match client.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("Failed to fetch subtitles from {}: {}", url, e);
                return String::new();
            }
        };

        if !response.status().is_success() {
            warn!(
                "Subtitle fetch from {} returned HTTP {}",
                url,
                response.status()
            );
            return String::new();
        }

        match response.bytes().await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                warn!("Failed to read subtitle body from {}: {}", url, e);
                String::new()
            }
        }
    }

    #[cfg(not(feature = "remote-sources"))]
    async fn load_remote(&self, url: &str) -> String {
        warn!(
            "Remote subtitle source {} ignored: built without remote-sources",
            url
        );
        String::new()
    }
}

impl Default for DefaultSubtitleLoader {
    fn default() -> Self {
        Self::new(DEFAULT_FETCH_TIMEOUT_SECS)
    }
}

#[async_trait]
impl SubtitleLoader for DefaultSubtitleLoader {
    async fn load_subtitle_content(&self, src: &str) -> String {
        let content = match SubtitleLocation::resolve(src) {
            Some(SubtitleLocation::Remote(url)) => self.load_remote(&url).await,
            Some(SubtitleLocation::Local(path)) => self.load_local(path).await,
            None => {
                warn!("Unsupported subtitle source: {:?}", src);
                String::new()
            }
        };

        debug!("Loaded {} bytes of subtitles from {}", content.len(), src);
        content
    }
}
