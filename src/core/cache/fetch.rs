//! Payload download seam for the cache.
//!
//! [`Fetcher`] is what `CacheStore` calls on a miss. [`HttpFetcher`] is the
//! real implementation on top of a `ureq` agent; tests plug in fakes.

use log::{debug, trace};
use std::io::Read;
use std::time::Duration;
use ureq::ResponseExt;
use ureq::http::header::CONTENT_TYPE;

use super::CacheError;
use super::sniff::media_type;
use crate::core::cancel::CancelToken;

const USER_AGENT: &str = concat!("presto/", env!("CARGO_PKG_VERSION"));
const ACCEPT: &str = "image/avif,image/webp,image/apng,image/*,*/*;q=0.8";

/// Largest payload accepted into the cache
pub const MAX_PAYLOAD_BYTES: u64 = 64 * 1024 * 1024;

const CHUNK_SIZE: usize = 64 * 1024;

/// Raw result of a download
#[derive(Debug, Clone, Default)]
pub struct Download {
    pub bytes: Vec<u8>,
    /// Declared media type, without parameters
    pub content_type: Option<String>,
    /// URL after redirects, if the transport knows it
    pub final_url: Option<String>,
}

/// Something that can turn a URL into bytes.
///
/// Implementations must return [`CacheError::Download`] for transport
/// failures and [`CacheError::Cancelled`] once `cancel` fires.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str, cancel: &CancelToken) -> Result<Download, CacheError>;
}

/// Blocking HTTP fetcher
pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        Self { agent: config.into() }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str, cancel: &CancelToken) -> Result<Download, CacheError> {
        debug!("GET {}", url);
        let mut response = self
            .agent
            .get(url)
            .header("User-Agent", USER_AGENT)
            .header("Accept", ACCEPT)
            .call()
            .map_err(|e| CacheError::Download(format!("{}: {}", url, e)))?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(media_type);
        let final_url = Some(response.get_uri().to_string());

        let mut reader = response.body_mut().as_reader().take(MAX_PAYLOAD_BYTES + 1);
        let mut bytes = Vec::new();
        let mut chunk = vec![0u8; CHUNK_SIZE];
        loop {
            if cancel.is_cancelled() {
                return Err(CacheError::Cancelled);
            }
            let n = reader
                .read(&mut chunk)
                .map_err(|e| CacheError::Download(format!("{}: {}", url, e)))?;
            if n == 0 {
                break;
            }
            bytes.extend_from_slice(&chunk[..n]);
            if bytes.len() as u64 > MAX_PAYLOAD_BYTES {
                return Err(CacheError::Download(format!(
                    "{}: payload exceeds {} MB",
                    url,
                    MAX_PAYLOAD_BYTES / 1024 / 1024
                )));
            }
        }

        trace!("Downloaded {} bytes from {} ({:?})", bytes.len(), url, content_type);
        Ok(Download { bytes, content_type, final_url })
    }
}
