//! Content-addressable on-disk image cache.
//!
//! Layout: `<root>/images/<fingerprint>.<ext>` where the fingerprint is the
//! lowercase hex SHA-256 of the exact URL string. There is no index file: the
//! directory listing is the index, and the extension comes from the payload.
//!
//! # Guarantees
//!
//! - One in-flight download per URL. Concurrent callers for the same URL wait
//!   on the first caller's [`Pending`] slot; the slot is dropped once settled.
//! - Payloads land in `<fingerprint>.tmp-<uuid>` first and are renamed into
//!   place, so a final name never points at a truncated file.
//! - At most one final file per fingerprint survives a write.
//!
//! # Cancellation
//!
//! The initiating caller's token drives the download: cancelling it aborts the
//! shared download and every waiter gets [`CacheError::Cancelled`]. A waiter
//! cancelling its own token only detaches itself.

pub mod fetch;
pub mod sniff;

use log::{debug, info, trace, warn};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::core::cancel::CancelToken;
pub use fetch::{Download, Fetcher, HttpFetcher};

const IMAGE_DIR: &str = "images";
const TEMP_MARKER: &str = "tmp-";

/// How often a waiting caller re-checks its own cancel token
const WAIT_SLICE: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("no usable URL")]
    InvalidUrl,
    #[error("download failed: {0}")]
    Download(String),
    #[error("payload from {url} is not a recognized image")]
    UnrecognizedPayload { url: String },
    #[error("cancelled")]
    Cancelled,
    #[error("cache I/O failed: {0}")]
    Io(Arc<io::Error>),
}

impl From<io::Error> for CacheError {
    fn from(e: io::Error) -> Self {
        CacheError::Io(Arc::new(e))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    Image,
    Page,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub url: String,
    pub fingerprint: String,
    pub kind: CacheKind,
    /// Local file for images, the URL itself for pages
    pub file_path: String,
}

impl CacheEntry {
    /// Local file path (images only)
    pub fn path(&self) -> Option<&Path> {
        match self.kind {
            CacheKind::Image => Some(Path::new(&self.file_path)),
            CacheKind::Page => None,
        }
    }
}

/// Lowercase hex SHA-256 of the URL string
pub fn fingerprint(url: &str) -> String {
    format!("{:x}", Sha256::digest(url.as_bytes()))
}

/// Blank input and the editor's `https://` placeholder are never fetched
pub fn is_placeholder(url: &str) -> bool {
    let url = url.trim();
    url.is_empty() || url == "https://"
}

pub fn is_image_url(url: &str) -> bool {
    sniff::url_extension(url).is_some()
}

type Settled = Result<CacheEntry, CacheError>;

/// One-shot result slot shared by every caller waiting on the same URL
struct Pending {
    slot: Mutex<Option<Settled>>,
    ready: Condvar,
}

impl Pending {
    fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    /// Store the result unless one is already there.
    fn settle(&self, result: Settled) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = Some(result);
            self.ready.notify_all();
        }
    }

    fn wait(&self, cancel: &CancelToken) -> Settled {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(result) = slot.as_ref() {
                return result.clone();
            }
            if cancel.is_cancelled() {
                return Err(CacheError::Cancelled);
            }
            slot = self
                .ready
                .wait_timeout(slot, WAIT_SLICE)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
    }
}

/// Removes the in-flight registration when the initiating caller is done,
/// settling waiters with an error if it bailed out early.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashMap<String, Arc<Pending>>>,
    url: &'a str,
    pending: Arc<Pending>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.pending
            .settle(Err(CacheError::Download("download aborted".to_string())));
        let mut map = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if map.get(self.url).is_some_and(|p| Arc::ptr_eq(p, &self.pending)) {
            map.remove(self.url);
        }
    }
}

/// On-disk image cache keyed by URL fingerprint.
pub struct CacheStore {
    root: PathBuf,
    image_dir: PathBuf,
    fetcher: Box<dyn Fetcher>,
    in_flight: Mutex<HashMap<String, Arc<Pending>>>,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("root", &self.root)
            .field("in_flight", &self.in_flight_count())
            .finish()
    }
}

impl CacheStore {
    /// Open (and create) a cache rooted at `root`.
    pub fn new(root: impl Into<PathBuf>, fetcher: Box<dyn Fetcher>) -> Result<Self, CacheError> {
        let root = root.into();
        let image_dir = root.join(IMAGE_DIR);
        fs::create_dir_all(&image_dir)?;
        info!("Slide cache at {}", image_dir.display());

        Ok(Self {
            root,
            image_dir,
            fetcher,
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn image_dir(&self) -> &Path {
        &self.image_dir
    }

    /// Downloads currently registered as in flight
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Make sure `url` is available locally and return its entry.
    ///
    /// Pages are returned as-is without any I/O. Images hit the disk first and
    /// only download on a miss.
    pub fn ensure_cached(&self, url: &str, cancel: &CancelToken) -> Result<CacheEntry, CacheError> {
        if is_placeholder(url) {
            return Err(CacheError::InvalidUrl);
        }

        let fp = fingerprint(url);
        if !is_image_url(url) {
            return Ok(CacheEntry {
                url: url.to_string(),
                fingerprint: fp,
                kind: CacheKind::Page,
                file_path: url.to_string(),
            });
        }

        if let Some(path) = self.find_final(&fp)? {
            trace!("Cache hit: {} -> {}", url, path.display());
            return Ok(self.image_entry(url, fp, &path));
        }

        let (pending, initiator) = {
            let mut map = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            match map.get(url) {
                Some(p) => (Arc::clone(p), false),
                None => {
                    let p = Arc::new(Pending::new());
                    map.insert(url.to_string(), Arc::clone(&p));
                    (p, true)
                }
            }
        };

        if !initiator {
            trace!("Joining in-flight download: {}", url);
            return pending.wait(cancel);
        }

        let guard = InFlightGuard {
            in_flight: &self.in_flight,
            url,
            pending: Arc::clone(&pending),
        };
        let result = self.download_and_store(url, fp, cancel);
        pending.settle(result.clone());
        drop(guard);
        result
    }

    /// Cached file for `url`, without any network access.
    pub fn try_get_cached_path(&self, url: &str) -> Option<PathBuf> {
        if is_placeholder(url) || !is_image_url(url) {
            return None;
        }
        self.find_final(&fingerprint(url)).ok().flatten()
    }

    /// Delete every file for `url` (temp files included). Missing files are fine.
    pub fn remove_cached(&self, url: &str) -> Result<(), CacheError> {
        if is_placeholder(url) {
            return Ok(());
        }
        for path in self.matching_files(&fingerprint(url))? {
            remove_if_present(&path)?;
        }
        debug!("Removed cache for {}", url);
        Ok(())
    }

    /// Wipe the whole cache root and recreate the image directory.
    pub fn clear_all(&self) -> Result<(), CacheError> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(&self.image_dir)?;
        info!("Cache cleared: {}", self.root.display());
        Ok(())
    }

    fn image_entry(&self, url: &str, fingerprint: String, path: &Path) -> CacheEntry {
        CacheEntry {
            url: url.to_string(),
            fingerprint,
            kind: CacheKind::Image,
            file_path: path.to_string_lossy().into_owned(),
        }
    }

    fn download_and_store(&self, url: &str, fp: String, cancel: &CancelToken) -> Settled {
        // Another process (or a caller that just settled) may have won already
        if let Some(path) = self.find_final(&fp)? {
            return Ok(self.image_entry(url, fp, &path));
        }
        if cancel.is_cancelled() {
            return Err(CacheError::Cancelled);
        }

        let download = self.fetcher.fetch(url, cancel)?;
        if cancel.is_cancelled() {
            return Err(CacheError::Cancelled);
        }

        let Some(ext) = sniff::resolve_extension(url, &download) else {
            warn!(
                "Rejected payload from {} ({} bytes, content-type {:?})",
                url,
                download.bytes.len(),
                download.content_type
            );
            return Err(CacheError::UnrecognizedPayload { url: url.to_string() });
        };

        let path = self.write_atomic(&fp, &ext, &download.bytes)?;
        debug!("Cached {} -> {}", url, path.display());
        Ok(self.image_entry(url, fp, &path))
    }

    /// Temp-write then rename into `<fp><ext>`; returns the final path.
    fn write_atomic(&self, fp: &str, ext: &str, bytes: &[u8]) -> Result<PathBuf, CacheError> {
        fs::create_dir_all(&self.image_dir)?;
        let final_path = self.image_dir.join(format!("{}{}", fp, ext));
        let temp_path = self
            .image_dir
            .join(format!("{}.{}{}", fp, TEMP_MARKER, Uuid::new_v4().simple()));

        fs::write(&temp_path, bytes)?;

        for stale in self.matching_files(fp)? {
            if stale == temp_path || stale == final_path {
                continue;
            }
            trace!("Removing stale cache file {}", stale.display());
            remove_if_present(&stale)?;
        }

        if final_path.exists() {
            remove_if_present(&temp_path)?;
        } else if let Err(e) = fs::rename(&temp_path, &final_path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }
        Ok(final_path)
    }

    /// Every `<fp>.*` file in the image dir, temp files included, sorted.
    fn matching_files(&self, fp: &str) -> Result<Vec<PathBuf>, CacheError> {
        let prefix = format!("{}.", fp);
        let entries = match fs::read_dir(&self.image_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(&prefix))
            .map(|entry| entry.path())
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// First non-temp `<fp>.*` file
    fn find_final(&self, fp: &str) -> Result<Option<PathBuf>, CacheError> {
        let temp_prefix = format!("{}.{}", fp, TEMP_MARKER);
        Ok(self.matching_files(fp)?.into_iter().find(|path| {
            path.file_name()
                .is_some_and(|name| !name.to_string_lossy().starts_with(&temp_prefix))
                && path.is_file()
        }))
    }
}

fn remove_if_present(path: &Path) -> Result<(), CacheError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
