//! Decides what URL a renderer should actually load for a slide.
//!
//! Pages always load live. Images go through the cache and load from a
//! `file://` URI when that works; any cache failure falls back to the original
//! URL, since caching only speeds things up.

use log::debug;
use std::path::Path;
use std::sync::Arc;

use crate::core::cache::{self, CacheError, CacheStore};
use crate::core::cancel::CancelToken;

/// What to load and where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub display_url: String,
    pub is_from_cache: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Image served from the local cache
    Cached,
    /// Page, always live
    Live,
    /// Image whose caching failed; shown live
    Failed(String),
    /// Caching was cancelled; shown live
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub resolved: Resolved,
    pub outcome: Outcome,
}

pub fn is_image_url(url: &str) -> bool {
    cache::is_image_url(url)
}

/// `file://` URI for an absolute local path
pub fn file_uri(path: &Path) -> String {
    let raw = path.to_string_lossy().replace('\\', "/");
    if raw.starts_with('/') {
        format!("file://{}", raw)
    } else {
        format!("file:///{}", raw)
    }
}

/// Full-window black page showing one image; used for live image URLs.
pub fn image_html(url: &str) -> String {
    let safe = html_escape(url);
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<style>
* {{ margin: 0; padding: 0; box-sizing: border-box; }}
html, body {{ width: 100vw; height: 100vh; background: #000; display: flex; align-items: center; justify-content: center; overflow: hidden; }}
img {{ max-width: 100%; max-height: 100%; object-fit: contain; display: block; }}
</style>
</head>
<body>
  <img src="{}" alt="Slide"/>
</body>
</html>
"#,
        safe
    )
}

fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[derive(Debug, Clone)]
pub struct SlideResolver {
    cache: Arc<CacheStore>,
}

impl SlideResolver {
    pub fn new(cache: Arc<CacheStore>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    /// Best URL to load for `url`. Never fails.
    pub fn resolve(&self, url: &str, cancel: &CancelToken) -> Resolved {
        self.resolve_detailed(url, cancel).resolved
    }

    pub fn resolve_detailed(&self, url: &str, cancel: &CancelToken) -> Resolution {
        let live = |outcome| Resolution {
            resolved: Resolved {
                display_url: url.to_string(),
                is_from_cache: false,
            },
            outcome,
        };

        if !is_image_url(url) {
            return live(Outcome::Live);
        }

        match self.cache.ensure_cached(url, cancel) {
            Ok(entry) => match entry.path() {
                Some(path) => Resolution {
                    resolved: Resolved {
                        display_url: file_uri(path),
                        is_from_cache: true,
                    },
                    outcome: Outcome::Cached,
                },
                None => live(Outcome::Live),
            },
            Err(CacheError::Cancelled) => live(Outcome::Cancelled),
            Err(e) => {
                debug!("Falling back to live URL for {}: {}", url, e);
                live(Outcome::Failed(e.to_string()))
            }
        }
    }
}
