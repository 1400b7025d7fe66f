//! Slide model: one URL in the deck plus its cache/display state.

/// Progress of proactive caching for a slide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheState {
    #[default]
    Unknown,
    Caching,
    Cached,
    Failed,
}

/// Where the last display of a slide was loaded from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceState {
    #[default]
    Unknown,
    Cache,
    Network,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Slide {
    url: String,
    /// 1-based, kept in sync by the presenter on every list mutation
    position: usize,
    cache_state: CacheState,
    source_state: SourceState,
}

impl Slide {
    pub fn new(url: impl Into<String>, position: usize) -> Self {
        Self {
            url: url.into(),
            position,
            cache_state: CacheState::Unknown,
            source_state: SourceState::Unknown,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn cache_state(&self) -> CacheState {
        self.cache_state
    }

    pub fn source_state(&self) -> SourceState {
        self.source_state
    }

    /// Change the URL; cached knowledge about the old one is dropped.
    /// Returns false if the URL is unchanged.
    pub(crate) fn set_url(&mut self, url: impl Into<String>) -> bool {
        let url = url.into();
        if url == self.url {
            return false;
        }
        self.url = url;
        self.cache_state = CacheState::Unknown;
        self.source_state = SourceState::Unknown;
        true
    }

    pub(crate) fn set_position(&mut self, position: usize) {
        self.position = position;
    }

    pub(crate) fn set_cache_state(&mut self, state: CacheState) {
        self.cache_state = state;
    }

    pub(crate) fn set_source_state(&mut self, state: SourceState) {
        self.source_state = state;
    }

    /// Combined label for list views: Failed > Caching > Live > Cached.
    pub fn summary(&self) -> &'static str {
        if self.cache_state == CacheState::Failed || self.source_state == SourceState::Failed {
            return "Failed";
        }
        if self.cache_state == CacheState::Caching {
            return "Caching";
        }
        if self.source_state == SourceState::Network {
            return "Live";
        }
        if self.source_state == SourceState::Cache || self.cache_state == CacheState::Cached {
            return "Cached";
        }
        ""
    }
}

/// Rewrite 1-based positions after an insert/remove/move.
pub(crate) fn renumber(slides: &mut [Slide]) {
    for (i, slide) in slides.iter_mut().enumerate() {
        slide.set_position(i + 1);
    }
}
