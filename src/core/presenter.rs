//! Presentation state machine: slide list, current index, zoom, play/stop.
//!
//! **Threading**: `Presenter` lives on the host thread and is the only owner of
//! slide state. Resolution and cache work run on background [`Workers`] and
//! report back through a channel; [`Presenter::pump`] applies those results on
//! the host thread and returns them as [`SlideUpdate`] diffs.
//!
//! # Modes
//!
//! ```text
//!            play() [non-empty]
//!  Browsing ───────────────────▶ Presenting
//!     ▲                              │
//!     └────────────── stop() ────────┘
//! ```
//!
//! Navigation works in both modes and wraps around. The index reached while
//! presenting is kept after `stop()`.
//!
//! # Worker pools
//!
//! - `display` pool resolves the current slide after navigation/zoom. Each
//!   navigation bumps the epoch so resolutions for slides skipped over are
//!   dropped before they start.
//! - `ops` pool has a single thread: batch warming, single-slide reload and
//!   clear-all run there one at a time and never interleave.

use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{debug, info, trace, warn};
use serde::Serialize;
use std::time::{Duration, Instant};

use crate::core::cache::is_placeholder;
use crate::core::cancel::CancelToken;
use crate::core::resolver::{Outcome, Resolution, Resolved, SlideResolver, is_image_url};
use crate::core::slide::{CacheState, Slide, SourceState, renumber};
use crate::core::workers::Workers;

pub const ZOOM_MIN: f64 = 0.1;
pub const ZOOM_MAX: f64 = 5.0;
pub const ZOOM_STEP: f64 = 1.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Browsing,
    Presenting,
}

/// Control commands, shared by keyboard handling and the remote service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Next,
    Prev,
    Play,
    Stop,
    ZoomIn,
    ZoomOut,
    ZoomReset,
    Scroll(i32),
}

/// Snapshot served to remote clients
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentationStatus {
    pub current_index: usize,
    pub slide_count: usize,
    pub is_playing: bool,
    pub current_url: Option<String>,
    pub zoom_factor: f64,
}

impl Default for PresentationStatus {
    fn default() -> Self {
        Self {
            current_index: 0,
            slide_count: 0,
            is_playing: false,
            current_url: None,
            zoom_factor: 1.0,
        }
    }
}

/// What a controller call changed
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Unchanged,
    Navigated { index: usize },
    Started { index: usize },
    Stopped { index: usize },
    Zoomed { factor: f64 },
    /// Renderer should scroll the current slide
    Scrolled { dy: i32 },
}

/// State change reported by [`Presenter::pump`]
#[derive(Debug, Clone, PartialEq)]
pub enum SlideUpdate {
    State {
        index: usize,
        cache_state: CacheState,
        source_state: SourceState,
    },
    /// Current slide is ready to display
    Display { index: usize, resolved: Resolved },
    Progress { done: usize, total: usize },
    WarmFinished { total: usize },
    WarmCancelled,
    CacheCleared,
    CacheOpFailed { message: String },
}

/// Messages from worker jobs back to the host thread
#[derive(Debug)]
enum WorkerEvent {
    Caching { index: usize, url: String },
    Resolved {
        index: usize,
        url: String,
        resolution: Resolution,
        display: bool,
    },
    Progress { done: usize, total: usize },
    WarmFinished { total: usize },
    WarmCancelled,
    Cleared,
    OpFailed(String),
}

pub struct Presenter {
    slides: Vec<Slide>,
    current_index: usize,
    zoom_factor: f64,
    mode: Mode,
    resolver: SlideResolver,
    display: Workers,
    ops: Workers,
    events_tx: Sender<WorkerEvent>,
    events_rx: Receiver<WorkerEvent>,
    batch: Option<CancelToken>,
}

impl Presenter {
    /// `display_threads` workers resolve navigation targets; cache operations
    /// get their own single thread.
    pub fn new(resolver: SlideResolver, display_threads: usize) -> Self {
        let (events_tx, events_rx) = unbounded();
        info!("Presenter initialized ({} display workers)", display_threads.max(1));
        Self {
            slides: Vec::new(),
            current_index: 0,
            zoom_factor: 1.0,
            mode: Mode::Browsing,
            resolver,
            display: Workers::new(display_threads),
            ops: Workers::new(1),
            events_tx,
            events_rx,
            batch: None,
        }
    }

    // ========== Read access ==========

    pub fn slides(&self) -> &[Slide] {
        &self.slides
    }

    pub fn len(&self) -> usize {
        self.slides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slides.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current(&self) -> Option<&Slide> {
        self.slides.get(self.current_index)
    }

    pub fn zoom_factor(&self) -> f64 {
        self.zoom_factor
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_playing(&self) -> bool {
        self.mode == Mode::Presenting
    }

    pub fn urls(&self) -> Vec<String> {
        self.slides.iter().map(|s| s.url().to_string()).collect()
    }

    pub fn status(&self) -> PresentationStatus {
        PresentationStatus {
            current_index: self.current_index,
            slide_count: self.slides.len(),
            is_playing: self.is_playing(),
            current_url: self.current().map(|s| s.url().to_string()),
            zoom_factor: self.zoom_factor,
        }
    }

    // ========== Mode & navigation ==========

    pub fn apply(&mut self, command: Command) -> Transition {
        trace!("Command: {:?}", command);
        match command {
            Command::Next => self.next(),
            Command::Prev => self.prev(),
            Command::Play => self.play(),
            Command::Stop => self.stop(),
            Command::ZoomIn => self.zoom_in(),
            Command::ZoomOut => self.zoom_out(),
            Command::ZoomReset => self.zoom_reset(),
            Command::Scroll(dy) => self.scroll(dy),
        }
    }

    /// Enter fullscreen at the selected slide. Needs at least one slide.
    pub fn play(&mut self) -> Transition {
        if self.mode == Mode::Presenting || self.slides.is_empty() {
            return Transition::Unchanged;
        }
        self.current_index = self.current_index.min(self.slides.len() - 1);
        self.mode = Mode::Presenting;
        info!("Presenting from slide {}", self.current_index + 1);
        self.schedule_display();
        Transition::Started { index: self.current_index }
    }

    pub fn stop(&mut self) -> Transition {
        if self.mode == Mode::Browsing {
            return Transition::Unchanged;
        }
        self.mode = Mode::Browsing;
        info!("Presentation stopped at slide {}", self.current_index + 1);
        Transition::Stopped { index: self.current_index }
    }

    pub fn next(&mut self) -> Transition {
        let count = self.slides.len();
        if count == 0 {
            return Transition::Unchanged;
        }
        self.navigate_to((self.current_index + 1) % count)
    }

    pub fn prev(&mut self) -> Transition {
        let count = self.slides.len();
        if count == 0 {
            return Transition::Unchanged;
        }
        self.navigate_to((self.current_index + count - 1) % count)
    }

    /// Select a slide directly (list click), clamped to the list.
    pub fn select(&mut self, index: usize) -> Transition {
        if self.slides.is_empty() {
            return Transition::Unchanged;
        }
        self.navigate_to(index.min(self.slides.len() - 1))
    }

    fn navigate_to(&mut self, index: usize) -> Transition {
        self.current_index = index;
        self.schedule_display();
        Transition::Navigated { index }
    }

    // ========== Zoom ==========

    pub fn zoom_in(&mut self) -> Transition {
        self.set_zoom(self.zoom_factor * ZOOM_STEP)
    }

    pub fn zoom_out(&mut self) -> Transition {
        self.set_zoom(self.zoom_factor / ZOOM_STEP)
    }

    pub fn zoom_reset(&mut self) -> Transition {
        self.set_zoom(1.0)
    }

    /// Set zoom directly, clamped to [`ZOOM_MIN`]..=[`ZOOM_MAX`].
    pub fn set_zoom(&mut self, factor: f64) -> Transition {
        self.zoom_factor = factor.clamp(ZOOM_MIN, ZOOM_MAX);
        self.schedule_display();
        Transition::Zoomed { factor: self.zoom_factor }
    }

    pub fn scroll(&mut self, dy: i32) -> Transition {
        Transition::Scrolled { dy }
    }

    // ========== List editing ==========

    /// Replace the whole list; selection goes back to the first slide.
    pub fn set_slides<I, S>(&mut self, urls: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cancel_warm();
        self.slides = urls
            .into_iter()
            .enumerate()
            .map(|(i, url)| Slide::new(url, i + 1))
            .collect();
        self.current_index = 0;
        debug!("Slide list replaced: {} slides", self.slides.len());
        self.schedule_display();
    }

    /// Insert at `index` (clamped to the end). The selected slide stays selected.
    pub fn insert(&mut self, index: usize, url: impl Into<String>) -> usize {
        let index = index.min(self.slides.len());
        let was_empty = self.slides.is_empty();
        self.slides.insert(index, Slide::new(url, index + 1));
        renumber(&mut self.slides);
        if !was_empty && index <= self.current_index {
            self.current_index += 1;
        }
        index
    }

    pub fn remove(&mut self, index: usize) -> Option<Slide> {
        if index >= self.slides.len() {
            return None;
        }
        let removed = self.slides.remove(index);
        renumber(&mut self.slides);

        let was_current = index == self.current_index;
        if index < self.current_index {
            self.current_index -= 1;
        }
        self.clamp_index();
        if was_current {
            self.schedule_display();
        }
        Some(removed)
    }

    /// Move a slide; the selection follows the slide it pointed at.
    pub fn move_slide(&mut self, from: usize, to: usize) -> bool {
        let len = self.slides.len();
        if from >= len || to >= len || from == to {
            return false;
        }
        let slide = self.slides.remove(from);
        self.slides.insert(to, slide);
        renumber(&mut self.slides);

        let cur = self.current_index;
        self.current_index = if cur == from {
            to
        } else if from < cur && cur <= to {
            cur - 1
        } else if to <= cur && cur < from {
            cur + 1
        } else {
            cur
        };
        true
    }

    /// Edit a slide's URL. Its cache/source state starts over.
    pub fn set_url(&mut self, index: usize, url: impl Into<String>) -> bool {
        let Some(slide) = self.slides.get_mut(index) else {
            return false;
        };
        if !slide.set_url(url) {
            return false;
        }
        if index == self.current_index {
            self.schedule_display();
        }
        true
    }

    fn clamp_index(&mut self) {
        self.current_index = match self.slides.len() {
            0 => 0,
            n => self.current_index.min(n - 1),
        };
    }

    // ========== Cache operations ==========

    /// Cache every slide in list order on the ops thread.
    ///
    /// A running batch is cancelled first. With `force_refresh` each slide's
    /// cached file is dropped before it is fetched again.
    pub fn warm_all(&mut self, force_refresh: bool) {
        self.cancel_warm();
        let token = CancelToken::new();
        self.batch = Some(token.clone());

        let jobs: Vec<(usize, String)> = self
            .slides
            .iter()
            .enumerate()
            .map(|(i, s)| (i, s.url().to_string()))
            .collect();
        let resolver = self.resolver.clone();
        let tx = self.events_tx.clone();
        info!(
            "{} {} slides",
            if force_refresh { "Re-caching" } else { "Caching" },
            jobs.len()
        );

        self.ops.execute(move || {
            let total = jobs.len();
            for (done, (index, url)) in jobs.iter().enumerate() {
                if token.is_cancelled() {
                    debug!("Warm cancelled after {}/{}", done, total);
                    let _ = tx.send(WorkerEvent::WarmCancelled);
                    return;
                }
                cache_one(&resolver, &tx, *index, url, force_refresh, false, &token);
                let _ = tx.send(WorkerEvent::Progress { done: done + 1, total });
            }
            let _ = tx.send(WorkerEvent::WarmFinished { total });
        });
    }

    /// Cancel the running batch, if any. Cancellation surfaces as
    /// [`SlideUpdate::WarmCancelled`], never as an error.
    pub fn cancel_warm(&mut self) {
        if let Some(token) = self.batch.take() {
            token.cancel();
        }
    }

    /// Drop one slide's cached file and cache it again.
    pub fn reload(&mut self, index: usize) -> bool {
        let Some(slide) = self.slides.get(index) else {
            return false;
        };
        let url = slide.url().to_string();
        let resolver = self.resolver.clone();
        let tx = self.events_tx.clone();
        self.ops.execute(move || {
            cache_one(&resolver, &tx, index, &url, true, true, &CancelToken::none());
        });
        true
    }

    /// Wipe the cache directory; a running batch is cancelled first.
    pub fn clear_cache(&mut self) {
        self.cancel_warm();
        let resolver = self.resolver.clone();
        let tx = self.events_tx.clone();
        self.ops.execute(move || {
            let event = match resolver.cache().clear_all() {
                Ok(()) => WorkerEvent::Cleared,
                Err(e) => {
                    warn!("Cache clear failed: {}", e);
                    WorkerEvent::OpFailed(e.to_string())
                }
            };
            let _ = tx.send(event);
        });
    }

    // ========== Worker results ==========

    /// Apply every finished worker result and return what changed.
    pub fn pump(&mut self) -> Vec<SlideUpdate> {
        let mut updates = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            self.apply_event(event, &mut updates);
        }
        updates
    }

    /// Like [`pump`](Self::pump), but waits up to `timeout` for the first result.
    pub fn pump_wait(&mut self, timeout: Duration) -> Vec<SlideUpdate> {
        let mut updates = Vec::new();
        if let Ok(event) = self.events_rx.recv_timeout(timeout) {
            self.apply_event(event, &mut updates);
        }
        updates.extend(self.pump());
        updates
    }

    /// Pump until `done` sees a matching update or `timeout` passes.
    /// Returns every update applied along the way.
    pub fn pump_until<F>(&mut self, timeout: Duration, mut done: F) -> Vec<SlideUpdate>
    where
        F: FnMut(&SlideUpdate) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut all = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return all;
            }
            let batch = self.pump_wait(remaining);
            let finished = batch.iter().any(&mut done);
            all.extend(batch);
            if finished {
                return all;
            }
        }
    }

    fn schedule_display(&mut self) {
        let Some(slide) = self.slides.get(self.current_index) else {
            return;
        };
        if is_placeholder(slide.url()) {
            return;
        }
        let index = self.current_index;
        let url = slide.url().to_string();
        let resolver = self.resolver.clone();
        let tx = self.events_tx.clone();

        let epoch = self.display.bump_epoch();
        self.display.execute_with_epoch(epoch, move || {
            let resolution = resolver.resolve_detailed(&url, &CancelToken::none());
            let _ = tx.send(WorkerEvent::Resolved { index, url, resolution, display: true });
        });
    }

    /// Slide at `index` if it still carries `url` (the list may have changed
    /// while the worker ran).
    fn slide_for(&mut self, index: usize, url: &str) -> Option<&mut Slide> {
        self.slides.get_mut(index).filter(|s| s.url() == url)
    }

    fn apply_event(&mut self, event: WorkerEvent, updates: &mut Vec<SlideUpdate>) {
        match event {
            WorkerEvent::Caching { index, url } => {
                if let Some(slide) = self.slide_for(index, &url) {
                    slide.set_cache_state(CacheState::Caching);
                    slide.set_source_state(SourceState::Unknown);
                    updates.push(state_update(index, slide));
                }
            }
            WorkerEvent::Resolved { index, url, resolution, display } => {
                let current = self.current_index;
                let Some(slide) = self.slide_for(index, &url) else {
                    trace!("Dropping stale resolution for {}", url);
                    return;
                };
                apply_outcome(slide, &resolution.outcome);
                updates.push(state_update(index, slide));
                if display && index == current {
                    updates.push(SlideUpdate::Display { index, resolved: resolution.resolved });
                }
            }
            WorkerEvent::Progress { done, total } => {
                updates.push(SlideUpdate::Progress { done, total });
            }
            WorkerEvent::WarmFinished { total } => {
                info!("Cache ready ({} slides)", total);
                updates.push(SlideUpdate::WarmFinished { total });
            }
            WorkerEvent::WarmCancelled => updates.push(SlideUpdate::WarmCancelled),
            WorkerEvent::Cleared => {
                for slide in &mut self.slides {
                    slide.set_cache_state(CacheState::Unknown);
                }
                updates.push(SlideUpdate::CacheCleared);
            }
            WorkerEvent::OpFailed(message) => updates.push(SlideUpdate::CacheOpFailed { message }),
        }
    }
}

impl Drop for Presenter {
    fn drop(&mut self) {
        self.cancel_warm();
    }
}

/// Cache a single slide on the current worker and report both phases.
fn cache_one(
    resolver: &SlideResolver,
    tx: &Sender<WorkerEvent>,
    index: usize,
    url: &str,
    force_refresh: bool,
    display: bool,
    cancel: &CancelToken,
) {
    if !is_placeholder(url) && is_image_url(url) {
        let _ = tx.send(WorkerEvent::Caching { index, url: url.to_string() });
        if force_refresh {
            if let Err(e) = resolver.cache().remove_cached(url) {
                warn!("Could not drop cached copy of {}: {}", url, e);
            }
        }
    }
    let resolution = resolver.resolve_detailed(url, cancel);
    let _ = tx.send(WorkerEvent::Resolved {
        index,
        url: url.to_string(),
        resolution,
        display,
    });
}

fn apply_outcome(slide: &mut Slide, outcome: &Outcome) {
    let (cache_state, source_state) = if is_placeholder(slide.url()) {
        (CacheState::Unknown, SourceState::Unknown)
    } else {
        match outcome {
            Outcome::Cached => (CacheState::Cached, SourceState::Cache),
            Outcome::Live => (CacheState::Unknown, SourceState::Network),
            Outcome::Failed(_) => (CacheState::Failed, SourceState::Failed),
            Outcome::Cancelled => (CacheState::Unknown, SourceState::Unknown),
        }
    };
    slide.set_cache_state(cache_state);
    slide.set_source_state(source_state);
}

fn state_update(index: usize, slide: &Slide) -> SlideUpdate {
    SlideUpdate::State {
        index,
        cache_state: slide.cache_state(),
        source_state: slide.source_state(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache::{CacheError, CacheStore, Download, Fetcher};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use tempfile::TempDir;

    const WAIT: Duration = Duration::from_secs(5);

    /// Serves a GIF for every URL except ones containing "broken"
    struct GifFetcher {
        calls: Arc<AtomicUsize>,
        delay: Duration,
    }

    impl Fetcher for GifFetcher {
        fn fetch(&self, url: &str, cancel: &CancelToken) -> Result<Download, CacheError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let deadline = Instant::now() + self.delay;
            while Instant::now() < deadline {
                if cancel.is_cancelled() {
                    return Err(CacheError::Cancelled);
                }
                thread::sleep(Duration::from_millis(5));
            }
            if url.contains("broken") {
                return Err(CacheError::Download("404".into()));
            }
            Ok(Download {
                bytes: b"GIF89a".to_vec(),
                content_type: Some("image/gif".into()),
                final_url: None,
            })
        }
    }

    fn presenter_with_delay(delay: Duration) -> (TempDir, Presenter, Arc<AtomicUsize>) {
        let dir = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = GifFetcher { calls: Arc::clone(&calls), delay };
        let cache = CacheStore::new(dir.path().join("cache"), Box::new(fetcher)).unwrap();
        let presenter = Presenter::new(SlideResolver::new(Arc::new(cache)), 2);
        (dir, presenter, calls)
    }

    fn presenter() -> (TempDir, Presenter, Arc<AtomicUsize>) {
        presenter_with_delay(Duration::ZERO)
    }

    fn three(p: &mut Presenter) {
        p.set_slides(["https://a.test/1.gif", "https://a.test/page", "https://a.test/3.gif"]);
    }

    #[test]
    fn test_wraparound() {
        let (_dir, mut p, _) = presenter();
        three(&mut p);

        p.select(2);
        assert_eq!(p.next(), Transition::Navigated { index: 0 });
        assert_eq!(p.prev(), Transition::Navigated { index: 2 });
        assert_eq!(p.current_index(), 2);
    }

    #[test]
    fn test_empty_list_is_inert() {
        let (_dir, mut p, _) = presenter();
        assert_eq!(p.next(), Transition::Unchanged);
        assert_eq!(p.prev(), Transition::Unchanged);
        assert_eq!(p.play(), Transition::Unchanged);
        assert_eq!(p.mode(), Mode::Browsing);

        let status = p.status();
        assert_eq!(status.current_index, 0);
        assert_eq!(status.slide_count, 0);
        assert_eq!(status.current_url, None);
    }

    #[test]
    fn test_zoom_clamps() {
        let (_dir, mut p, _) = presenter();
        p.set_zoom(4.9);
        for _ in 0..10 {
            p.zoom_in();
            assert!(p.zoom_factor() <= ZOOM_MAX);
        }
        assert_eq!(p.zoom_factor(), ZOOM_MAX);

        p.set_zoom(0.11);
        for _ in 0..10 {
            p.zoom_out();
            assert!(p.zoom_factor() >= ZOOM_MIN);
        }
        assert_eq!(p.zoom_factor(), ZOOM_MIN);

        assert_eq!(p.zoom_reset(), Transition::Zoomed { factor: 1.0 });
    }

    #[test]
    fn test_zoom_step() {
        let (_dir, mut p, _) = presenter();
        p.zoom_in();
        assert!((p.zoom_factor() - 1.1).abs() < 1e-9);
        p.zoom_out();
        assert!((p.zoom_factor() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_play_stop_keeps_index() {
        let (_dir, mut p, _) = presenter();
        three(&mut p);
        p.select(1);

        assert_eq!(p.play(), Transition::Started { index: 1 });
        assert!(p.is_playing());
        assert_eq!(p.play(), Transition::Unchanged);

        p.next();
        assert_eq!(p.stop(), Transition::Stopped { index: 2 });
        assert_eq!(p.mode(), Mode::Browsing);
        assert_eq!(p.current_index(), 2);
        assert_eq!(p.stop(), Transition::Unchanged);
    }

    #[test]
    fn test_apply_commands_and_status() {
        let (_dir, mut p, _) = presenter();
        three(&mut p);

        p.apply(Command::Play);
        p.apply(Command::Next);
        p.apply(Command::ZoomIn);
        assert_eq!(p.apply(Command::Scroll(-200)), Transition::Scrolled { dy: -200 });

        let status = p.status();
        assert_eq!(status.current_index, 1);
        assert_eq!(status.slide_count, 3);
        assert!(status.is_playing);
        assert_eq!(status.current_url.as_deref(), Some("https://a.test/page"));
        assert!((status.zoom_factor - 1.1).abs() < 1e-9);
    }

    #[test]
    fn test_status_json_shape() {
        let status = PresentationStatus {
            current_index: 2,
            slide_count: 5,
            is_playing: true,
            current_url: None,
            zoom_factor: 1.5,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "currentIndex": 2,
                "slideCount": 5,
                "isPlaying": true,
                "currentUrl": null,
                "zoomFactor": 1.5
            })
        );
    }

    #[test]
    fn test_navigation_resolves_current_slide() {
        let (_dir, mut p, _) = presenter();
        three(&mut p);

        let updates = p.pump_until(WAIT, |u| matches!(u, SlideUpdate::Display { .. }));
        let display = updates.iter().find_map(|u| match u {
            SlideUpdate::Display { index, resolved } => Some((*index, resolved.clone())),
            _ => None,
        });
        let (index, resolved) = display.expect("no display update");
        assert_eq!(index, 0);
        assert!(resolved.is_from_cache);
        assert_eq!(p.slides()[0].source_state(), SourceState::Cache);
        assert_eq!(p.slides()[0].cache_state(), CacheState::Cached);

        p.next();
        p.pump_until(WAIT, |u| matches!(u, SlideUpdate::Display { index: 1, .. }));
        assert_eq!(p.slides()[1].source_state(), SourceState::Network);
    }

    #[test]
    fn test_failed_image_degrades_to_live() {
        let (_dir, mut p, _) = presenter();
        p.set_slides(["https://a.test/broken.png"]);

        let updates = p.pump_until(WAIT, |u| matches!(u, SlideUpdate::Display { .. }));
        let resolved = updates.iter().find_map(|u| match u {
            SlideUpdate::Display { resolved, .. } => Some(resolved.clone()),
            _ => None,
        });
        assert_eq!(resolved.unwrap().display_url, "https://a.test/broken.png");
        assert_eq!(p.slides()[0].cache_state(), CacheState::Failed);
        assert_eq!(p.slides()[0].source_state(), SourceState::Failed);
    }

    #[test]
    fn test_warm_all_in_order_with_progress() {
        let (_dir, mut p, calls) = presenter();
        three(&mut p);
        p.pump_until(WAIT, |u| matches!(u, SlideUpdate::Display { .. }));

        p.warm_all(false);
        let updates = p.pump_until(WAIT, |u| matches!(u, SlideUpdate::WarmFinished { .. }));

        let progress: Vec<(usize, usize)> = updates
            .iter()
            .filter_map(|u| match u {
                SlideUpdate::Progress { done, total } => Some((*done, *total)),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![(1, 3), (2, 3), (3, 3)]);
        assert!(updates.contains(&SlideUpdate::WarmFinished { total: 3 }));
        assert_eq!(p.slides()[2].cache_state(), CacheState::Cached);
        assert_eq!(p.slides()[1].source_state(), SourceState::Network);
        // Slide 1 was cached by the display resolution; only slide 3 downloads
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_warm_all_force_refresh_downloads_again() {
        let (_dir, mut p, calls) = presenter();
        p.set_slides(["https://a.test/1.gif"]);
        p.pump_until(WAIT, |u| matches!(u, SlideUpdate::Display { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        p.warm_all(true);
        let updates = p.pump_until(WAIT, |u| matches!(u, SlideUpdate::WarmFinished { .. }));
        assert!(updates.iter().any(|u| matches!(
            u,
            SlideUpdate::State { index: 0, cache_state: CacheState::Caching, .. }
        )));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_new_batch_cancels_previous() {
        let (_dir, mut p, _) = presenter_with_delay(Duration::from_millis(150));
        p.set_slides((0..10).map(|i| format!("https://a.test/{}.gif", i)));

        p.warm_all(false);
        thread::sleep(Duration::from_millis(50));
        p.warm_all(false);

        let updates = p.pump_until(Duration::from_secs(10), |u| {
            matches!(u, SlideUpdate::WarmFinished { .. })
        });
        let cancelled = updates.iter().position(|u| *u == SlideUpdate::WarmCancelled);
        let finished = updates.iter().position(|u| *u == SlideUpdate::WarmFinished { total: 10 });
        assert!(cancelled.is_some());
        assert!(cancelled < finished);
        assert!(p.slides().iter().all(|s| s.cache_state() == CacheState::Cached));
    }

    #[test]
    fn test_cancel_warm_is_not_an_error() {
        let (_dir, mut p, _) = presenter_with_delay(Duration::from_millis(100));
        p.set_slides((0..5).map(|i| format!("https://a.test/{}.gif", i)));

        p.warm_all(false);
        thread::sleep(Duration::from_millis(30));
        p.cancel_warm();

        let updates = p.pump_until(WAIT, |u| *u == SlideUpdate::WarmCancelled);
        assert!(updates.contains(&SlideUpdate::WarmCancelled));
        assert!(!updates.iter().any(|u| matches!(u, SlideUpdate::CacheOpFailed { .. })));
        assert!(!p.slides().iter().any(|s| s.cache_state() == CacheState::Failed));
    }

    #[test]
    fn test_reload_and_clear() {
        let (_dir, mut p, calls) = presenter();
        p.set_slides(["https://a.test/1.gif"]);
        p.pump_until(WAIT, |u| matches!(u, SlideUpdate::Display { .. }));

        p.reload(0);
        p.pump_until(WAIT, |u| matches!(u, SlideUpdate::Display { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(p.slides()[0].cache_state(), CacheState::Cached);

        p.clear_cache();
        p.pump_until(WAIT, |u| *u == SlideUpdate::CacheCleared);
        assert_eq!(p.slides()[0].cache_state(), CacheState::Unknown);
        assert!(p.resolver.cache().try_get_cached_path("https://a.test/1.gif").is_none());
    }

    #[test]
    fn test_list_editing_renumbers() {
        let (_dir, mut p, _) = presenter();
        three(&mut p);
        p.select(1);

        p.insert(0, "https://a.test/0.gif");
        assert_eq!(p.current_index(), 2);
        assert_eq!(p.current().unwrap().url(), "https://a.test/page");

        p.move_slide(2, 0);
        assert_eq!(p.current_index(), 0);
        assert_eq!(p.slides()[0].url(), "https://a.test/page");

        p.remove(0);
        assert_eq!(p.current_index(), 0);
        let positions: Vec<usize> = p.slides().iter().map(Slide::position).collect();
        assert_eq!(positions, vec![1, 2, 3]);

        p.select(2);
        p.remove(2);
        assert_eq!(p.current_index(), 1);
    }

    #[test]
    fn test_set_url_resets_state() {
        let (_dir, mut p, _) = presenter();
        p.set_slides(["https://a.test/1.gif"]);
        p.pump_until(WAIT, |u| matches!(u, SlideUpdate::Display { .. }));
        assert_eq!(p.slides()[0].cache_state(), CacheState::Cached);

        assert!(p.set_url(0, "https://a.test/other"));
        assert_eq!(p.slides()[0].cache_state(), CacheState::Unknown);
        assert_eq!(p.urls(), vec!["https://a.test/other".to_string()]);
    }

    #[test]
    fn test_stale_resolution_is_dropped() {
        let (_dir, mut p, _) = presenter_with_delay(Duration::from_millis(100));
        p.set_slides(["https://a.test/1.gif"]);
        // URL changes before the worker reports back
        p.set_url(0, "https://a.test/page");

        let updates = p.pump_until(WAIT, |u| {
            matches!(u, SlideUpdate::State { source_state: SourceState::Network, .. })
        });
        assert!(!updates.iter().any(|u| matches!(
            u,
            SlideUpdate::State { cache_state: CacheState::Cached, .. }
        )));
        assert_eq!(p.slides()[0].source_state(), SourceState::Network);
    }
}
