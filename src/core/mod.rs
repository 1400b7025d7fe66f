//! Core engine modules - cache, resolver, presenter, workers
//!
//! These modules form the presentation engine, independent of any renderer.

pub mod cache;
pub mod cancel;
pub mod presenter;
pub mod resolver;
pub mod slide;
pub mod workers;

// Re-exports for convenience
pub use cache::{CacheError, CacheStore, Fetcher, HttpFetcher};
pub use cancel::CancelToken;
pub use presenter::{Command, Mode, PresentationStatus, Presenter, SlideUpdate, Transition};
pub use resolver::{Resolved, SlideResolver};
pub use slide::{CacheState, Slide, SourceState};
pub use workers::Workers;
