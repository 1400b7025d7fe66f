//! presto - slideshow presenter library
//!
//! Re-exports all modules for use by the host binary.

// Core engine (cache, resolver, presenter, workers)
pub mod core;

// Host modules
pub mod cli;
pub mod paths;
pub mod persist;
pub mod server;

// Re-export commonly used types from core
pub use crate::core::cache::{CacheError, CacheStore, HttpFetcher};
pub use crate::core::presenter::{Command, PresentationStatus, Presenter, SlideUpdate};
pub use crate::core::resolver::SlideResolver;
