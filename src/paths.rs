use anyhow::{Context, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Environment variable overriding the storage root
pub const DATA_DIR_ENV: &str = "PRESTO_DATA_DIR";

pub const SLIDES_FILE: &str = "slides.txt";
pub const THEME_FILE: &str = "theme.txt";

/// Storage root for the slide list, theme and image cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathConfig {
    root: PathBuf,
}

impl PathConfig {
    /// Create PathConfig from CLI arguments and environment variables
    ///
    /// Priority: CLI `--data-dir` → ENV var (PRESTO_DATA_DIR) → platform data
    /// directory + `presto` → `.`
    pub fn from_env_and_cli(cli_dir: Option<PathBuf>) -> Self {
        Self::from_sources(cli_dir, std::env::var_os(DATA_DIR_ENV))
    }

    /// Explicit root, no lookup
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn from_sources(cli_dir: Option<PathBuf>, env_dir: Option<OsString>) -> Self {
        let root = cli_dir
            .or_else(|| env_dir.filter(|v| !v.is_empty()).map(PathBuf::from))
            .unwrap_or_else(platform_data_dir);
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/slides.txt`
    pub fn slides_file(&self) -> PathBuf {
        self.root.join(SLIDES_FILE)
    }

    /// `<root>/theme.txt`
    pub fn theme_file(&self) -> PathBuf {
        self.root.join(THEME_FILE)
    }

    /// Cache root handed to `CacheStore`; images land in `<root>/cache/images`.
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    /// Create the storage root if it does not exist yet.
    pub fn ensure_dirs(&self) -> Result<()> {
        if !self.root.exists() {
            std::fs::create_dir_all(&self.root).with_context(|| {
                format!("Failed to create data directory: {}", self.root.display())
            })?;
        }
        Ok(())
    }
}

/// Platform paths:
/// - Linux: ~/.local/share/presto
/// - macOS: ~/Library/Application Support/presto
/// - Windows: %APPDATA%\presto
fn platform_data_dir() -> PathBuf {
    match dirs_next::data_dir() {
        Some(dir) => dir.join("presto"),
        // Fallback: "." if everything else fails
        None => PathBuf::from("."),
    }
}
