//! Slide list and theme persistence.
//!
//! The slide list is a flat text file, one URL per line. Loading trims lines
//! and drops blank ones; saving writes one URL per line. The theme is a single
//! lowercase word in its own file.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::paths::PathConfig;

/// Parse slide list text: trimmed, blank lines dropped.
pub fn parse_slides(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn load_from(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read slide list: {}", path.display()))?;
    let urls = parse_slides(&text);
    info!("Loaded {} slides from {}", urls.len(), path.display());
    Ok(urls)
}

pub fn save_to(path: &Path, urls: &[String]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let mut text = String::new();
    for url in urls {
        text.push_str(url);
        text.push('\n');
    }
    fs::write(path, text)
        .with_context(|| format!("Failed to write slide list: {}", path.display()))?;
    debug!("Saved {} slides to {}", urls.len(), path.display());
    Ok(())
}

/// Slides from the storage root; a missing file is an empty list.
pub fn load_default(config: &PathConfig) -> Result<Vec<String>> {
    let path = config.slides_file();
    if !path.exists() {
        debug!("No saved slides at {}", path.display());
        return Ok(Vec::new());
    }
    load_from(&path)
}

pub fn save_default(config: &PathConfig, urls: &[String]) -> Result<()> {
    save_to(&config.slides_file(), urls)
}

/// Window theme choice persisted next to the slide list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThemePreference {
    #[default]
    System,
    Light,
    Dark,
}

impl ThemePreference {
    pub fn as_str(self) -> &'static str {
        match self {
            ThemePreference::System => "system",
            ThemePreference::Light => "light",
            ThemePreference::Dark => "dark",
        }
    }
}

impl fmt::Display for ThemePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThemePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" => Ok(ThemePreference::System),
            "light" => Ok(ThemePreference::Light),
            "dark" => Ok(ThemePreference::Dark),
            other => Err(format!("unknown theme '{}'", other)),
        }
    }
}

/// Missing, unreadable or unknown values load as `System`.
pub fn load_theme(config: &PathConfig) -> ThemePreference {
    let path = config.theme_file();
    let Ok(text) = fs::read_to_string(&path) else {
        return ThemePreference::System;
    };
    text.parse().unwrap_or_else(|e| {
        warn!("{} in {}, using system theme", e, path.display());
        ThemePreference::System
    })
}

pub fn save_theme(config: &PathConfig, theme: ThemePreference) -> Result<()> {
    config.ensure_dirs()?;
    let path = config.theme_file();
    fs::write(&path, theme.as_str())
        .with_context(|| format!("Failed to write theme: {}", path.display()))
}
