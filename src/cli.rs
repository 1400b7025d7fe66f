use clap::Parser;
use std::path::PathBuf;

use crate::server::DEFAULT_PORT;

/// Slideshow presenter with phone remote control
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Slide list to present (one URL per line). Defaults to the saved list.
    #[arg(value_name = "SLIDES")]
    pub slides: Option<PathBuf>,

    /// Remote control port
    #[arg(short = 'p', long = "port", value_name = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Do not start the remote control server
    #[arg(long = "no-remote")]
    pub no_remote: bool,

    /// Custom data directory for slides, theme and image cache
    #[arg(short = 'd', long = "data-dir", value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Worker threads resolving slides (default: half the CPU cores, min 2)
    #[arg(long = "workers", value_name = "N")]
    pub workers: Option<usize>,

    /// Download timeout in seconds
    #[arg(long = "timeout", value_name = "SECS", default_value_t = 30)]
    pub timeout: u64,

    /// Cache every slide on startup
    #[arg(short = 'w', long = "warm")]
    pub warm: bool,

    /// Start presenting immediately
    #[arg(short = 'a', long = "autoplay")]
    pub autoplay: bool,

    /// Enable debug logging to file (default: presto.log)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,
}

impl Args {
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| num_cpus::get() / 2).max(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["presto"]).unwrap();
        assert_eq!(args.port, 9123);
        assert!(!args.no_remote);
        assert_eq!(args.timeout, 30);
        assert!(args.slides.is_none());
        assert!(args.log_file.is_none());
        assert!(args.worker_count() >= 2);
    }

    #[test]
    fn test_flags() {
        let args = Args::try_parse_from([
            "presto", "deck.txt", "--port", "8000", "--no-remote", "-d", "/tmp/p",
            "--workers", "1", "-vv", "--log",
        ])
        .unwrap();
        assert_eq!(args.slides, Some(PathBuf::from("deck.txt")));
        assert_eq!(args.port, 8000);
        assert!(args.no_remote);
        assert_eq!(args.data_dir, Some(PathBuf::from("/tmp/p")));
        assert_eq!(args.worker_count(), 2);
        assert_eq!(args.verbosity, 2);
        assert_eq!(args.log_file, Some(None));
    }
}
