use presto::cli::Args;
use presto::core::cache::{CacheStore, HttpFetcher};
use presto::core::presenter::{Command, Presenter, SlideUpdate, Transition};
use presto::core::resolver::SlideResolver;
use presto::paths::PathConfig;
use presto::persist;
use presto::server::{ChannelHandler, RemoteControl, SharedStatus};

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{Receiver, Sender, never, select, unbounded};
use log::{debug, error, info, warn};
use std::io::BufRead;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Host loop tick while idle
const TICK: Duration = Duration::from_millis(50);

/// Commands typed on the console
#[derive(Debug, Clone, PartialEq)]
enum ConsoleCommand {
    Control(Command),
    Select(usize),
    Add(String),
    Remove(usize),
    Warm { force: bool },
    CancelWarm,
    Reload(usize),
    ClearCache,
    List,
    Save,
    Help,
    Quit,
}

const CONSOLE_HELP: &str = "\
commands:
  n | next          p | prev          play | stop
  + | zoomin        - | zoomout       0 | zoomreset
  scroll <dy>       goto <n>          add <url>        rm <n>
  warm              rewarm            cancel           reload <n>
  clear             list              save             quit";

fn parse_console(line: &str) -> Option<ConsoleCommand> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((w, r)) => (w, r.trim()),
        None => (line, ""),
    };
    // Slide numbers on the console are 1-based
    let slide_no = |s: &str| s.parse::<usize>().ok().filter(|n| *n > 0).map(|n| n - 1);

    let cmd = match word.to_ascii_lowercase().as_str() {
        "n" | "next" => ConsoleCommand::Control(Command::Next),
        "p" | "prev" => ConsoleCommand::Control(Command::Prev),
        "play" => ConsoleCommand::Control(Command::Play),
        "stop" => ConsoleCommand::Control(Command::Stop),
        "+" | "zoomin" => ConsoleCommand::Control(Command::ZoomIn),
        "-" | "zoomout" => ConsoleCommand::Control(Command::ZoomOut),
        "0" | "zoomreset" => ConsoleCommand::Control(Command::ZoomReset),
        "scroll" => ConsoleCommand::Control(Command::Scroll(rest.parse().ok()?)),
        "goto" => ConsoleCommand::Select(slide_no(rest)?),
        "add" if !rest.is_empty() => ConsoleCommand::Add(rest.to_string()),
        "rm" => ConsoleCommand::Remove(slide_no(rest)?),
        "warm" => ConsoleCommand::Warm { force: false },
        "rewarm" => ConsoleCommand::Warm { force: true },
        "cancel" => ConsoleCommand::CancelWarm,
        "reload" => ConsoleCommand::Reload(slide_no(rest)?),
        "clear" => ConsoleCommand::ClearCache,
        "list" | "ls" => ConsoleCommand::List,
        "save" => ConsoleCommand::Save,
        "help" | "?" => ConsoleCommand::Help,
        "q" | "quit" | "exit" => ConsoleCommand::Quit,
        _ => return None,
    };
    Some(cmd)
}

fn spawn_console(tx: Sender<ConsoleCommand>) {
    let spawned = thread::Builder::new()
        .name("presto-console".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_console(&line) {
                    Some(cmd) => {
                        if tx.send(cmd).is_err() {
                            break;
                        }
                    }
                    None => println!("unknown command: {} (try 'help')", line.trim()),
                }
            }
            debug!("Console input closed");
        });
    if let Err(e) = spawned {
        warn!("Console disabled: {}", e);
    }
}

fn init_logging(args: &Args, path_config: &PathConfig) -> Result<()> {
    // 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
    let log_level = match args.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    if let Some(log_path_opt) = &args.log_file {
        let log_path = log_path_opt
            .clone()
            .unwrap_or_else(|| path_config.root().join("presto.log"));
        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file: {}", log_path.display()))?;

        env_logger::Builder::new()
            .filter_level(log_level)
            .filter_module("rouille", log::LevelFilter::Warn)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();

        info!("Logging to file: {} (level: {:?})", log_path.display(), log_level);
    } else {
        // Console logging (respects RUST_LOG if set)
        let default_level = match args.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .filter_module("rouille", log::LevelFilter::Warn)
            .format_timestamp_millis()
            .init();
    }
    Ok(())
}

/// Owns the presenter and everything that feeds it
struct Host {
    presenter: Presenter,
    status: Arc<SharedStatus>,
    path_config: PathConfig,
    dirty: bool,
    /// Loop passes, for the exit log
    iterations: u64,
}

impl Host {
    fn publish(&self) {
        self.status.publish(self.presenter.status());
    }

    fn control(&mut self, cmd: Command) {
        match self.presenter.apply(cmd) {
            Transition::Unchanged => debug!("{:?}: nothing to do", cmd),
            Transition::Navigated { index } => debug!("Selected slide {}", index + 1),
            Transition::Started { index } => println!("presenting from slide {}", index + 1),
            Transition::Stopped { index } => println!("stopped at slide {}", index + 1),
            Transition::Zoomed { factor } => println!("zoom {:.0}%", factor * 100.0),
            Transition::Scrolled { dy } => println!("scroll {:+}px", dy),
        }
    }

    /// Returns false when the host should exit.
    fn console(&mut self, cmd: ConsoleCommand) -> bool {
        match cmd {
            ConsoleCommand::Control(c) => self.control(c),
            ConsoleCommand::Select(i) => self.control_select(i),
            ConsoleCommand::Add(url) => {
                let at = self.presenter.insert(self.presenter.len(), url);
                println!("added slide {}", at + 1);
                self.dirty = true;
            }
            ConsoleCommand::Remove(i) => match self.presenter.remove(i) {
                Some(slide) => {
                    println!("removed {}", slide.url());
                    self.dirty = true;
                }
                None => println!("no slide {}", i + 1),
            },
            ConsoleCommand::Warm { force } => self.presenter.warm_all(force),
            ConsoleCommand::CancelWarm => self.presenter.cancel_warm(),
            ConsoleCommand::Reload(i) => {
                if !self.presenter.reload(i) {
                    println!("no slide {}", i + 1);
                }
            }
            ConsoleCommand::ClearCache => self.presenter.clear_cache(),
            ConsoleCommand::List => self.print_list(),
            ConsoleCommand::Save => self.save(),
            ConsoleCommand::Help => println!("{}", CONSOLE_HELP),
            ConsoleCommand::Quit => return false,
        }
        self.publish();
        true
    }

    fn control_select(&mut self, index: usize) {
        if let Transition::Navigated { index } = self.presenter.select(index) {
            debug!("Selected slide {}", index + 1);
        }
    }

    fn print_list(&self) {
        let current = self.presenter.current_index();
        for (i, slide) in self.presenter.slides().iter().enumerate() {
            let marker = if i == current { '>' } else { ' ' };
            println!("{} {:>3}. {:<8} {}", marker, slide.position(), slide.summary(), slide.url());
        }
    }

    fn on_update(&mut self, update: SlideUpdate) {
        match update {
            SlideUpdate::Display { index, resolved } => {
                let source = if resolved.is_from_cache { "cache" } else { "live" };
                println!(
                    "[{}/{}] {} ({}, zoom {:.0}%{})",
                    index + 1,
                    self.presenter.len(),
                    resolved.display_url,
                    source,
                    self.presenter.zoom_factor() * 100.0,
                    if self.presenter.is_playing() { ", presenting" } else { "" },
                );
            }
            SlideUpdate::State { index, cache_state, source_state } => {
                debug!("Slide {}: cache {:?}, source {:?}", index + 1, cache_state, source_state);
            }
            SlideUpdate::Progress { done, total } => info!("Caching {}/{}", done, total),
            SlideUpdate::WarmFinished { total } => println!("cached {} slides", total),
            SlideUpdate::WarmCancelled => println!("caching cancelled"),
            SlideUpdate::CacheCleared => println!("cache cleared"),
            SlideUpdate::CacheOpFailed { message } => error!("Cache operation failed: {}", message),
        }
    }

    fn save(&mut self) {
        match persist::save_default(&self.path_config, &self.presenter.urls()) {
            Ok(()) => {
                self.dirty = false;
                info!("Slides saved to {}", self.path_config.slides_file().display());
            }
            Err(e) => error!("{:#}", e),
        }
    }

    /// Apply commands until `quit` or until both command sources are gone.
    /// A disconnected source is swapped for `never()` so `select!` falls back
    /// to the tick instead of spinning on it.
    fn run(&mut self, mut remote_rx: Receiver<Command>, mut console_rx: Receiver<ConsoleCommand>) {
        self.publish();
        let mut remote_open = true;
        let mut console_open = true;
        while remote_open || console_open {
            self.iterations += 1;
            let (mut remote_closed, mut console_closed) = (false, false);
            select! {
                recv(remote_rx) -> msg => match msg {
                    Ok(cmd) => {
                        debug!("Remote: {:?}", cmd);
                        self.control(cmd);
                        self.publish();
                    }
                    Err(_) => {
                        debug!("Remote command channel closed");
                        remote_closed = true;
                    }
                },
                recv(console_rx) -> msg => match msg {
                    Ok(cmd) => {
                        if !self.console(cmd) {
                            break;
                        }
                    }
                    Err(_) => {
                        debug!("Console command channel closed");
                        console_closed = true;
                    }
                },
                default(TICK) => {}
            }
            if remote_closed {
                remote_rx = never();
                remote_open = false;
            }
            if console_closed {
                console_rx = never();
                console_open = false;
            }
            for update in self.presenter.pump() {
                self.on_update(update);
            }
        }
        if !remote_open && !console_open {
            info!("No command sources left");
        }
        debug!("Host loop exited after {} iterations", self.iterations);
        if self.dirty {
            self.save();
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let path_config = PathConfig::from_env_and_cli(args.data_dir.clone());
    if let Err(e) = path_config.ensure_dirs() {
        eprintln!("Warning: {:#}", e);
    }
    init_logging(&args, &path_config)?;

    info!("presto {} starting...", env!("CARGO_PKG_VERSION"));
    debug!("Command-line args: {:?}", args);
    info!("Data path: {}", path_config.root().display());

    let urls = match &args.slides {
        Some(path) => persist::load_from(path)?,
        None => persist::load_default(&path_config).unwrap_or_else(|e| {
            warn!("{:#}", e);
            Vec::new()
        }),
    };
    debug!("Theme: {}", persist::load_theme(&path_config));

    let fetcher = HttpFetcher::new(Duration::from_secs(args.timeout.max(1)));
    let cache = CacheStore::new(path_config.cache_dir(), Box::new(fetcher))
        .with_context(|| format!("Failed to open cache in {}", path_config.cache_dir().display()))?;
    let resolver = SlideResolver::new(Arc::new(cache));

    let mut presenter = Presenter::new(resolver, args.worker_count());
    presenter.set_slides(urls);
    if args.warm {
        presenter.warm_all(false);
    }
    if args.autoplay {
        presenter.play();
    }

    let status = Arc::new(SharedStatus::new());
    let (remote_tx, remote_rx) = unbounded();
    let mut remote = None;
    if !args.no_remote {
        let handler = Arc::new(ChannelHandler::new(remote_tx, Arc::clone(&status)));
        let mut rc = RemoteControl::on_port(args.port, handler);
        match rc.start() {
            Ok(addr) => {
                println!("remote control: http://{}:{}/", local_host_hint(), addr.port());
                remote = Some(rc);
            }
            Err(e) => warn!("Remote control unavailable: {}", e),
        }
    }

    let (console_tx, console_rx) = unbounded();
    spawn_console(console_tx);
    println!("{} slides loaded, type 'help' for commands", presenter.len());

    let mut host = Host {
        presenter,
        status,
        path_config,
        dirty: false,
        iterations: 0,
    };
    host.run(remote_rx, console_rx);

    if let Some(mut rc) = remote {
        rc.stop();
    }
    info!("presto exiting");
    Ok(())
}

/// Hostname to print in the remote URL
fn local_host_hint() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}
