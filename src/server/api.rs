//! Remote control HTTP service using rouille.
//!
//! # Key types
//!
//! - [`RemoteControl`] - listener lifecycle (start/stop/local_addr)
//! - [`RemoteHandler`] - what a request talks to: one command in, status out
//! - [`ChannelHandler`] - default handler, forwards commands to the host thread
//! - [`SharedStatus`] - status snapshot the host publishes after each command
//!
//! # Thread safety
//!
//! - Handlers run on rouille's request pool; the accept loop runs on its own
//!   thread and only polls for the stop signal between connections
//! - `SharedStatus` is a versioned snapshot behind a mutex + condvar: host
//!   writes, HTTP handlers read
//! - CORS header added to every response

use crossbeam_channel::Sender;
use log::{debug, info, trace, warn};
use rouille::{Request, Response};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, mpsc};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::core::presenter::{Command, PresentationStatus};

/// Port used when none is configured
pub const DEFAULT_PORT: u16 = 9123;

/// How long [`ChannelHandler`] waits for the host to apply a command
const APPLY_WAIT: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("cannot bind remote control to {addr}: {reason}")]
    Bind { addr: SocketAddr, reason: String },
}

/// Receiver of remote commands.
///
/// Called from HTTP worker threads, so implementations must be thread-safe.
pub trait RemoteHandler: Send + Sync {
    fn on_command(&self, command: Command);
    fn status(&self) -> PresentationStatus;
}

/// Status snapshot shared between the host thread and HTTP handlers
#[derive(Debug, Default)]
pub struct SharedStatus {
    inner: Mutex<(u64, PresentationStatus)>,
    changed: Condvar,
}

impl SharedStatus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, (u64, PresentationStatus)> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Replace the snapshot and wake handlers waiting for it.
    pub fn publish(&self, status: PresentationStatus) {
        let mut guard = self.lock();
        guard.0 += 1;
        guard.1 = status;
        self.changed.notify_all();
    }

    pub fn get(&self) -> PresentationStatus {
        self.lock().1.clone()
    }

    pub fn version(&self) -> u64 {
        self.lock().0
    }

    /// Block until a snapshot newer than `seen` is published or `timeout` passes.
    pub fn wait_newer(&self, seen: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock();
        while guard.0 <= seen {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            guard = match self.changed.wait_timeout(guard, remaining) {
                Ok((g, _)) => g,
                Err(p) => p.into_inner().0,
            };
        }
        true
    }
}

/// Forwards commands over a channel to the thread that owns the presenter.
///
/// `on_command` waits briefly for the host to publish a fresh snapshot so
/// the JSON reply reflects the command.
pub struct ChannelHandler {
    tx: Sender<Command>,
    status: Arc<SharedStatus>,
}

impl ChannelHandler {
    pub fn new(tx: Sender<Command>, status: Arc<SharedStatus>) -> Self {
        Self { tx, status }
    }
}

impl RemoteHandler for ChannelHandler {
    fn on_command(&self, command: Command) {
        let seen = self.status.version();
        if self.tx.send(command).is_err() {
            warn!("Remote command {:?} dropped: host is gone", command);
            return;
        }
        if !self.status.wait_newer(seen, APPLY_WAIT) {
            trace!("Host did not publish status for {:?} in time", command);
        }
    }

    fn status(&self) -> PresentationStatus {
        self.status.get()
    }
}

/// Generic error body
#[derive(Serialize)]
struct ApiError {
    error: &'static str,
}

struct Running {
    addr: SocketAddr,
    handle: JoinHandle<()>,
    stop_tx: mpsc::Sender<()>,
}

/// Embedded remote control listener
pub struct RemoteControl {
    bind_addr: SocketAddr,
    handler: Arc<dyn RemoteHandler>,
    running: Option<Running>,
    /// Accept loop of the last stopped server, joined before rebinding
    winding_down: Option<JoinHandle<()>>,
}

impl RemoteControl {
    pub fn new(bind_addr: SocketAddr, handler: Arc<dyn RemoteHandler>) -> Self {
        Self {
            bind_addr,
            handler,
            running: None,
            winding_down: None,
        }
    }

    /// Listen on all interfaces at `port`.
    pub fn on_port(port: u16, handler: Arc<dyn RemoteHandler>) -> Self {
        Self::new(SocketAddr::from(([0, 0, 0, 0], port)), handler)
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Address actually bound, while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.addr)
    }

    /// Start listening. A no-op returning the current address if already running.
    pub fn start(&mut self) -> Result<SocketAddr, ServerError> {
        if let Some(running) = &self.running {
            return Ok(running.addr);
        }
        if let Some(previous) = self.winding_down.take() {
            debug!("Waiting for previous accept loop to exit");
            let _ = previous.join();
        }

        let handler = Arc::clone(&self.handler);
        let server = rouille::Server::new(self.bind_addr, move |request| {
            handle_request(request, handler.as_ref())
        })
        .map_err(|e| ServerError::Bind {
            addr: self.bind_addr,
            reason: e.to_string(),
        })?;

        let addr = server.server_addr();
        let (handle, stop_tx) = server.stoppable();
        info!("Remote control listening on http://{}", addr);
        self.running = Some(Running { addr, handle, stop_tx });
        Ok(addr)
    }

    /// Signal the accept loop to exit. Returns without waiting for it or for
    /// requests still being handled.
    pub fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.stop_tx.send(());
            info!("Remote control on {} stopped", running.addr);
            self.winding_down = Some(running.handle);
        }
    }
}

impl Drop for RemoteControl {
    fn drop(&mut self) {
        self.stop();
    }
}

fn handle_request(request: &Request, handler: &dyn RemoteHandler) -> Response {
    trace!("{} {}", request.method(), request.url());

    let response = rouille::router!(request,
        (GET) ["/"] => {
            Response::html(CONTROL_PAGE)
        },
        (GET) ["/status"] => {
            Response::json(&handler.status())
        },
        (GET) ["/next"] => {
            command(handler, Command::Next)
        },
        (GET) ["/prev"] => {
            command(handler, Command::Prev)
        },
        (GET) ["/play"] => {
            command(handler, Command::Play)
        },
        (GET) ["/stop"] => {
            command(handler, Command::Stop)
        },
        (GET) ["/zoomin"] => {
            command(handler, Command::ZoomIn)
        },
        (GET) ["/zoomout"] => {
            command(handler, Command::ZoomOut)
        },
        (GET) ["/scroll"] => {
            // Missing or malformed dy still answers with status
            match request.get_param("dy").and_then(|v| v.trim().parse::<i32>().ok()) {
                Some(dy) => command(handler, Command::Scroll(dy)),
                None => Response::json(&handler.status()),
            }
        },
        _ => {
            Response::json(&ApiError { error: "Not found" }).with_status_code(404)
        }
    );

    response.with_additional_header("Access-Control-Allow-Origin", "*")
}

fn command(handler: &dyn RemoteHandler, cmd: Command) -> Response {
    handler.on_command(cmd);
    Response::json(&handler.status())
}

const CONTROL_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1, user-scalable=no">
<title>presto remote</title>
<style>
body { font-family: sans-serif; background: #111; color: #eee; margin: 0; padding: 16px; }
#counter { font-size: 2em; text-align: center; margin: 12px 0; }
#url { font-size: 0.8em; color: #999; text-align: center; word-break: break-all; min-height: 2em; }
.row { display: flex; gap: 8px; margin: 8px 0; }
button { flex: 1; font-size: 1.4em; padding: 18px 0; border: 0; border-radius: 8px; background: #333; color: #eee; }
button:active { background: #555; }
</style>
</head>
<body>
<div id="counter">-</div>
<div id="url"></div>
<div class="row"><button onclick="send('prev')">&#9664; Prev</button><button onclick="send('next')">Next &#9654;</button></div>
<div class="row"><button onclick="send('play')">Play</button><button onclick="send('stop')">Stop</button></div>
<div class="row"><button onclick="send('zoomout')">Zoom -</button><button onclick="send('zoomin')">Zoom +</button></div>
<div class="row"><button onclick="send('scroll?dy=-200')">Scroll up</button><button onclick="send('scroll?dy=200')">Scroll down</button></div>
<script>
function show(s) {
  document.getElementById('counter').textContent =
    s.slideCount ? (s.currentIndex + 1) + ' / ' + s.slideCount + (s.isPlaying ? ' ▶' : '') : 'no slides';
  document.getElementById('url').textContent =
    (s.currentUrl || '') + '  (' + Math.round(s.zoomFactor * 100) + '%)';
}
function send(path) {
  fetch('/' + path).then(r => r.json()).then(show).catch(() => {});
}
send('status');
setInterval(() => send('status'), 2000);
</script>
</body>
</html>
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    /// Records commands and optionally sleeps inside the callback
    #[derive(Default)]
    struct Recorder {
        commands: Mutex<Vec<Command>>,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl RemoteHandler for Recorder {
        fn on_command(&self, command: Command) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
            self.commands.lock().unwrap().push(command);
        }

        fn status(&self) -> PresentationStatus {
            PresentationStatus {
                current_index: 1,
                slide_count: 3,
                is_playing: false,
                current_url: Some("https://example.com/b.png".into()),
                zoom_factor: 1.0,
            }
        }
    }

    fn local() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    fn serve(handler: Arc<Recorder>) -> (RemoteControl, String) {
        let mut rc = RemoteControl::new(local(), handler);
        let addr = rc.start().unwrap();
        (rc, format!("http://{}", addr))
    }

    fn agent() -> ureq::Agent {
        ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(Duration::from_secs(5)))
            .build()
            .into()
    }

    fn get(url: &str) -> (u16, Option<String>, String) {
        let mut resp = agent().get(url).call().unwrap();
        let status = resp.status().as_u16();
        let cors = resp
            .headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.body_mut().read_to_string().unwrap();
        (status, cors, body)
    }

    #[test]
    fn test_control_route_forwards_and_returns_status() {
        let rec = Arc::new(Recorder::default());
        let (_rc, base) = serve(Arc::clone(&rec));

        let (status, cors, body) = get(&format!("{}/next", base));
        assert_eq!(status, 200);
        assert_eq!(cors.as_deref(), Some("*"));
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["currentIndex"], 1);
        assert_eq!(json["slideCount"], 3);
        assert_eq!(json["currentUrl"], "https://example.com/b.png");
        assert_eq!(*rec.commands.lock().unwrap(), vec![Command::Next]);
    }

    #[test]
    fn test_every_control_route_maps_to_one_command() {
        let rec = Arc::new(Recorder::default());
        let (_rc, base) = serve(Arc::clone(&rec));

        for path in ["prev", "play", "stop", "zoomin", "zoomout"] {
            get(&format!("{}/{}", base, path));
        }
        assert_eq!(
            *rec.commands.lock().unwrap(),
            vec![Command::Prev, Command::Play, Command::Stop, Command::ZoomIn, Command::ZoomOut]
        );
    }

    #[test]
    fn test_scroll_param_parsing() {
        let rec = Arc::new(Recorder::default());
        let (_rc, base) = serve(Arc::clone(&rec));

        let (status, _, _) = get(&format!("{}/scroll", base));
        assert_eq!(status, 200);
        let (status, _, _) = get(&format!("{}/scroll?dy=lots", base));
        assert_eq!(status, 200);
        assert_eq!(rec.calls.load(Ordering::SeqCst), 0);

        get(&format!("{}/scroll?dy=-200", base));
        assert_eq!(*rec.commands.lock().unwrap(), vec![Command::Scroll(-200)]);
    }

    #[test]
    fn test_status_and_page_do_not_call_handler() {
        let rec = Arc::new(Recorder::default());
        let (_rc, base) = serve(Arc::clone(&rec));

        let (status, _, body) = get(&format!("{}/status", base));
        assert_eq!(status, 200);
        assert!(body.contains("\"zoomFactor\":1.0"));

        let (status, _, body) = get(&format!("{}/", base));
        assert_eq!(status, 200);
        assert!(body.contains("<!DOCTYPE html>"));
        assert_eq!(rec.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unknown_path_is_404_with_cors() {
        let rec = Arc::new(Recorder::default());
        let (_rc, base) = serve(Arc::clone(&rec));

        let (status, cors, body) = get(&format!("{}/reboot", base));
        assert_eq!(status, 404);
        assert_eq!(cors.as_deref(), Some("*"));
        assert!(body.contains("Not found"));
        assert_eq!(rec.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stop_does_not_wait_for_slow_handler() {
        let rec = Arc::new(Recorder {
            delay: Duration::from_millis(1500),
            ..Default::default()
        });
        let (mut rc, base) = serve(Arc::clone(&rec));

        let url = format!("{}/next", base);
        let client = thread::spawn(move || {
            let _ = agent().get(&url).call();
        });
        let deadline = Instant::now() + Duration::from_secs(2);
        while rec.calls.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(rec.calls.load(Ordering::SeqCst), 1);

        let started = Instant::now();
        rc.stop();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(!rc.is_running());
        let _ = client.join();
    }

    #[test]
    fn test_start_stop_idempotent() {
        let rec = Arc::new(Recorder::default());
        let mut rc = RemoteControl::new(local(), rec);

        let first = rc.start().unwrap();
        assert_eq!(rc.start().unwrap(), first);
        assert_eq!(rc.local_addr(), Some(first));

        rc.stop();
        rc.stop();
        assert_eq!(rc.local_addr(), None);

        let again = rc.start().unwrap();
        let (status, _, _) = get(&format!("http://{}/status", again));
        assert_eq!(status, 200);
    }

    #[test]
    fn test_bind_failure_is_reported() {
        let taken = std::net::TcpListener::bind(local()).unwrap();
        let addr = taken.local_addr().unwrap();

        let mut rc = RemoteControl::new(addr, Arc::new(Recorder::default()));
        match rc.start() {
            Err(ServerError::Bind { addr: a, .. }) => assert_eq!(a, addr),
            Ok(_) => panic!("bound a port already in use"),
        }
        assert!(!rc.is_running());
    }

    #[test]
    fn test_channel_handler_waits_for_publish() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let shared = Arc::new(SharedStatus::new());
        let handler = ChannelHandler::new(tx, Arc::clone(&shared));

        let host_status = Arc::clone(&shared);
        let host = thread::spawn(move || {
            let cmd = rx.recv().unwrap();
            assert_eq!(cmd, Command::Next);
            host_status.publish(PresentationStatus {
                current_index: 4,
                ..Default::default()
            });
        });

        handler.on_command(Command::Next);
        assert_eq!(handler.status().current_index, 4);
        host.join().unwrap();
    }

    #[test]
    fn test_channel_handler_survives_missing_host() {
        let (tx, rx) = crossbeam_channel::unbounded();
        drop(rx);
        let handler = ChannelHandler::new(tx, Arc::new(SharedStatus::new()));
        handler.on_command(Command::Play);
        assert_eq!(handler.status(), PresentationStatus::default());
    }
}
