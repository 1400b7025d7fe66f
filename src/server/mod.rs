//! Remote control service: a phone browser drives the presentation.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────┐    crossbeam channel       ┌──────────────────────┐
//! │   rouille threads       │  ──────── Command ──────▶  │   Host thread        │
//! │                         │                            │   (owns Presenter)   │
//! │  GET /next              │  ──▶ Command::Next ────▶   │  presenter.apply()   │
//! │  GET /scroll?dy=-200    │  ──▶ Scroll(-200) ─────▶   │  publish(status)     │
//! └─────────────────────────┘                            └──────────────────────┘
//!          │                                                      │
//!          │  Arc<SharedStatus>                                   │
//!          │◀──────────── read snapshot ──────────────────────────│
//! ```
//!
//! # Endpoints
//!
//! | Method | Path        | Description                          |
//! |--------|-------------|--------------------------------------|
//! | GET    | `/`         | HTML control page                    |
//! | GET    | `/status`   | Status JSON                          |
//! | GET    | `/next`     | Next slide (wraps)                   |
//! | GET    | `/prev`     | Previous slide (wraps)               |
//! | GET    | `/play`     | Enter presenting mode                |
//! | GET    | `/stop`     | Leave presenting mode                |
//! | GET    | `/zoomin`   | Zoom in                              |
//! | GET    | `/zoomout`  | Zoom out                             |
//! | GET    | `/scroll?dy=N` | Scroll current slide by N pixels  |

mod api;

pub use api::{
    ChannelHandler, DEFAULT_PORT, RemoteControl, RemoteHandler, ServerError, SharedStatus,
};
