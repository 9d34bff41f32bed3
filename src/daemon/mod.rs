//! Search daemon: keeps an index warm in one process and serves queries over
//! a Unix domain socket.
//!
//! ```text
//!   csearch --remote search ...        csearch serve
//!   ┌──────────────────┐               ┌──────────────────────┐
//!   │ UdsDaemonClient  │──── frame ───▶│ SearchDaemon         │
//!   └──────────────────┘   (len + mp)  │  └─ SearchService     │
//!                                      │      └─ IndexStore    │
//!                                      └──────────────────────┘
//!        socket: /tmp/content-search-$USER.sock (configurable)
//! ```

pub mod client;
pub mod core;
pub mod protocol;

pub use client::{DaemonClientConfig, DaemonError, UdsDaemonClient};
pub use core::{DaemonConfig, SearchDaemon};
pub use protocol::{PROTOCOL_VERSION, Request, Response, default_socket_path};
