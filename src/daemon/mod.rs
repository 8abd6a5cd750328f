//! Daemon module: one background process per project.
//!
//! The daemon keeps the project snapshot in memory, watches for file changes,
//! and serves queries over a Unix socket. This enables instant queries
//! without loading the cache on every CLI command.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           strata daemon                 │
//! │  - snapshot in memory (RCU swap)        │
//! │  - file watcher (incremental refresh)   │
//! │  - Unix socket server                   │
//! └─────────────────────────────────────────┘
//!           ▲
//!           │ <socket_dir>/strata-<hash>.sock
//!           ▼
//! ┌─────────────────────────────────────────┐
//! │           strata CLI                    │
//! │  - connects (auto-starts the daemon)    │
//! │  - sends JSON lines                     │
//! │  - falls back to in-process answers     │
//! └─────────────────────────────────────────┘
//! ```

pub mod client;
pub mod protocol;
pub mod server;
pub mod session;

pub use client::{one_shot, Client};
pub use protocol::{Request, Response};
pub use server::{run, Daemon};
pub use session::SessionPaths;
