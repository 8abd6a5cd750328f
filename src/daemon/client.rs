//! Client side: talk to the project's daemon, starting it when needed.
//!
//! If the daemon cannot be reached even after an auto-start, requests are
//! answered in-process against a freshly refreshed project.

use std::env;
use std::ffi::OsString;
use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::protocol::{Request, Response};
use super::session::SessionPaths;
use crate::config::Config;
use crate::error::{Result, StrataError};
use crate::project::Project;
use crate::query::{self, DaemonState};
use crate::semantic::HashingEmbedder;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Environment override for the binary spawned as the daemon.
pub const DAEMON_BIN_ENV: &str = "STRATA_BIN";

pub struct Client {
    paths: SessionPaths,
    config: Config,
}

impl Client {
    pub fn new(root: &Path, config: Config) -> Result<Self> {
        let paths = SessionPaths::for_project(root, &config)?;
        Ok(Self { paths, config })
    }

    pub fn paths(&self) -> &SessionPaths {
        &self.paths
    }

    /// Send one request over a fresh connection.
    ///
    /// A daemon that accepts but does not answer within the configured
    /// request timeout counts as unreachable.
    pub fn send(&self, request: &Request) -> Result<Response> {
        let unreachable = |reason: String| StrataError::DaemonUnreachable {
            socket: self.paths.socket.clone(),
            reason,
        };
        let timeout = self.config.request_timeout();
        let io_failure = |e: io::Error| match e.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
                unreachable(format!("no answer within {}ms", self.config.request_timeout_ms))
            }
            _ => unreachable(e.to_string()),
        };
        let stream = UnixStream::connect(&self.paths.socket).map_err(|e| unreachable(e.to_string()))?;
        stream.set_read_timeout(timeout)?;
        stream.set_write_timeout(timeout)?;
        let mut writer = stream.try_clone()?;
        let line = serde_json::to_string(request)?;
        writeln!(writer, "{line}").map_err(io_failure)?;
        writer.flush().map_err(io_failure)?;

        let mut reader = BufReader::new(stream);
        let mut response = String::new();
        let read = reader.read_line(&mut response).map_err(io_failure)?;
        if read == 0 {
            return Err(unreachable("connection closed without a response".into()));
        }
        Ok(serde_json::from_str(&response)?)
    }

    /// True when a daemon answers `ping` for this project.
    pub fn ping(&self) -> bool {
        matches!(self.send(&Request::Ping), Ok(Response::Pong { ref root, .. }) if *root == self.paths.root)
    }

    /// Make sure a daemon is serving this project, spawning one if needed.
    pub fn ensure_running(&self) -> Result<()> {
        if self.ping() {
            return Ok(());
        }
        if !self.paths.is_alive() {
            // Leftovers from a crashed daemon.
            self.paths.cleanup();
        }
        self.spawn()?;

        let deadline = Instant::now() + self.config.startup_timeout();
        while Instant::now() < deadline {
            if self.ping() {
                info!(socket = %self.paths.socket.display(), "daemon ready");
                return Ok(());
            }
            thread::sleep(POLL_INTERVAL);
        }
        Err(StrataError::DaemonUnreachable {
            socket: self.paths.socket.clone(),
            reason: format!("no answer within {}ms of starting", self.config.startup_timeout_ms),
        })
    }

    fn spawn(&self) -> Result<()> {
        let binary = resolve_daemon_binary();
        debug!(binary = ?binary, root = %self.paths.root.display(), "spawning daemon");
        Command::new(&binary)
            .arg("--root")
            .arg(&self.paths.root)
            .arg("daemon")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| StrataError::DaemonUnreachable {
                socket: self.paths.socket.clone(),
                reason: format!("failed to launch {}: {e}", binary.to_string_lossy()),
            })?;
        Ok(())
    }

    /// Send `request` to the daemon, auto-starting it if allowed, and fall
    /// back to answering in-process when it stays unreachable.
    pub fn request(&self, request: &Request) -> Result<Response> {
        match self.send(request) {
            Ok(response) => return Ok(response),
            Err(StrataError::DaemonUnreachable { reason, .. }) => {
                debug!(reason = %reason, "daemon not reachable");
            }
            Err(e) => return Err(e),
        }

        if self.config.autostart {
            match self.ensure_running().and_then(|_| self.send(request)) {
                Ok(response) => return Ok(response),
                Err(StrataError::DaemonUnreachable { reason, .. }) => {
                    warn!(reason = %reason, "daemon unavailable, answering in-process");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(one_shot(&self.paths.root, self.config.clone(), request))
    }

    /// Ask the daemon to stop. Not running is not an error.
    pub fn stop(&self) -> Result<bool> {
        match self.send(&Request::Shutdown) {
            Ok(_) => Ok(true),
            Err(StrataError::DaemonUnreachable { .. }) => {
                if !self.paths.is_alive() {
                    self.paths.cleanup();
                }
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

fn resolve_daemon_binary() -> OsString {
    env::var_os(DAEMON_BIN_ENV)
        .or_else(|| env::current_exe().ok().map(OsString::from))
        .unwrap_or_else(|| OsString::from("strata"))
}

/// Answer a request without a daemon.
pub fn one_shot(root: &Path, config: Config, request: &Request) -> Response {
    match one_shot_inner(root, config, request) {
        Ok(response) => response,
        Err(e) => Response::from(e),
    }
}

fn one_shot_inner(root: &Path, config: Config, request: &Request) -> Result<Response> {
    let embedder = Arc::new(HashingEmbedder::new(config.embedding_dims));
    let clean = matches!(request, Request::Warm { clean: true, .. });
    let project = if clean {
        Project::open_clean(root, config, embedder)?
    } else {
        Project::open_with(root, config, embedder)?
    };

    let response = match request {
        Request::Ping => {
            return Err(StrataError::DaemonUnreachable {
                socket: root.to_path_buf(),
                reason: "no daemon to ping".into(),
            })
        }
        Request::Shutdown => Response::Goodbye,
        Request::Status => {
            project.refresh()?;
            Response::ok(query::status(&project, DaemonState::Stopped, Duration::ZERO))
        }
        Request::Warm { .. } => Response::Ok {
            data: query::execute(&project, request)?,
        },
        other => {
            project.refresh()?;
            Response::Ok {
                data: query::execute(&project, other)?,
            }
        }
    };
    Ok(response)
}
