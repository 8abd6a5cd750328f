//! Daemon server: Unix socket server that answers queries for one project.
//!
//! The accept loop is non-blocking so it can notice shutdown requests and the
//! idle timeout without a timer thread. Each connection gets its own thread
//! and is served one request at a time.

use anyhow::{bail, Context, Result};
use std::fs;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::protocol::{Request, Response, MAX_REQUEST_BYTES};
use super::session::SessionPaths;
use crate::error::ErrorKind;
use crate::project::Project;
use crate::query::{self, DaemonState};
use crate::watcher::{start_watching, WatcherHandle};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(25);
const ERROR_BACKOFF: Duration = Duration::from_millis(150);

/// State shared by the accept loop, connection threads and the watcher.
struct Shared {
    project: Arc<Project>,
    paths: SessionPaths,
    started: Instant,
    ready: AtomicBool,
    shutdown: AtomicBool,
    rebuilding: AtomicUsize,
    in_flight: AtomicUsize,
    last_activity: Mutex<Instant>,
}

impl Shared {
    fn state(&self) -> DaemonState {
        if self.shutdown.load(Ordering::SeqCst) {
            DaemonState::Stopped
        } else if !self.ready.load(Ordering::SeqCst) {
            DaemonState::Starting
        } else if self.rebuilding.load(Ordering::SeqCst) > 0 {
            DaemonState::Rebuilding
        } else {
            DaemonState::Ready
        }
    }

    fn touch(&self) {
        let mut last = self.last_activity.lock().unwrap_or_else(|e| e.into_inner());
        *last = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
    }

    /// Run a refresh with the state reported as rebuilding.
    fn refresh(&self, clean: bool) -> crate::error::Result<crate::cache::BuildReport> {
        self.rebuilding.fetch_add(1, Ordering::SeqCst);
        let result = if clean {
            self.project.rebuild_clean()
        } else {
            self.project.refresh()
        };
        self.rebuilding.fetch_sub(1, Ordering::SeqCst);
        self.touch();
        result
    }
}

/// A bound, not yet serving, daemon.
pub struct Daemon {
    shared: Arc<Shared>,
    listener: UnixListener,
}

impl Daemon {
    /// Bind the project's socket and record this process as its daemon.
    pub fn bind(project: Arc<Project>, paths: SessionPaths) -> Result<Self> {
        paths.ensure_dirs()?;
        let listener = bind_unix(&paths.socket)?;
        paths.write_pid()?;
        info!(socket = %paths.socket.display(), root = %paths.root.display(), "daemon listening");
        Ok(Self {
            shared: Arc::new(Shared {
                project,
                paths,
                started: Instant::now(),
                ready: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
                rebuilding: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                last_activity: Mutex::new(Instant::now()),
            }),
            listener,
        })
    }

    /// Serve until a `shutdown` request or the idle timeout.
    ///
    /// Queries are answered from the restored snapshot while the initial
    /// refresh runs in the background.
    pub fn serve(self) -> Result<()> {
        let Daemon { shared, listener } = self;
        listener
            .set_nonblocking(true)
            .context("failed to make the daemon socket non-blocking")?;

        let starter = Arc::clone(&shared);
        thread::spawn(move || {
            match starter.project.refresh() {
                Ok(report) => info!(files = report.files, units = report.units, "initial build complete"),
                Err(e) => error!(error = %e, "initial build failed"),
            }
            starter.ready.store(true, Ordering::SeqCst);
            starter.touch();
        });

        let _watcher = start_watcher(&shared);
        let idle_timeout = shared.project.config().idle_timeout();

        let mut last_error = None::<io::ErrorKind>;
        while !shared.shutdown.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, _)) => {
                    last_error = None;
                    if let Err(e) = stream.set_nonblocking(false) {
                        warn!(error = %e, "failed to configure connection");
                        continue;
                    }
                    shared.touch();
                    let shared = Arc::clone(&shared);
                    thread::spawn(move || handle_client(stream, &shared));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if is_idle(&shared, idle_timeout) {
                        info!(idle_secs = idle_timeout.as_secs(), "idle timeout reached");
                        break;
                    }
                    thread::sleep(ACCEPT_BACKOFF);
                }
                Err(e) => {
                    let kind = e.kind();
                    if last_error != Some(kind) {
                        warn!(error = %e, "socket accept error");
                    }
                    last_error = Some(kind);
                    thread::sleep(ERROR_BACKOFF);
                }
            }
        }

        shared.shutdown.store(true, Ordering::SeqCst);
        info!("daemon shutting down");
        shared.paths.cleanup();
        Ok(())
    }
}

/// Start the daemon for `project` and block until it stops.
pub fn run(project: Arc<Project>, paths: SessionPaths) -> Result<()> {
    Daemon::bind(project, paths)?.serve()
}

fn is_idle(shared: &Shared, timeout: Duration) -> bool {
    !timeout.is_zero()
        && shared.ready.load(Ordering::SeqCst)
        && shared.in_flight.load(Ordering::SeqCst) == 0
        && shared.rebuilding.load(Ordering::SeqCst) == 0
        && shared.idle_for() >= timeout
}

fn start_watcher(shared: &Arc<Shared>) -> Option<WatcherHandle> {
    let config = shared.project.config();
    if !config.watch {
        return None;
    }
    let watched = Arc::clone(shared);
    let result = start_watching(
        shared.project.root(),
        config.debounce_ms,
        config.ignored_dirs.clone(),
        move |paths| {
            debug!(count = paths.len(), "refreshing after file changes");
            if let Err(e) = watched.refresh(false) {
                warn!(error = %e, "refresh after file change failed");
            }
        },
    );
    match result {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "file watcher failed to start");
            None
        }
    }
}

/// Serve requests from one connection until it closes.
fn handle_client(stream: UnixStream, shared: &Shared) {
    let mut writer = match stream.try_clone() {
        Ok(w) => w,
        Err(e) => {
            debug!(error = %e, "failed to clone client stream");
            return;
        }
    };
    let mut reader = BufReader::new(stream);

    loop {
        let line = match read_request_line(&mut reader) {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "failed to read request");
                let _ = write_response(&mut writer, &Response::error(ErrorKind::InvalidRequest, e.to_string()));
                return;
            }
        };
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        shared.in_flight.fetch_add(1, Ordering::SeqCst);
        shared.touch();
        let (response, stop) = match serde_json::from_slice::<Request>(&line) {
            Ok(request) => {
                debug!(command = request.command(), "received request");
                let stop = request == Request::Shutdown;
                (process_request(&request, shared), stop)
            }
            Err(e) => {
                warn!(error = %e, "malformed request");
                (Response::error(ErrorKind::InvalidRequest, e.to_string()), false)
            }
        };
        if stop {
            shared.shutdown.store(true, Ordering::SeqCst);
        }
        let written = write_response(&mut writer, &response);
        shared.in_flight.fetch_sub(1, Ordering::SeqCst);
        shared.touch();

        if let Err(e) = written {
            debug!(error = %e, "client went away before the response");
            return;
        }
        if stop {
            return;
        }
    }
}

fn process_request(request: &Request, shared: &Shared) -> Response {
    let project = shared.project.as_ref();
    match request {
        Request::Ping => Response::Pong {
            pid: std::process::id(),
            root: project.root().to_path_buf(),
        },
        Request::Shutdown => Response::Goodbye,
        Request::Status => Response::ok(query::status(project, shared.state(), shared.started.elapsed())),
        Request::Warm { project: requested, clean } => {
            if let Some(requested) = requested {
                let canonical = requested.canonicalize().unwrap_or_else(|_| requested.clone());
                if canonical != project.root() {
                    return Response::error(
                        ErrorKind::WrongProject,
                        format!("daemon serves {}, not {}", project.root().display(), requested.display()),
                    );
                }
            }
            match shared.refresh(*clean) {
                Ok(report) => Response::ok(report),
                Err(e) => Response::from(e),
            }
        }
        other => match query::execute(project, other) {
            Ok(data) => Response::Ok { data },
            Err(e) => {
                debug!(command = other.command(), error = %e, "query failed");
                Response::from(e)
            }
        },
    }
}

/// Read one newline-terminated request, at most `MAX_REQUEST_BYTES` long.
///
/// `Ok(None)` when the client closed the connection.
fn read_request_line<R: BufRead>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut buffer = Vec::new();
    let limit = MAX_REQUEST_BYTES as u64 + 1;
    let read = reader.by_ref().take(limit).read_until(b'\n', &mut buffer)?;
    if read == 0 {
        return Ok(None);
    }
    if buffer.len() > MAX_REQUEST_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("request exceeds {MAX_REQUEST_BYTES} bytes"),
        ));
    }
    Ok(Some(buffer))
}

fn write_response<W: Write>(writer: &mut W, response: &Response) -> io::Result<()> {
    let json = serde_json::to_string(response)?;
    writeln!(writer, "{json}")?;
    writer.flush()
}

/// Bind the socket, replacing a stale one left by a dead daemon.
fn bind_unix(path: &Path) -> Result<UnixListener> {
    if path.exists() {
        let metadata = fs::symlink_metadata(path)?;
        if !metadata.file_type().is_socket() {
            bail!("{} exists and is not a socket", path.display());
        }
        match UnixStream::connect(path) {
            Ok(_stream) => bail!("a daemon is already listening on {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused || e.kind() == io::ErrorKind::NotFound => {
                debug!(socket = %path.display(), "removing stale socket");
                fs::remove_file(path)
                    .with_context(|| format!("failed to remove stale socket {}", path.display()))?;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to check {}", path.display()));
            }
        }
    }
    UnixListener::bind(path).with_context(|| format!("failed to bind {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::tempdir;

    #[test]
    fn test_read_request_line_limits() {
        let mut input = Cursor::new(b"{\"command\":\"ping\"}\n{\"command\":\"status\"}\n".to_vec());
        let first = read_request_line(&mut input).unwrap().unwrap();
        assert_eq!(first, b"{\"command\":\"ping\"}\n");
        let second = read_request_line(&mut input).unwrap().unwrap();
        assert_eq!(second, b"{\"command\":\"status\"}\n");
        assert!(read_request_line(&mut input).unwrap().is_none());

        let mut huge = vec![b'a'; MAX_REQUEST_BYTES + 10];
        huge.push(b'\n');
        let err = read_request_line(&mut Cursor::new(huge)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_bind_replaces_stale_socket() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.sock");
        drop(UnixListener::bind(&path).unwrap());
        assert!(path.exists(), "socket file outlives its listener");

        let listener = bind_unix(&path).unwrap();
        assert!(bind_unix(&path).is_err(), "live socket must not be replaced");
        drop(listener);
    }

    #[test]
    fn test_bind_refuses_regular_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.sock");
        fs::write(&path, "not a socket").unwrap();
        assert!(bind_unix(&path).is_err());
    }
}
