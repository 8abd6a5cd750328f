//! Daemon lifecycle over a real Unix socket, served in-process.

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use strata::daemon::{Client, Daemon, Request, Response, SessionPaths};
use strata::{Config, ErrorKind, HashingEmbedder, Project, StrataError};
use tempfile::{tempdir, TempDir};

fn config(sockets: &Path) -> Config {
    Config {
        socket_dir: Some(sockets.to_path_buf()),
        watch: false,
        autostart: false,
        ..Config::default()
    }
}

fn start(root: &Path, config: Config) -> (Client, JoinHandle<()>) {
    let project = Arc::new(
        Project::open_with(root, config.clone(), Arc::new(HashingEmbedder::new(64))).unwrap(),
    );
    let paths = SessionPaths::for_project(root, &config).unwrap();
    let daemon = Daemon::bind(project, paths).unwrap();
    let handle = thread::spawn(move || daemon.serve().unwrap());
    (Client::new(root, config).unwrap(), handle)
}

fn data(response: Response) -> Value {
    match response {
        Response::Ok { data } => data,
        other => panic!("expected ok, got {other:?}"),
    }
}

fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut check: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(50));
    }
    false
}

fn wait_ready(client: &Client) {
    let ready = wait_until(Duration::from_secs(10), || {
        client
            .send(&Request::Status)
            .map(|r| data(r)["state"] == json!("ready"))
            .unwrap_or(false)
    });
    assert!(ready, "daemon never became ready");
}

fn project_with(files: &[(&str, &str)]) -> TempDir {
    let dir = tempdir().unwrap();
    for (rel, text) in files {
        fs::write(dir.path().join(rel), text).unwrap();
    }
    dir
}

#[test]
fn socket_paths_are_isolated_per_project() {
    let sockets = tempdir().unwrap();
    let a = tempdir().unwrap();
    let b = tempdir().unwrap();
    let pa = SessionPaths::for_project(a.path(), &config(sockets.path())).unwrap();
    let pb = SessionPaths::for_project(b.path(), &config(sockets.path())).unwrap();
    assert_ne!(pa.socket, pb.socket);
    assert_ne!(pa.pid_file, pb.pid_file);
    assert_eq!(pa, SessionPaths::for_project(a.path(), &config(sockets.path())).unwrap());
}

#[test]
fn serves_queries_until_shutdown() {
    let sockets = tempdir().unwrap();
    let root = project_with(&[
        ("x.py", "from y import bar\n\ndef foo():\n    return bar()\n"),
        ("y.py", "def bar():\n    return 1\n"),
    ]);
    let (client, server) = start(root.path(), config(sockets.path()));

    assert!(client.ping());
    wait_ready(&client);

    let status = data(client.send(&Request::Status).unwrap());
    assert_eq!(status["files"], json!(2));
    assert_eq!(status["pid"], json!(std::process::id()));

    let calls = data(client.send(&Request::Calls { project: None }).unwrap());
    assert_eq!(calls["edges"][0]["caller"], json!("x.foo"));
    assert_eq!(calls["edges"][0]["callee"], json!("y.bar"));

    let context = data(
        client
            .send(&Request::Context {
                unit: "foo".into(),
                project: None,
                depth: None,
            })
            .unwrap(),
    );
    assert_eq!(context["unit"]["qualified_name"], json!("x.foo"));
    assert_eq!(context["callees"][0]["qualified_name"], json!("y.bar"));

    let structure = data(client.send(&Request::Structure { path: "y.py".into() }).unwrap());
    assert_eq!(structure["files"][0]["units"][0]["qualified_name"], json!("y.bar"));

    let missing = client
        .send(&Request::Impact {
            unit: "nope".into(),
            project: None,
            depth: None,
        })
        .unwrap();
    assert!(matches!(
        missing,
        Response::Error {
            error: ErrorKind::QueryTargetNotFound,
            ..
        }
    ));

    let elsewhere = client
        .send(&Request::Calls {
            project: Some("/definitely/not/here".into()),
        })
        .unwrap();
    assert!(matches!(
        elsewhere,
        Response::Error {
            error: ErrorKind::WrongProject,
            ..
        }
    ));

    // A malformed line gets an error response and the connection stays usable.
    let mut stream = UnixStream::connect(&client.paths().socket).unwrap();
    stream.write_all(b"{not json}\n{\"command\":\"ping\"}\n").unwrap();
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    let first: Response = serde_json::from_str(&line).unwrap();
    assert!(matches!(
        first,
        Response::Error {
            error: ErrorKind::InvalidRequest,
            ..
        }
    ));
    line.clear();
    reader.read_line(&mut line).unwrap();
    assert!(matches!(serde_json::from_str(&line).unwrap(), Response::Pong { .. }));

    assert!(matches!(client.send(&Request::Shutdown).unwrap(), Response::Goodbye));
    server.join().unwrap();
    assert!(!client.paths().socket.exists());
    assert!(!client.paths().pid_file.exists());
    assert!(!client.ping());
}

#[test]
fn warm_picks_up_edits() {
    let sockets = tempdir().unwrap();
    let root = project_with(&[("a.py", "def a():\n    return 1\n")]);
    let (client, server) = start(root.path(), config(sockets.path()));
    wait_ready(&client);

    fs::write(root.path().join("b.py"), "from a import a\n\ndef b():\n    return a()\n").unwrap();
    let report = data(client.send(&Request::Warm { project: None, clean: false }).unwrap());
    assert_eq!(report["reparsed"], json!(1));
    assert_eq!(report["reused"], json!(1));

    let impact = data(
        client
            .send(&Request::Impact {
                unit: "a.a".into(),
                project: None,
                depth: None,
            })
            .unwrap(),
    );
    assert_eq!(impact["callers"][0]["unit"], json!("b.b"));

    let clean = data(client.send(&Request::Warm { project: None, clean: true }).unwrap());
    assert_eq!(clean["reparsed"], json!(2));
    assert_eq!(clean["full_rebuild"], json!(true));

    client.send(&Request::Shutdown).unwrap();
    server.join().unwrap();
}

#[test]
fn two_daemons_answer_for_their_own_project() {
    let sockets = tempdir().unwrap();
    let one = project_with(&[("one.py", "def only_in_one():\n    pass\n")]);
    let two = project_with(&[("two.py", "def only_in_two():\n    pass\n")]);
    let (c1, s1) = start(one.path(), config(sockets.path()));
    let (c2, s2) = start(two.path(), config(sockets.path()));
    wait_ready(&c1);
    wait_ready(&c2);

    let units = |client: &Client, file: &str| {
        let resp = data(client.send(&Request::Extract { file: file.into() }).unwrap());
        resp["units"][0]["qualified_name"].clone()
    };
    assert_eq!(units(&c1, "one.py"), json!("one.only_in_one"));
    assert_eq!(units(&c2, "two.py"), json!("two.only_in_two"));
    assert!(c1.send(&Request::Extract { file: "two.py".into() }).unwrap().is_error());

    c1.send(&Request::Shutdown).unwrap();
    s1.join().unwrap();
    assert!(c2.ping(), "stopping one daemon must not affect the other");
    c2.send(&Request::Shutdown).unwrap();
    s2.join().unwrap();
}

#[test]
fn idle_daemon_exits_on_its_own() {
    let sockets = tempdir().unwrap();
    let root = project_with(&[("a.py", "def a():\n    return 1\n")]);
    let cfg = Config {
        idle_timeout_secs: 1,
        ..config(sockets.path())
    };
    let (client, server) = start(root.path(), cfg);

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        server.join().unwrap();
        let _ = tx.send(());
    });
    rx.recv_timeout(Duration::from_secs(15))
        .expect("daemon did not stop after its idle timeout");
    assert!(!client.paths().socket.exists());
}

#[test]
fn watcher_refreshes_after_file_changes() {
    let sockets = tempdir().unwrap();
    let root = project_with(&[("a.py", "def a():\n    return 1\n")]);
    let cfg = Config {
        watch: true,
        debounce_ms: 100,
        ..config(sockets.path())
    };
    let (client, server) = start(root.path(), cfg);
    wait_ready(&client);

    fs::write(root.path().join("b.py"), "def b():\n    return 2\n").unwrap();
    let picked_up = wait_until(Duration::from_secs(15), || {
        client
            .send(&Request::Status)
            .map(|r| data(r)["files"] == json!(2))
            .unwrap_or(false)
    });
    assert!(picked_up, "watcher never refreshed the snapshot");

    client.send(&Request::Shutdown).unwrap();
    server.join().unwrap();
}

#[test]
fn silent_daemon_times_out_instead_of_hanging() {
    let sockets = tempdir().unwrap();
    let root = tempdir().unwrap();
    let cfg = Config {
        request_timeout_ms: 300,
        ..config(sockets.path())
    };
    let client = Client::new(root.path(), cfg).unwrap();
    let socket = client.paths().socket.clone();
    if let Some(parent) = socket.parent() {
        fs::create_dir_all(parent).unwrap();
    }

    // Accepts connections and never writes a byte back.
    let listener = UnixListener::bind(&socket).unwrap();
    let (held_tx, held_rx) = mpsc::channel();
    thread::spawn(move || {
        if let Ok((stream, _)) = listener.accept() {
            let _ = held_tx.send(stream);
        }
    });

    let started = Instant::now();
    let err = client.send(&Request::Status).unwrap_err();
    assert!(matches!(err, StrataError::DaemonUnreachable { .. }), "got {err:?}");
    assert!(started.elapsed() < Duration::from_secs(5));
    drop(held_rx);
}
