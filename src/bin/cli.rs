//! Strata CLI - code intelligence queries for one project.
//!
//! Usage:
//!   strata daemon                     # Serve this project (normally auto-started)
//!   strata stop                       # Stop this project's daemon
//!   strata status                     # Daemon state and snapshot counters
//!   strata extract <file>             # Units and imports of a file
//!   strata calls                      # Full call-edge list
//!   strata impact <unit> [--depth N]  # Who (transitively) calls a unit
//!   strata context <unit> [--depth N] # Signature, callees and callers of a unit
//!   strata structure [path]           # Units of a file or directory
//!   strata cfg <file> <unit>          # Control flow graph and complexity
//!   strata dfg <file> <unit>          # Def/use chains
//!   strata slice <file> <unit> <line> # Backward dependence slice
//!   strata semantic <query> [-k N]    # Units ranked by meaning
//!   strata warm [--clean]             # Refresh (or rebuild) the snapshot now

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{fmt, EnvFilter};

use strata::config::Config;
use strata::daemon::{self, Client, Request, Response, SessionPaths};
use strata::project::Project;
use strata::storage::Storage;

/// Filter variable for log output.
const LOG_ENV: &str = "STRATA_LOG";

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Strata - layered code intelligence", long_about = None)]
struct Cli {
    /// Project root directory (default: current directory)
    #[arg(short, long, default_value = ".", global = true)]
    root: PathBuf,

    /// Answer in this process instead of asking the daemon
    #[arg(long, global = true)]
    no_daemon: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon for this project in the foreground
    Daemon,

    /// Stop this project's daemon
    Stop,

    /// Check whether the daemon is alive
    Ping,

    /// Show daemon state and snapshot counters
    Status,

    /// List the units and imports of a file
    Extract {
        file: PathBuf,
    },

    /// List every call edge in the project
    Calls,

    /// Show the units that transitively call a unit
    Impact {
        /// Qualified or simple unit name
        unit: String,

        /// Stop after this many call levels
        #[arg(short, long)]
        depth: Option<usize>,
    },

    /// Show a unit's signature, docstring, callees and callers
    Context {
        /// Qualified or simple unit name
        unit: String,

        /// Callee levels to include
        #[arg(short, long)]
        depth: Option<usize>,
    },

    /// List the units of a file, or of every file under a directory
    Structure {
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Show a unit's control flow graph
    Cfg {
        file: PathBuf,
        unit: String,
    },

    /// Show a unit's def/use chains
    Dfg {
        file: PathBuf,
        unit: String,
    },

    /// Show the statements a line depends on
    Slice {
        file: PathBuf,
        unit: String,
        line: usize,
    },

    /// Find units by meaning
    Semantic {
        query: String,

        /// Number of results
        #[arg(short, default_value = "5")]
        k: usize,
    },

    /// Refresh the snapshot now
    Warm {
        /// Discard the cache and rebuild everything
        #[arg(long)]
        clean: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let root = cli
        .root
        .canonicalize()
        .with_context(|| format!("project root {} not found", cli.root.display()))?;
    let config = Config::load(&root)?;

    let request = match cli.command {
        Commands::Daemon => {
            init_daemon_logging(&root)?;
            let project = Arc::new(Project::open(&root)?);
            let paths = SessionPaths::for_project(&root, &config)?;
            daemon::run(project, paths)?;
            return Ok(0);
        }
        Commands::Stop => {
            init_client_logging();
            let client = Client::new(&root, config)?;
            if client.stop()? {
                println!("daemon stopped");
            } else {
                println!("no daemon running");
            }
            return Ok(0);
        }
        Commands::Ping => Request::Ping,
        Commands::Status => Request::Status,
        Commands::Extract { file } => Request::Extract { file },
        Commands::Calls => Request::Calls { project: None },
        Commands::Impact { unit, depth } => Request::Impact {
            unit,
            project: None,
            depth,
        },
        Commands::Context { unit, depth } => Request::Context {
            unit,
            project: None,
            depth,
        },
        Commands::Structure { path } => Request::Structure { path },
        Commands::Cfg { file, unit } => Request::Cfg { file, unit },
        Commands::Dfg { file, unit } => Request::Dfg { file, unit },
        Commands::Slice { file, unit, line } => Request::Slice { file, unit, line },
        Commands::Semantic { query, k } => Request::Semantic { query, k },
        Commands::Warm { clean } => Request::Warm { project: None, clean },
    };

    init_client_logging();
    let response = if cli.no_daemon {
        daemon::one_shot(&root, config, &request)
    } else {
        Client::new(&root, config)?.request(&request)?
    };
    print_response(&response)
}

fn print_response(response: &Response) -> Result<i32> {
    match response {
        Response::Ok { data } => {
            println!("{}", serde_json::to_string_pretty(data)?);
            Ok(0)
        }
        Response::Pong { pid, root } => {
            println!("daemon {pid} serving {}", root.display());
            Ok(0)
        }
        Response::Goodbye => {
            println!("goodbye");
            Ok(0)
        }
        Response::Error { error, message } => {
            let kind = serde_json::to_value(error)?;
            eprintln!("Error ({}): {message}", kind.as_str().unwrap_or("internal"));
            Ok(2)
        }
    }
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Client-side logs go to stderr so stdout stays valid JSON.
fn init_client_logging() {
    let _ = fmt()
        .with_env_filter(filter())
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .try_init();
}

/// The daemon has no terminal; it appends to `.strata/daemon.log`.
fn init_daemon_logging(root: &std::path::Path) -> Result<()> {
    let storage = Storage::init(root)?;
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(storage.log_path())
        .with_context(|| format!("failed to open {}", storage.log_path().display()))?;
    let _ = fmt()
        .with_env_filter(filter())
        .with_writer(Mutex::new(log))
        .with_ansi(false)
        .try_init();
    Ok(())
}
