//! Daemon protocol: request/response types for client-daemon communication.
//!
//! One JSON object per line in each direction.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{ErrorKind, StrataError};

/// Largest request line the daemon accepts, newline included.
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024;

fn default_k() -> usize {
    5
}

/// Request from a client to the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum Request {
    /// Check if daemon is alive
    #[serde(rename = "ping")]
    Ping,

    /// Daemon state and snapshot counters
    #[serde(rename = "status")]
    Status,

    /// Units and imports of one file
    #[serde(rename = "extract")]
    Extract { file: PathBuf },

    /// Every call edge in the project
    #[serde(rename = "calls")]
    Calls {
        #[serde(default)]
        project: Option<PathBuf>,
    },

    /// Units that transitively call `unit`
    #[serde(rename = "impact")]
    Impact {
        unit: String,
        #[serde(default)]
        project: Option<PathBuf>,
        #[serde(default)]
        depth: Option<usize>,
    },

    /// Signature, docstring, callees and callers of `unit`
    #[serde(rename = "context")]
    Context {
        unit: String,
        #[serde(default)]
        project: Option<PathBuf>,
        #[serde(default)]
        depth: Option<usize>,
    },

    /// Units of a file, or of every indexed file under a directory
    #[serde(rename = "structure")]
    Structure {
        #[serde(default)]
        path: PathBuf,
    },

    #[serde(rename = "cfg")]
    Cfg { file: PathBuf, unit: String },

    #[serde(rename = "dfg")]
    Dfg { file: PathBuf, unit: String },

    /// Backward dependence slice from `line`
    #[serde(rename = "slice")]
    Slice { file: PathBuf, unit: String, line: usize },

    #[serde(rename = "semantic")]
    Semantic {
        query: String,
        #[serde(default = "default_k")]
        k: usize,
    },

    /// Refresh the snapshot now, optionally from scratch
    #[serde(rename = "warm")]
    Warm {
        #[serde(default)]
        project: Option<PathBuf>,
        #[serde(default)]
        clean: bool,
    },

    /// Shutdown the daemon
    #[serde(rename = "shutdown")]
    Shutdown,
}

impl Request {
    /// Short name used in logs.
    pub fn command(&self) -> &'static str {
        match self {
            Request::Ping => "ping",
            Request::Status => "status",
            Request::Extract { .. } => "extract",
            Request::Calls { .. } => "calls",
            Request::Impact { .. } => "impact",
            Request::Context { .. } => "context",
            Request::Structure { .. } => "structure",
            Request::Cfg { .. } => "cfg",
            Request::Dfg { .. } => "dfg",
            Request::Slice { .. } => "slice",
            Request::Semantic { .. } => "semantic",
            Request::Warm { .. } => "warm",
            Request::Shutdown => "shutdown",
        }
    }
}

/// Response from daemon to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum Response {
    /// Successful response with JSON data
    #[serde(rename = "ok")]
    Ok { data: serde_json::Value },

    /// Pong response (daemon is alive)
    #[serde(rename = "pong")]
    Pong { pid: u32, root: PathBuf },

    /// Shutdown acknowledgment
    #[serde(rename = "goodbye")]
    Goodbye,

    #[serde(rename = "error")]
    Error { error: ErrorKind, message: String },
}

impl Response {
    pub fn ok<T: Serialize>(data: T) -> Self {
        match serde_json::to_value(data) {
            Ok(data) => Response::Ok { data },
            Err(e) => Response::error(ErrorKind::Internal, format!("unserializable response: {e}")),
        }
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Response::Error {
            error: kind,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error { .. })
    }
}

impl From<StrataError> for Response {
    fn from(err: StrataError) -> Self {
        Response::error(err.kind(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_format() {
        let req: Request = serde_json::from_str(r#"{"command":"ping"}"#).unwrap();
        assert_eq!(req, Request::Ping);

        let req: Request = serde_json::from_str(r#"{"command":"impact","unit":"app.run","depth":2}"#).unwrap();
        assert_eq!(
            req,
            Request::Impact {
                unit: "app.run".into(),
                project: None,
                depth: Some(2)
            }
        );

        let req: Request = serde_json::from_str(r#"{"command":"semantic","query":"cache"}"#).unwrap();
        assert_eq!(
            req,
            Request::Semantic {
                query: "cache".into(),
                k: 5
            }
        );

        let req: Request = serde_json::from_str(r#"{"command":"calls"}"#).unwrap();
        assert_eq!(req, Request::Calls { project: None });

        let req: Request = serde_json::from_str(r#"{"command":"structure"}"#).unwrap();
        assert_eq!(req, Request::Structure { path: PathBuf::new() });

        let req: Request = serde_json::from_str(r#"{"command":"context","unit":"login"}"#).unwrap();
        assert_eq!(
            req,
            Request::Context {
                unit: "login".into(),
                project: None,
                depth: None
            }
        );
    }

    #[test]
    fn test_unknown_command_is_rejected() {
        assert!(serde_json::from_str::<Request>(r#"{"command":"rm -rf"}"#).is_err());
        assert!(serde_json::from_str::<Request>(r#"{"command":"slice","file":"a.py"}"#).is_err());
    }

    #[test]
    fn test_response_wire_format() {
        let value = serde_json::to_value(Response::ok(json!({"n": 1}))).unwrap();
        assert_eq!(value, json!({"status": "ok", "data": {"n": 1}}));

        let value = serde_json::to_value(Response::Goodbye).unwrap();
        assert_eq!(value, json!({"status": "goodbye"}));

        let err = StrataError::QueryTargetNotFound("unit nope".into());
        let value = serde_json::to_value(Response::from(err)).unwrap();
        assert_eq!(
            value,
            json!({"status": "error", "error": "query_target_not_found", "message": "not found: unit nope"})
        );
    }
}
