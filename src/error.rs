//! Error types for Strata.
//!
//! One enum for the whole library. Per-file failures (`UnsupportedLanguage`,
//! `BinaryContent`, `TreeSitterParseFailed`) are recorded as skipped files by
//! the builder and never abort a project build.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StrataError {
    #[error("unsupported language: {}", .0.display())]
    UnsupportedLanguage(PathBuf),

    #[error("failed to initialize parser for {}: {reason}", .path.display())]
    ParserInitError { path: PathBuf, reason: String },

    #[error("tree-sitter returned no tree for {}", .0.display())]
    TreeSitterParseFailed(PathBuf),

    #[error("binary or non-UTF-8 content in {}", .0.display())]
    BinaryContent(PathBuf),

    #[error("file too large: {} ({size} bytes)", .path.display())]
    FileTooLarge { path: PathBuf, size: u64 },

    #[error("cache schema mismatch: found {found}, expected {expected}")]
    CacheVersionMismatch { found: u32, expected: u32 },

    #[error("cache corrupted: {0}")]
    CacheCorrupted(String),

    #[error("serialization error: {0}")]
    SerializeError(String),

    #[error("daemon unreachable at {}: {reason}", .socket.display())]
    DaemonUnreachable { socket: PathBuf, reason: String },

    #[error("not found: {0}")]
    QueryTargetNotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("daemon serves {served}, not {requested}")]
    WrongProject { served: String, requested: String },

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StrataError>;

/// Wire-level error category carried in `{"error": <kind>, ...}` responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ParseError,
    QueryTargetNotFound,
    InvalidRequest,
    WrongProject,
    CacheCorrupted,
    Internal,
}

impl StrataError {
    /// True for failures that only skip the offending file.
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            StrataError::UnsupportedLanguage(_)
                | StrataError::ParserInitError { .. }
                | StrataError::TreeSitterParseFailed(_)
                | StrataError::BinaryContent(_)
                | StrataError::FileTooLarge { .. }
        )
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            e if e.is_parse_error() => ErrorKind::ParseError,
            StrataError::QueryTargetNotFound(_) => ErrorKind::QueryTargetNotFound,
            StrataError::InvalidRequest(_) | StrataError::Json(_) => ErrorKind::InvalidRequest,
            StrataError::WrongProject { .. } => ErrorKind::WrongProject,
            StrataError::CacheCorrupted(_) => ErrorKind::CacheCorrupted,
            _ => ErrorKind::Internal,
        }
    }
}
