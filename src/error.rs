//! Error taxonomy shared by every pipeline stage.
//!
//! - `SyntaxError`: source text that does not parse as Python.
//! - `ScanError`: per-file fatal conditions raised while scanning or patching.
//! - `ConfigError`: unreadable or invalid configuration/registry documents.
//!   Validation problems are aggregated into a single error.
//! - `CommandError`: external process failures (spawn, timeout, cancel).
//! - `IngestError`: terminal rejection reasons of an ingestion batch.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("syntax error at line {line}, column {col}")]
pub struct SyntaxError {
    pub line: usize,
    pub col: usize,
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: SyntaxError,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
    #[error("{} has {} problem(s):\n  - {}", path.display(), problems.len(), problems.join("\n  - "))]
    Invalid { path: PathBuf, problems: Vec<String> },
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to wait for `{program}`: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("`{program}` timed out after {secs}s")]
    TimedOut { program: String, secs: u64 },
    #[error("`{program}` was cancelled")]
    Cancelled { program: String },
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("patch apply failed: {0}")]
    PatchConflict(String),
    #[error("verify failed: {0}")]
    VerifyFailure(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Command(#[from] CommandError),
}

impl IngestError {
    /// Waiver reason recorded for this rejection.
    pub fn reason(&self) -> &'static str {
        match self {
            IngestError::PatchConflict(_) => "patch apply failed",
            IngestError::VerifyFailure(_) => "verify failed",
            IngestError::Io(_) | IngestError::Command(_) => "ingest aborted",
        }
    }

    /// Captured output or detail to attach to the waiver record.
    pub fn detail(&self) -> String {
        match self {
            IngestError::PatchConflict(d) | IngestError::VerifyFailure(d) => d.clone(),
            other => other.to_string(),
        }
    }
}
