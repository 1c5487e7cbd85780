//! Error types for the repair engine.
//!
//! # Error Taxonomy
//!
//! | Class | Variant(s) | Effect on the current file |
//! |-------|------------|----------------------------|
//! | parse | `Unresolvable` | line dropped, never reported |
//! | permission | `PermissionChange`, `PermissionRestore` | copy still attempted |
//! | destination | `Inspect` | copy skipped |
//! | copy | `Copy` | file fails |
//! | compression | `CompressorLaunch`, `CompressionFailed` | copy skipped |
//! | compression | `TempTaken` | copy skipped, temp left alone |
//! | allocation | `TempExhausted` | remaining steps skipped |
//! | cleanup | `TempCleanup` | logged only |
//!
//! Every variant is local to one [`BadFile`](crate::BadFile). The
//! orchestrator catches all of them; none ends the run. The `Display` text
//! is what lands in `BadFile::errors` and in the final report.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Unified error type for repair operations.
#[derive(Debug, Error)]
pub enum RepairError {
    /// Operating system I/O error outside any specific repair step.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The backup error log could not be read.
    #[error("failed to read error log line {line}: {source}")]
    LogRead {
        line: usize,
        #[source]
        source: io::Error,
    },

    /// An identifier has no dated-archive segment to split on.
    #[error("no dated-archive segment in {identifier}")]
    Unresolvable { identifier: String },

    /// The destination's metadata could not be read (usually: it is missing).
    #[error("{source} while reading permissions of {}", path.display())]
    Inspect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Granting owner-write on the destination failed.
    #[error("{source} while changing permissions of {} to {mode:o}", path.display())]
    PermissionChange {
        path: PathBuf,
        mode: u32,
        #[source]
        source: io::Error,
    },

    /// Putting the original permission bits back failed.
    #[error("{source} while resetting permissions")]
    PermissionRestore {
        path: PathBuf,
        mode: u32,
        #[source]
        source: io::Error,
    },

    /// The byte copy onto the destination failed.
    #[error("{source} while copying file")]
    Copy {
        destination: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The temp file could not be created or the compressor not started.
    #[error("{source} while opening and creating temp compressed file")]
    CompressorLaunch {
        temp: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Something else created the temp path between allocation and use.
    /// The file is not ours, so it is never cleaned up.
    #[error("{source} while opening and creating temp compressed file")]
    TempTaken {
        temp: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The compressor ran but did not exit with status zero.
    #[error("{}", compression_failure_text(*code))]
    CompressionFailed { temp: PathBuf, code: Option<i32> },

    /// Every temp-name candidate already existed.
    #[error("can't create temp file {}, something already has that name ({attempts} attempts)", last_candidate.display())]
    TempExhausted {
        last_candidate: PathBuf,
        attempts: usize,
    },

    /// Removing the temp file failed.
    #[error("{source} while removing temp file {}", path.display())]
    TempCleanup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn compression_failure_text(code: Option<i32>) -> String {
    code.map_or_else(
        || "Compression terminated by signal".to_owned(),
        |code| format!("Compression return code {code}"),
    )
}

impl RepairError {
    /// Numeric status for this error, in the style of a process exit code.
    ///
    /// I/O-backed variants report the raw OS errno when there is one;
    /// compression failures report the compressor's own exit code.
    #[must_use]
    pub fn status_code(&self) -> i32 {
        match self {
            Self::Io(source)
            | Self::LogRead { source, .. }
            | Self::Inspect { source, .. }
            | Self::PermissionChange { source, .. }
            | Self::PermissionRestore { source, .. }
            | Self::Copy { source, .. }
            | Self::CompressorLaunch { source, .. }
            | Self::TempTaken { source, .. }
            | Self::TempCleanup { source, .. } => source.raw_os_error().unwrap_or(-1),
            Self::CompressionFailed { code, .. } => code.unwrap_or(-1),
            Self::Unresolvable { .. } | Self::TempExhausted { .. } => -1,
        }
    }
}

/// Result alias using `RepairError`.
pub type Result<T> = std::result::Result<T, RepairError>;
