#![forbid(unsafe_code)]
//! BackFix repair engine.
//!
//! Repairs a dated archive tree in place from a known-good reference tree:
//!
//! 1. [`worklist`] turns a backup-error log into [`BadFile`]s.
//! 2. [`orchestrator`] repairs each file, either by a direct
//!    [`copier`] copy or by recompressing the reference copy through the
//!    external [`compress`]or into a [`temp_name`] beside the destination.
//! 3. [`report`] collects per-file failures for the end-of-run summary.
//!
//! Processing is strictly sequential and one file's failure never stops the
//! run. Unix only: permission handling works on raw mode bits.

pub mod compress;
pub mod copier;
pub mod error;
pub mod options;
pub mod orchestrator;
pub mod report;
pub mod temp_name;
pub mod worklist;

pub use error::{RepairError, Result};
pub use options::{COMPRESSED_EXTENSION, CompressorConfig, LogLevel, RepairOptions};
pub use orchestrator::{RepairOrchestrator, RepairPath, RunOutcome, run_repair};
pub use report::{ErrorAggregator, FailedFile, FailureReport, RunSummary};
pub use worklist::{BadFile, ErrorLogParser, build_worklist};
