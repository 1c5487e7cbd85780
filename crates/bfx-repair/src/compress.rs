//! Bridge to the external compressor.
//!
//! The compressor is an opaque program run as `program stdout_flag <source>`
//! with its stdout captured into a freshly created temp file. Only its exit
//! status matters; stderr passes straight through to ours.

use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};

use tracing::{debug, info};

use crate::error::{RepairError, Result};
use crate::options::CompressorConfig;

/// How a compression request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionStatus {
    /// Dry run: nothing was run.
    Skipped,
    /// The process exited; `None` means it was killed by a signal.
    Exited(Option<i32>),
}

impl CompressionStatus {
    /// Whether the compressed temp file can be used.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Skipped | Self::Exited(Some(0)))
    }
}

/// Produces a compressed copy of `source` at `destination`.
pub trait Compressor {
    /// `destination` must not exist yet. If it does, implementations
    /// return [`RepairError::TempTaken`] and leave it untouched.
    fn compress(&self, source: &Path, destination: &Path, dry_run: bool)
    -> Result<CompressionStatus>;
}

/// Runs an external program per [`CompressorConfig`].
#[derive(Debug, Clone)]
pub struct ExternalCompressor {
    config: CompressorConfig,
}

impl ExternalCompressor {
    #[must_use]
    pub fn new(config: CompressorConfig) -> Self {
        Self { config }
    }
}

impl Compressor for ExternalCompressor {
    fn compress(
        &self,
        source: &Path,
        destination: &Path,
        dry_run: bool,
    ) -> Result<CompressionStatus> {
        info!(
            target: "bfx::repair::compress",
            program = %self.config.program.to_string_lossy(),
            from = %source.display(),
            to = %destination.display(),
            live = !dry_run,
            "compress"
        );
        if dry_run {
            return Ok(CompressionStatus::Skipped);
        }

        let launch_error = |source: io::Error| RepairError::CompressorLaunch {
            temp: destination.to_path_buf(),
            source,
        };
        let output = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(destination)
            .map_err(|source| {
                if source.kind() == io::ErrorKind::AlreadyExists {
                    RepairError::TempTaken {
                        temp: destination.to_path_buf(),
                        source,
                    }
                } else {
                    launch_error(source)
                }
            })?;
        let status = Command::new(&self.config.program)
            .arg(&self.config.stdout_flag)
            .arg(source)
            .stdin(Stdio::null())
            .stdout(Stdio::from(output))
            .status()
            .map_err(launch_error)?;

        debug!(
            target: "bfx::repair::compress",
            code = ?status.code(),
            "compressor_exited"
        );
        Ok(CompressionStatus::Exited(status.code()))
    }
}
