//! Drives each `BadFile` through its repair path.
//!
//! The path is chosen from the *resolved source* path, not from
//! `BadFile::is_compressed_variant`:
//!
//! - **direct copy**: the source is a plain file; copy it over the
//!   destination.
//! - **compress-then-copy**: the source carries the compressed extension.
//!   Compress its uncompressed sibling into a temp file beside the
//!   destination, copy the temp over the destination, then remove the temp
//!   unless something else created it first.
//!
//! Every failure is recorded against the current file and the run moves on
//! to the next one. Nothing here stops a run early.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, info_span, warn};

use crate::compress::{CompressionStatus, Compressor, ExternalCompressor};
use crate::copier::copy_with_permissions;
use crate::error::RepairError;
use crate::options::RepairOptions;
use crate::report::{ErrorAggregator, FailureReport, RunSummary};
use crate::temp_name::{RandomTokens, TempFileAllocator, TokenSource};
use crate::worklist::{BadFile, has_extension};

/// Which repair path a file takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairPath {
    DirectCopy,
    CompressThenCopy,
}

/// Sequential repair driver for one run.
pub struct RepairOrchestrator<'a, C, S> {
    good_root: &'a Path,
    options: &'a RepairOptions,
    compressor: C,
    allocator: TempFileAllocator<S>,
    aggregator: ErrorAggregator,
}

impl<'a> RepairOrchestrator<'a, ExternalCompressor, RandomTokens<rand::rngs::ThreadRng>> {
    /// Orchestrator using the configured external compressor and random
    /// temp names.
    #[must_use]
    pub fn with_defaults(good_root: &'a Path, options: &'a RepairOptions) -> Self {
        Self::new(
            good_root,
            options,
            ExternalCompressor::new(options.compressor.clone()),
            RandomTokens::thread_local(),
        )
    }
}

impl<'a, C: Compressor, S: TokenSource> RepairOrchestrator<'a, C, S> {
    pub fn new(good_root: &'a Path, options: &'a RepairOptions, compressor: C, tokens: S) -> Self {
        Self {
            good_root,
            options,
            compressor,
            allocator: TempFileAllocator::new(tokens),
            aggregator: ErrorAggregator::new(),
        }
    }

    /// Repair every file of `worklist`, in order.
    pub fn repair_all(&mut self, worklist: &mut [BadFile]) -> RunSummary {
        if self.options.dry_run {
            info!(
                target: "bfx::repair::orchestrator",
                "Doing dry run. No changes made to files."
            );
        }
        info!(
            target: "bfx::repair::orchestrator",
            count = worklist.len(),
            "Repairing {} bad files",
            worklist.len()
        );

        for file in worklist.iter_mut() {
            self.repair_one(file);
        }

        let failed = self.aggregator.failed_count();
        RunSummary {
            total: worklist.len(),
            repaired: worklist.len().saturating_sub(failed),
            failed,
            dry_run: self.options.dry_run,
        }
    }

    /// Repair a single file, recording any failures against it.
    pub fn repair_one(&mut self, file: &mut BadFile) -> RepairPath {
        let span = info_span!(
            target: "bfx::repair::orchestrator",
            "repair_file",
            seq = file.seq,
            path = %file.archive_path.display()
        );
        let _guard = span.enter();
        info!(target: "bfx::repair::orchestrator", "------- File {} ------", file.seq);

        let source = file.source_path(self.good_root);
        let destination = file.archive_path.clone();
        debug!(
            target: "bfx::repair::orchestrator",
            source_head = %source.parent().unwrap_or(Path::new("")).display(),
            source_tail = ?source.file_name(),
            source_root = ?source.file_stem(),
            source_ext = ?source.extension(),
            "source_resolved"
        );

        let path = self.select_path(&source);
        if (path == RepairPath::CompressThenCopy) != file.is_compressed_variant {
            warn!(
                target: "bfx::repair::orchestrator",
                source = %source.display(),
                archive_compressed = file.is_compressed_variant,
                ?path,
                "compression_flag_disagrees_with_source"
            );
        }

        match path {
            RepairPath::DirectCopy => self.copy_into(file, &source, &destination),
            RepairPath::CompressThenCopy => self.compress_then_copy(file, &source, &destination),
        }
        path
    }

    /// Branch on the source path's extension.
    #[must_use]
    pub fn select_path(&self, source: &Path) -> RepairPath {
        if has_extension(source, &self.options.compressor.extension) {
            RepairPath::CompressThenCopy
        } else {
            RepairPath::DirectCopy
        }
    }

    fn copy_into(&mut self, file: &mut BadFile, source: &Path, destination: &Path) {
        let outcome = copy_with_permissions(source, destination, self.options);
        for err in &outcome.errors {
            self.aggregator.record(file, err);
        }
    }

    fn compress_then_copy(&mut self, file: &mut BadFile, source: &Path, destination: &Path) {
        let uncompressed = uncompressed_sibling(source);
        let Some(base) = uncompressed.file_name() else {
            self.fail(
                file,
                &RepairError::Io(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("no uncompressed name for {}", source.display()),
                )),
            );
            return;
        };
        let directory = destination
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or(Path::new("."));

        let temp = match self
            .allocator
            .allocate(directory, base, &self.options.compressor.extension)
        {
            Ok(temp) => temp,
            Err(err) => {
                self.fail(file, &err);
                return;
            }
        };

        match self
            .compressor
            .compress(&uncompressed, &temp, self.options.dry_run)
        {
            Ok(status) if status.is_success() => self.copy_into(file, &temp, destination),
            Ok(status) => {
                let code = match status {
                    CompressionStatus::Exited(code) => code,
                    CompressionStatus::Skipped => None,
                };
                self.fail(
                    file,
                    &RepairError::CompressionFailed {
                        temp: temp.clone(),
                        code,
                    },
                );
            }
            Err(err @ RepairError::TempTaken { .. }) => {
                // someone else's file now sits at `temp`
                self.fail(file, &err);
                return;
            }
            Err(err) => self.fail(file, &err),
        }

        remove_temp(&temp, self.options);
    }

    fn fail(&mut self, file: &mut BadFile, err: &RepairError) {
        error!(target: "bfx::repair::orchestrator", error = %err, "repair_step_failed");
        self.aggregator.record(file, err);
    }

    #[must_use]
    pub fn aggregator(&self) -> &ErrorAggregator {
        &self.aggregator
    }

    pub fn into_aggregator(self) -> ErrorAggregator {
        self.aggregator
    }
}

/// Best-effort temp removal. Failures are logged and otherwise ignored.
pub fn remove_temp(temp: &Path, options: &RepairOptions) {
    info!(
        target: "bfx::repair::orchestrator",
        path = %temp.display(),
        live = options.is_live(),
        "Removing temp file"
    );
    if options.dry_run {
        return;
    }
    match fs::remove_file(temp) {
        Ok(()) => {}
        Err(source) if source.kind() == io::ErrorKind::NotFound => {}
        Err(source) => {
            let err = RepairError::TempCleanup {
                path: temp.to_path_buf(),
                source,
            };
            warn!(target: "bfx::repair::orchestrator", error = %err, "temp_cleanup_failed");
        }
    }
}

/// Outcome of a whole run.
#[derive(Debug)]
pub struct RunOutcome {
    pub worklist: Vec<BadFile>,
    pub summary: RunSummary,
    pub report: FailureReport,
}

/// Repair `worklist` against `good_root` with the default collaborators.
#[must_use]
pub fn run_repair(
    mut worklist: Vec<BadFile>,
    good_root: &Path,
    options: &RepairOptions,
) -> RunOutcome {
    let mut orchestrator = RepairOrchestrator::with_defaults(good_root, options);
    let summary = orchestrator.repair_all(&mut worklist);
    let report = orchestrator.aggregator().report(&worklist);
    RunOutcome {
        worklist,
        summary,
        report,
    }
}

/// Path of the uncompressed sibling a compressed source is rebuilt from.
#[must_use]
pub fn uncompressed_sibling(source: &Path) -> PathBuf {
    source.with_extension("")
}
