//! Per-file failure aggregation and the end-of-run report.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::error::RepairError;
use crate::worklist::BadFile;

/// Tracks which files of a run have failed, in first-failure order.
///
/// A file is identified by its worklist position together with its archive
/// path, so files that were never numbered stay apart.
#[derive(Debug, Default)]
pub struct ErrorAggregator {
    failed: Vec<(usize, PathBuf)>,
}

impl ErrorAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `error` to `file`'s list; the first error enrolls the file.
    pub fn record(&mut self, file: &mut BadFile, error: &RepairError) {
        file.errors.push(error.to_string());
        if file.errors.len() == 1 {
            self.failed.push((file.seq, file.archive_path.clone()));
        }
    }

    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    /// Sequence numbers of failed files.
    pub fn failed_seqs(&self) -> impl Iterator<Item = usize> + '_ {
        self.failed.iter().map(|(seq, _)| *seq)
    }

    /// Collect the failed entries of `worklist` into a report.
    #[must_use]
    pub fn report(&self, worklist: &[BadFile]) -> FailureReport {
        let files = self
            .failed
            .iter()
            .filter_map(|(seq, path)| {
                worklist
                    .iter()
                    .find(|file| file.seq == *seq && file.archive_path == *path)
            })
            .map(|file| FailedFile {
                path: file.archive_path.clone(),
                errors: file.errors.clone(),
            })
            .collect();
        FailureReport { files }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedFile {
    pub path: PathBuf,
    pub errors: Vec<String>,
}

/// Files not corrected because of errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    pub files: Vec<FailedFile>,
}

impl FailureReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// One line per single-error file, a header plus indented errors otherwise.
impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for file in &self.files {
            match file.errors.as_slice() {
                [only] => writeln!(f, "{}: {only}", file.path.display())?,
                errors => {
                    writeln!(f, "{}:", file.path.display())?;
                    for error in errors {
                        writeln!(f, "   {error}")?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Counts for a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub repaired: usize,
    pub failed: usize,
    pub dry_run: bool,
}

impl RunSummary {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}
