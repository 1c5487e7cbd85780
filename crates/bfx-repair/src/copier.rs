//! Permission-aware in-place copy.
//!
//! The destination must already exist; its bytes are replaced, never its
//! inode or mode. When the caller allows it, a read-only destination gets
//! owner-write for the duration of the copy through a [`PermissionGuard`],
//! which puts the original bits back on every exit path.

use std::fs::{self, File, OpenOptions, Permissions};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::error::RepairError;
use crate::options::RepairOptions;

const OWNER_WRITE: u32 = 0o200;

/// What the copy step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyAction {
    Copied { bytes: u64 },
    /// Dry run: nothing touched.
    WouldCopy,
    /// A failure kept the copy from completing.
    Failed,
}

/// Result of one permissioned copy.
///
/// `errors` lists every failure in the order it happened. The first one is
/// the operation's status; later ones (such as a failed permission restore
/// after a failed copy) are kept for the report.
#[derive(Debug)]
pub struct CopyOutcome {
    pub action: CopyAction,
    pub errors: Vec<RepairError>,
}

impl CopyOutcome {
    pub fn status(&self) -> Result<(), &RepairError> {
        self.errors.first().map_or(Ok(()), Err)
    }

    /// Zero when every step succeeded, otherwise the first error's code.
    #[must_use]
    pub fn status_code(&self) -> i32 {
        self.errors.first().map_or(0, RepairError::status_code)
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

// ── PermissionGuard ─────────────────────────────────────────────────────────

/// Temporary owner-write grant on one file.
///
/// Call [`PermissionGuard::release`] to restore the original bits and see
/// whether that worked. If the guard is dropped without release (for
/// example during unwinding) the restore is still attempted, silently.
#[derive(Debug)]
pub struct PermissionGuard {
    path: PathBuf,
    original: u32,
    applied: bool,
}

impl PermissionGuard {
    /// Grant owner-write on `path` if it lacks it and `live` is set.
    ///
    /// Returns the guard together with the apply error, if any. A failed
    /// apply yields a guard that has nothing to restore.
    pub fn acquire(path: &Path, original: u32, live: bool) -> (Self, Option<RepairError>) {
        let mut guard = Self {
            path: path.to_path_buf(),
            original,
            applied: false,
        };
        if original & OWNER_WRITE != 0 {
            return (guard, None);
        }

        let modified = original | OWNER_WRITE;
        debug!(
            target: "bfx::repair::copy",
            path = %path.display(),
            from = format_args!("{original:o}"),
            to = format_args!("{modified:o}"),
            live,
            "permission_change"
        );
        if !live {
            return (guard, None);
        }

        match fs::set_permissions(path, Permissions::from_mode(modified)) {
            Ok(()) => {
                guard.applied = true;
                (guard, None)
            }
            Err(source) => (
                guard,
                Some(RepairError::PermissionChange {
                    path: path.to_path_buf(),
                    mode: modified,
                    source,
                }),
            ),
        }
    }

    /// Whether a permission change is currently in effect.
    #[must_use]
    pub fn is_applied(&self) -> bool {
        self.applied
    }

    /// Restore the original bits if they were changed.
    pub fn release(mut self) -> Result<(), RepairError> {
        if !self.applied {
            return Ok(());
        }
        self.applied = false;
        debug!(
            target: "bfx::repair::copy",
            path = %self.path.display(),
            mode = format_args!("{:o}", self.original),
            "permission_restore"
        );
        fs::set_permissions(&self.path, Permissions::from_mode(self.original)).map_err(|source| {
            RepairError::PermissionRestore {
                path: self.path.clone(),
                mode: self.original,
                source,
            }
        })
    }
}

impl Drop for PermissionGuard {
    fn drop(&mut self) {
        if self.applied {
            let _ = fs::set_permissions(&self.path, Permissions::from_mode(self.original));
        }
    }
}

// ── Copy ────────────────────────────────────────────────────────────────────

/// Copy `source` over the existing `destination`.
///
/// 1. Read the destination's mode.
/// 2. With `allow_permission_change`, add owner-write if missing. A failure
///    here is logged and the copy is tried anyway.
/// 3. Copy the bytes (skipped under dry run).
/// 4. Restore the mode if step 2 changed it, whatever happened in step 3.
pub fn copy_with_permissions(
    source: &Path,
    destination: &Path,
    options: &RepairOptions,
) -> CopyOutcome {
    let mut errors = Vec::new();

    let original = match fs::metadata(destination) {
        Ok(metadata) => metadata.permissions().mode(),
        Err(source) => {
            let err = RepairError::Inspect {
                path: destination.to_path_buf(),
                source,
            };
            error!(target: "bfx::repair::copy", error = %err, "destination_unreadable");
            errors.push(err);
            return CopyOutcome {
                action: CopyAction::Failed,
                errors,
            };
        }
    };

    let guard = if options.allow_permission_change {
        let (guard, apply_error) =
            PermissionGuard::acquire(destination, original, options.is_live());
        if let Some(err) = apply_error {
            warn!(target: "bfx::repair::copy", error = %err, "permission_change_failed");
        }
        Some(guard)
    } else {
        None
    };

    info!(
        target: "bfx::repair::copy",
        from = %source.display(),
        to = %destination.display(),
        live = options.is_live(),
        "copy"
    );
    let action = if options.is_live() {
        match copy_contents(source, destination) {
            Ok(bytes) => CopyAction::Copied { bytes },
            Err(source) => {
                let err = RepairError::Copy {
                    destination: destination.to_path_buf(),
                    source,
                };
                error!(target: "bfx::repair::copy", error = %err, "copy_failed");
                errors.push(err);
                CopyAction::Failed
            }
        }
    } else {
        CopyAction::WouldCopy
    };

    if let Some(guard) = guard {
        if let Err(err) = guard.release() {
            error!(target: "bfx::repair::copy", error = %err, "permission_restore_failed");
            errors.push(err);
        }
    }

    CopyOutcome { action, errors }
}

/// Overwrite `destination`'s bytes with `source`'s, leaving its mode alone.
fn copy_contents(source: &Path, destination: &Path) -> io::Result<u64> {
    let mut reader = File::open(source)?;
    let mut writer = OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(destination)?;
    let bytes = io::copy(&mut reader, &mut writer)?;
    writer.sync_all()?;
    Ok(bytes)
}
