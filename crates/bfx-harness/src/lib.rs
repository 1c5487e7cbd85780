#![forbid(unsafe_code)]
//! Fixture trees for BackFix end-to-end tests.
//!
//! A fixture is a scratch directory holding
//!
//! ```text
//! <base>/archive/<STAMP>/...   damaged archive tree
//! <base>/good/...              reference tree
//! <base>/check.log             backup-error log naming the damaged files
//! ```
//!
//! plus helpers for fake compressors and tree snapshots.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Serialize;
use walkdir::WalkDir;

/// Dated-archive directory every fixture uses.
pub const ARCHIVE_STAMP: &str = "2023.05.01_00.00.00";

/// How an entry is expected to be repaired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Reference copy has the same name; direct copy.
    Plain,
    /// Archive member is `.bz2`, reference copy is uncompressed.
    Compressed,
    /// Flagged in the log but absent from the reference tree.
    MissingReference,
}

#[derive(Debug, Clone, Serialize)]
pub struct FixtureEntry {
    pub kind: EntryKind,
    pub archive_path: PathBuf,
    pub reference_path: PathBuf,
}

/// Summary printed by `bfx-harness generate-fixture`.
#[derive(Debug, Clone, Serialize)]
pub struct FixtureManifest {
    pub log_file: PathBuf,
    pub archive_root: PathBuf,
    pub good_root: PathBuf,
    pub entries: Vec<FixtureEntry>,
}

/// Builder for an archive/reference tree pair and its error log.
#[derive(Debug)]
pub struct FixtureTree {
    base: PathBuf,
    archive_root: PathBuf,
    good_root: PathBuf,
    log_lines: Vec<String>,
    entries: Vec<FixtureEntry>,
}

impl FixtureTree {
    pub fn create(base: &Path) -> io::Result<Self> {
        let archive_root = base.join("archive").join(ARCHIVE_STAMP);
        let good_root = base.join("good");
        fs::create_dir_all(&archive_root)?;
        fs::create_dir_all(&good_root)?;
        Ok(Self {
            base: base.to_path_buf(),
            archive_root,
            good_root,
            log_lines: vec!["INFO: backup check started".to_owned()],
            entries: Vec::new(),
        })
    }

    #[must_use]
    pub fn archive_root(&self) -> &Path {
        &self.archive_root
    }

    #[must_use]
    pub fn good_root(&self) -> &Path {
        &self.good_root
    }

    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.base.join("check.log")
    }

    #[must_use]
    pub fn archive_path(&self, relative: &str) -> PathBuf {
        self.archive_root.join(relative)
    }

    #[must_use]
    pub fn entries(&self) -> &[FixtureEntry] {
        &self.entries
    }

    /// Damaged `relative` with a same-named good copy.
    pub fn plain(&mut self, relative: &str, good: &[u8], corrupt: &[u8]) -> io::Result<PathBuf> {
        let reference = self.good_root.join(relative);
        write_with_parents(&reference, good)?;
        self.flag(EntryKind::Plain, relative, corrupt, reference)
    }

    /// Damaged `relative.bz2` whose good copy exists only uncompressed.
    pub fn compressed(
        &mut self,
        relative: &str,
        plain: &[u8],
        corrupt: &[u8],
    ) -> io::Result<PathBuf> {
        let reference = self.good_root.join(relative);
        write_with_parents(&reference, plain)?;
        let archived = format!("{relative}.bz2");
        self.flag(EntryKind::Compressed, &archived, corrupt, reference)
    }

    /// Damaged `relative` with nothing to repair it from.
    pub fn missing_reference(&mut self, relative: &str, corrupt: &[u8]) -> io::Result<PathBuf> {
        let reference = self.good_root.join(relative);
        self.flag(EntryKind::MissingReference, relative, corrupt, reference)
    }

    /// A log line that is not a repair request.
    pub fn noise(&mut self, line: &str) {
        self.log_lines.push(line.to_owned());
    }

    fn flag(
        &mut self,
        kind: EntryKind,
        relative: &str,
        corrupt: &[u8],
        reference_path: PathBuf,
    ) -> io::Result<PathBuf> {
        let archive_path = self.archive_root.join(relative);
        write_with_parents(&archive_path, corrupt)?;
        self.log_lines.push(format!(
            "ERROR: verification failed <{}>",
            archive_path.display()
        ));
        self.entries.push(FixtureEntry {
            kind,
            archive_path: archive_path.clone(),
            reference_path,
        });
        Ok(archive_path)
    }

    /// Write the accumulated log and return its path.
    pub fn write_log(&self) -> io::Result<PathBuf> {
        let path = self.log_path();
        let mut text = self.log_lines.join("\n");
        text.push('\n');
        fs::write(&path, text)?;
        Ok(path)
    }

    /// Files under the archive tree whose names contain `~`.
    pub fn temp_leftovers(&self) -> io::Result<Vec<PathBuf>> {
        Ok(list_files(&self.archive_root)?
            .into_iter()
            .filter(|path| {
                path.file_name()
                    .is_some_and(|name| name.to_string_lossy().contains('~'))
            })
            .collect())
    }

    #[must_use]
    pub fn manifest(&self) -> FixtureManifest {
        FixtureManifest {
            log_file: self.log_path(),
            archive_root: self.archive_root.clone(),
            good_root: self.good_root.clone(),
            entries: self.entries.clone(),
        }
    }
}

fn write_with_parents(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, bytes)
}

/// All non-directory entries below `root`, sorted.
pub fn list_files(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_dir() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Bytes and permission bits of every file below `root`.
pub fn snapshot(root: &Path) -> io::Result<BTreeMap<PathBuf, (Vec<u8>, u32)>> {
    let mut state = BTreeMap::new();
    for path in list_files(root)? {
        let mode = fs::metadata(&path)?.permissions().mode() & 0o7777;
        let bytes = fs::read(&path)?;
        state.insert(path, (bytes, mode));
    }
    Ok(state)
}

/// Write a shell compressor that emits its source unchanged and then
/// exits with `exit_code`. Invoked as `<script> --stdout <source>`.
pub fn write_fake_compressor(dir: &Path, exit_code: i32) -> io::Result<PathBuf> {
    let script = dir.join(format!("fake-compress-{exit_code}.sh"));
    fs::write(
        &script,
        format!("#!/bin/sh\ncat \"$2\" || exit 9\nexit {exit_code}\n"),
    )?;
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755))?;
    Ok(script)
}

/// Whether a real `bzip2` is on `$PATH`.
#[must_use]
pub fn bzip2_available() -> bool {
    Command::new("bzip2")
        .arg("--help")
        .output()
        .is_ok_and(|out| out.status.success())
}

/// Decompress `path` with the real `bzip2`.
pub fn bunzip(path: &Path) -> io::Result<Vec<u8>> {
    let out = Command::new("bzip2").arg("-dc").arg(path).output()?;
    if !out.status.success() {
        return Err(io::Error::other(format!(
            "bzip2 -dc {} failed: {}",
            path.display(),
            String::from_utf8_lossy(&out.stderr)
        )));
    }
    Ok(out.stdout)
}
