//! Backup-error log parsing and bad-file resolution.
//!
//! A backup checker writes one line per problem. The lines we care about
//! look like
//!
//! ```text
//! ERROR: checksum mismatch <ARCHIVE_ROOT/2023.05.01_00.00.00/sub/report.txt.bz2>
//! ```
//!
//! [`ErrorLogParser`] yields the bracketed identifier of every such line.
//! [`BadFile::resolve`] splits an identifier at its dated-archive segment
//! (`YYYY.MM.DD_HH.MM.SS`) to get the name relative to the reference tree.
//! Anything else in the log is ignored.

use std::ffi::OsStr;
use std::io::BufRead;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::bytes::Regex;
use tracing::{debug, warn};

use crate::error::{RepairError, Result};

fn error_line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?-u)^ERROR.*<(.*)>$").expect("error line pattern"))
}

fn dated_segment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?-u)^(?:.*/)?\d{4}\.\d{2}\.\d{2}_\d{2}\.\d{2}\.\d{2}/+(.+)$")
            .expect("dated segment pattern")
    })
}

// ── BadFile ─────────────────────────────────────────────────────────────────

/// One flagged archive file awaiting repair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadFile {
    /// 1-based position in the worklist (0 until enqueued).
    pub seq: usize,
    /// Path of the damaged file as recorded in the log.
    pub archive_path: PathBuf,
    /// Everything after the dated-archive segment.
    pub relative_name: PathBuf,
    /// Whether the archive path carries the compressed extension.
    ///
    /// Informational only: the orchestrator branches on the resolved
    /// source path, see [`crate::orchestrator`].
    pub is_compressed_variant: bool,
    /// Error descriptions in the order they happened.
    pub errors: Vec<String>,
}

impl BadFile {
    /// Build a `BadFile` from a raw log identifier.
    pub fn resolve(identifier: &Path, compressed_extension: &str) -> Result<Self> {
        let captures = dated_segment_pattern()
            .captures(identifier.as_os_str().as_bytes())
            .ok_or_else(|| RepairError::Unresolvable {
                identifier: identifier.display().to_string(),
            })?;
        let relative = captures.get(1).map_or(&[][..], |m| m.as_bytes());
        let relative_name = PathBuf::from(OsStr::from_bytes(relative));

        Ok(Self {
            seq: 0,
            archive_path: identifier.to_path_buf(),
            relative_name,
            is_compressed_variant: has_extension(identifier, compressed_extension),
            errors: Vec::new(),
        })
    }

    /// Location of the known-good copy under `good_root`.
    #[must_use]
    pub fn source_path(&self, good_root: &Path) -> PathBuf {
        good_root.join(&self.relative_name)
    }
}

/// Whether `path` ends in `.{extension}`.
#[must_use]
pub fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension() == Some(OsStr::new(extension))
}

// ── ErrorLogParser ──────────────────────────────────────────────────────────

/// Lazy iterator over the identifiers of a backup-error log.
///
/// Non-matching lines are skipped silently. A read failure is yielded once
/// and ends the iteration.
pub struct ErrorLogParser<R> {
    reader: R,
    buf: Vec<u8>,
    line: usize,
    done: bool,
}

impl<R: BufRead> ErrorLogParser<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            line: 0,
            done: false,
        }
    }

    /// Number of lines read so far.
    #[must_use]
    pub fn lines_read(&self) -> usize {
        self.line
    }
}

impl<R: BufRead> Iterator for ErrorLogParser<R> {
    type Item = Result<PathBuf>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => self.done = true,
                Ok(_) => {
                    self.line += 1;
                    let line = trim_line_ending(&self.buf);
                    if let Some(identifier) = match_error_line(line) {
                        return Some(Ok(identifier));
                    }
                }
                Err(source) => {
                    self.done = true;
                    return Some(Err(RepairError::LogRead {
                        line: self.line + 1,
                        source,
                    }));
                }
            }
        }
        None
    }
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Identifier of one log line, if the line is an error line.
#[must_use]
pub fn match_error_line(line: &[u8]) -> Option<PathBuf> {
    let captures = error_line_pattern().captures(line)?;
    let identifier = captures.get(1)?.as_bytes();
    Some(PathBuf::from(OsStr::from_bytes(identifier)))
}

/// Read a whole log into the repair worklist, in log order.
///
/// Identifiers without a dated-archive segment are dropped with a warning.
/// Only a failure to read the log itself is an error.
pub fn build_worklist<R: BufRead>(reader: R, compressed_extension: &str) -> Result<Vec<BadFile>> {
    let mut parser = ErrorLogParser::new(reader);
    let mut worklist = Vec::new();

    for identifier in parser.by_ref() {
        let identifier = identifier?;
        match BadFile::resolve(&identifier, compressed_extension) {
            Ok(mut bad_file) => {
                bad_file.seq = worklist.len() + 1;
                worklist.push(bad_file);
            }
            Err(err) => {
                warn!(
                    target: "bfx::repair::worklist",
                    identifier = %identifier.display(),
                    error = %err,
                    "identifier_dropped"
                );
            }
        }
    }

    debug!(
        target: "bfx::repair::worklist",
        lines = parser.lines_read(),
        bad_files = worklist.len(),
        "worklist_built"
    );
    Ok(worklist)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Cursor, Read};

    fn worklist_of(log: &str) -> Vec<BadFile> {
        build_worklist(Cursor::new(log.as_bytes().to_vec()), "bz2").expect("in-memory log")
    }

    #[test]
    fn error_line_yields_bracketed_identifier() {
        let id = match_error_line(b"ERROR: bad checksum <a/b/c>").expect("should match");
        assert_eq!(id, PathBuf::from("a/b/c"));
    }

    #[test]
    fn non_error_lines_are_skipped() {
        assert!(match_error_line(b"WARNING: slow <a/b>").is_none());
        assert!(match_error_line(b" ERROR leading space <a/b>").is_none());
        assert!(match_error_line(b"ERROR: no brackets").is_none());
        assert!(match_error_line(b"ERROR: trailing text <a/b> after").is_none());
    }

    #[test]
    fn resolve_strips_dated_segment() {
        let bad = BadFile::resolve(
            Path::new("/backup/host/2023.05.01_00.00.00/sub/report.txt.bz2"),
            "bz2",
        )
        .expect("resolvable");
        assert_eq!(bad.relative_name, PathBuf::from("sub/report.txt.bz2"));
        assert!(bad.is_compressed_variant);
        assert!(bad.errors.is_empty());
    }

    #[test]
    fn resolve_accepts_segment_at_start() {
        let bad = BadFile::resolve(Path::new("2023.05.01_00.00.00/sub/report.txt"), "bz2")
            .expect("resolvable");
        assert_eq!(bad.relative_name, PathBuf::from("sub/report.txt"));
        assert!(!bad.is_compressed_variant);
    }

    #[test]
    fn resolve_uses_last_dated_segment() {
        let bad = BadFile::resolve(
            Path::new("/b/2020.01.01_00.00.00/nested/2021.02.03_04.05.06/x.txt"),
            "bz2",
        )
        .expect("resolvable");
        assert_eq!(bad.relative_name, PathBuf::from("x.txt"));
    }

    #[test]
    fn resolve_rejects_missing_or_malformed_segment() {
        for id in [
            "/backup/latest/sub/file.txt",
            "/backup/2023.5.01_00.00.00/file.txt",
            "/backup/2023.05.01-00.00.00/file.txt",
            "/backup/2023.05.01_00.00.00",
            "/backup/2023.05.01_00.00.00/",
        ] {
            let err = BadFile::resolve(Path::new(id), "bz2").expect_err(id);
            assert!(matches!(err, RepairError::Unresolvable { .. }), "{id}: {err}");
        }
    }

    #[test]
    fn source_path_joins_reference_root() {
        let bad = BadFile::resolve(Path::new("/a/2023.05.01_00.00.00/sub/f"), "bz2")
            .expect("resolvable");
        assert_eq!(
            bad.source_path(Path::new("/good")),
            PathBuf::from("/good/sub/f")
        );
    }

    #[test]
    fn worklist_preserves_log_order_and_numbers_entries() {
        let log = "\
INFO: starting check
ERROR: mismatch </arc/2023.05.01_00.00.00/one.txt>
ERROR: mismatch </arc/latest/unresolvable.txt>
note: something else
ERROR: missing </arc/2023.05.01_00.00.00/dir/two.txt.bz2>
";
        let worklist = worklist_of(log);
        assert_eq!(worklist.len(), 2);
        assert_eq!(worklist[0].seq, 1);
        assert_eq!(worklist[0].relative_name, PathBuf::from("one.txt"));
        assert_eq!(worklist[1].seq, 2);
        assert_eq!(worklist[1].relative_name, PathBuf::from("dir/two.txt.bz2"));
        assert!(worklist[1].is_compressed_variant);
    }

    #[test]
    fn crlf_line_endings_are_accepted() {
        let worklist = worklist_of("ERROR x </a/2023.05.01_00.00.00/f.txt>\r\n");
        assert_eq!(worklist.len(), 1);
        assert_eq!(worklist[0].relative_name, PathBuf::from("f.txt"));
    }

    #[test]
    fn last_line_without_newline_is_parsed() {
        let worklist = worklist_of("ERROR x </a/2023.05.01_00.00.00/f.txt>");
        assert_eq!(worklist.len(), 1);
    }

    #[test]
    fn non_utf8_identifiers_survive() {
        let mut log = b"ERROR x </a/2023.05.01_00.00.00/caf".to_vec();
        log.push(0xE9);
        log.extend_from_slice(b".txt>\n");
        let worklist = build_worklist(Cursor::new(log), "bz2").expect("bytes log");
        assert_eq!(worklist.len(), 1);
        assert_eq!(
            worklist[0].relative_name.as_os_str().as_bytes(),
            b"caf\xE9.txt"
        );
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("disk gone"))
        }
    }

    #[test]
    fn read_failure_is_reported_once() {
        let mut parser = ErrorLogParser::new(io::BufReader::new(FailingReader));
        let first = parser.next().expect("one item");
        assert!(matches!(first, Err(RepairError::LogRead { line: 1, .. })));
        assert!(parser.next().is_none());
    }
}
