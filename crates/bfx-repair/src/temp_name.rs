//! Collision-free temporary names next to a destination.
//!
//! Candidates look like `{n}~{base}.{extension}` with `n` drawn from
//! `1..=9999`. A candidate is taken as soon as nothing exists at its path.
//! Uniqueness is only checked against this directory at call time; no
//! cross-process guarantee is made.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use rand::Rng;
use tracing::debug;

use crate::error::{RepairError, Result};

/// Total candidates tried before giving up.
pub const MAX_TEMP_FILE_ATTEMPTS: usize = 10;

const TOKEN_RANGE: std::ops::RangeInclusive<u32> = 1..=9999;

/// Supplies the integer prefix of each candidate.
pub trait TokenSource {
    fn next_token(&mut self) -> u32;
}

/// Random tokens from any `rand` generator.
#[derive(Debug)]
pub struct RandomTokens<R>(pub R);

impl RandomTokens<rand::rngs::ThreadRng> {
    #[must_use]
    pub fn thread_local() -> Self {
        Self(rand::thread_rng())
    }
}

impl<R: Rng> TokenSource for RandomTokens<R> {
    fn next_token(&mut self) -> u32 {
        self.0.gen_range(TOKEN_RANGE)
    }
}

/// Candidate name for `token`.
#[must_use]
pub fn candidate_name(token: u32, base: &OsStr, extension: &str) -> OsString {
    let mut name = OsString::from(format!("{token}~"));
    name.push(base);
    name.push(".");
    name.push(extension);
    name
}

/// Generates temp paths with bounded retry.
#[derive(Debug)]
pub struct TempFileAllocator<S> {
    tokens: S,
    max_attempts: usize,
}

impl<S: TokenSource> TempFileAllocator<S> {
    pub fn new(tokens: S) -> Self {
        Self {
            tokens,
            max_attempts: MAX_TEMP_FILE_ATTEMPTS,
        }
    }

    /// Find a path in `directory` that does not exist yet.
    ///
    /// Tries at most [`MAX_TEMP_FILE_ATTEMPTS`] candidates. Existence checks
    /// hit the real filesystem, dry run or not.
    pub fn allocate(
        &mut self,
        directory: &Path,
        base: &OsStr,
        extension: &str,
    ) -> Result<PathBuf> {
        let mut candidate = PathBuf::new();
        for attempt in 1..=self.max_attempts {
            let name = candidate_name(self.tokens.next_token(), base, extension);
            candidate = directory.join(name);
            // symlink_metadata so a dangling link also counts as taken
            if candidate.symlink_metadata().is_err() {
                debug!(
                    target: "bfx::repair::temp",
                    path = %candidate.display(),
                    attempt,
                    "temp_name_allocated"
                );
                return Ok(candidate);
            }
            debug!(
                target: "bfx::repair::temp",
                path = %candidate.display(),
                attempt,
                "temp_name_taken"
            );
        }
        Err(RepairError::TempExhausted {
            last_candidate: candidate,
            attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::fs;
    use tempfile::TempDir;

    /// Replays a fixed token list, cycling, and counts draws.
    struct ScriptedTokens {
        tokens: Vec<u32>,
        draws: usize,
    }

    impl ScriptedTokens {
        fn new(tokens: Vec<u32>) -> Self {
            Self { tokens, draws: 0 }
        }
    }

    impl TokenSource for ScriptedTokens {
        fn next_token(&mut self) -> u32 {
            let token = self.tokens[self.draws % self.tokens.len()];
            self.draws += 1;
            token
        }
    }

    #[test]
    fn candidate_name_format() {
        assert_eq!(candidate_name(42, OsStr::new("report.txt"), "bz2"), "42~report.txt.bz2");
    }

    #[test]
    fn first_free_candidate_is_returned() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join("7~f.txt.bz2"), b"").expect("occupy");
        let mut allocator = TempFileAllocator::new(ScriptedTokens::new(vec![7, 7, 8]));
        let path = allocator.allocate(dir.path(), OsStr::new("f.txt"), "bz2").expect("free slot");
        assert_eq!(path, dir.path().join("8~f.txt.bz2"));
        assert!(!path.exists());
        assert_eq!(allocator.tokens.draws, 3);
    }

    #[test]
    fn ten_collisions_exhaust_after_exactly_ten_attempts() {
        let dir = TempDir::new().expect("tempdir");
        let tokens: Vec<u32> = (1..=10).collect();
        for token in &tokens {
            fs::write(dir.path().join(candidate_name(*token, OsStr::new("f.txt"), "bz2")), b"")
                .expect("occupy");
        }
        let mut allocator = TempFileAllocator::new(ScriptedTokens::new(tokens));
        let err = allocator
            .allocate(dir.path(), OsStr::new("f.txt"), "bz2")
            .expect_err("every candidate is taken");
        assert_eq!(allocator.tokens.draws, MAX_TEMP_FILE_ATTEMPTS);
        match err {
            RepairError::TempExhausted {
                last_candidate,
                attempts,
            } => {
                assert_eq!(attempts, 10);
                assert_eq!(last_candidate, dir.path().join("10~f.txt.bz2"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn dangling_symlink_counts_as_taken() {
        let dir = TempDir::new().expect("tempdir");
        std::os::unix::fs::symlink(
            dir.path().join("nowhere"),
            dir.path().join("3~f.txt.bz2"),
        )
        .expect("symlink");
        let mut allocator = TempFileAllocator::new(ScriptedTokens::new(vec![3, 4]));
        let path = allocator.allocate(dir.path(), OsStr::new("f.txt"), "bz2").expect("free slot");
        assert_eq!(path, dir.path().join("4~f.txt.bz2"));
    }

    #[test]
    fn random_tokens_stay_in_range() {
        let mut tokens = RandomTokens(StdRng::seed_from_u64(0xBAC0));
        for _ in 0..1000 {
            let token = tokens.next_token();
            assert!(TOKEN_RANGE.contains(&token), "{token}");
        }
    }
}
