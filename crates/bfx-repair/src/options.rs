//! Run-wide repair options.
//!
//! Built once by the caller and only ever borrowed by the engine.

use std::ffi::OsString;

use serde::Serialize;

/// Extension (without the dot) that marks a compressed archive member.
pub const COMPRESSED_EXTENSION: &str = "bz2";

/// How chatty the run is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors.
    Quiet,
    #[default]
    Normal,
    /// Extra path and permission detail.
    Verbose,
}

impl LogLevel {
    /// Default `tracing` filter directive for this level.
    #[must_use]
    pub const fn filter_directive(self) -> &'static str {
        match self {
            Self::Quiet => "error",
            Self::Normal => "info",
            Self::Verbose => "debug",
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Quiet => "quiet",
            Self::Normal => "normal",
            Self::Verbose => "verbose",
        }
    }
}

/// External compressor invocation: `program stdout_flag <source>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressorConfig {
    pub program: OsString,
    pub stdout_flag: String,
    pub extension: String,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            program: OsString::from("bzip2"),
            stdout_flag: "--stdout".to_owned(),
            extension: COMPRESSED_EXTENSION.to_owned(),
        }
    }
}

impl CompressorConfig {
    #[must_use]
    pub fn with_program(mut self, program: impl Into<OsString>) -> Self {
        self.program = program.into();
        self
    }
}

/// Options for one repair run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairOptions {
    /// Log every mutation instead of performing it.
    pub dry_run: bool,
    /// Temporarily grant owner-write on read-only destinations.
    pub allow_permission_change: bool,
    pub log_level: LogLevel,
    /// Print the aggregated failure list at the end.
    pub show_error_summary: bool,
    pub compressor: CompressorConfig,
}

impl Default for RepairOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            allow_permission_change: false,
            log_level: LogLevel::Normal,
            show_error_summary: true,
            compressor: CompressorConfig::default(),
        }
    }
}

impl RepairOptions {
    #[must_use]
    pub const fn is_live(&self) -> bool {
        !self.dry_run
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_command_line_defaults() {
        let options = RepairOptions::default();
        assert!(options.is_live());
        assert!(!options.allow_permission_change);
        assert!(options.show_error_summary);
        assert_eq!(options.log_level, LogLevel::Normal);
        assert_eq!(options.compressor.program, OsString::from("bzip2"));
        assert_eq!(options.compressor.extension, COMPRESSED_EXTENSION);
    }

    #[test]
    fn log_level_filter_mapping() {
        assert_eq!(LogLevel::Quiet.filter_directive(), "error");
        assert_eq!(LogLevel::Normal.filter_directive(), "info");
        assert_eq!(LogLevel::Verbose.filter_directive(), "debug");
    }
}
