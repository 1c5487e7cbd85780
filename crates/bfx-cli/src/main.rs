#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use bfx_repair::{
    CompressorConfig, FailureReport, LogLevel, RepairOptions, RunSummary, build_worklist,
    run_repair,
};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::env::VarError;
use std::ffi::OsString;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, info_span};
use tracing_subscriber::EnvFilter;

// ── Exit status ─────────────────────────────────────────────────────────────

mod exit_code {
    pub const CLEAN: i32 = 0;
    pub const OPERATIONAL: i32 = 1;
    /// clap exits with this on its own for usage errors.
    #[allow(dead_code)]
    pub const USAGE: i32 = 2;
    pub const FILES_FAILED: i32 = 3;
}

// ── CLI definition ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Human,
    Json,
}

impl LogFormat {
    const ENV_KEY: &'static str = "BFX_LOG_FORMAT";

    fn parse(raw: &str) -> Result<Self> {
        <Self as ValueEnum>::from_str(raw.trim(), true).map_err(|_| {
            anyhow::anyhow!(
                "invalid {key}={raw:?}; expected one of: human, json",
                key = Self::ENV_KEY
            )
        })
    }

    fn from_env() -> Result<Option<Self>> {
        match std::env::var(Self::ENV_KEY) {
            Ok(value) => Ok(Some(Self::parse(&value)?)),
            Err(VarError::NotPresent) => Ok(None),
            Err(VarError::NotUnicode(_)) => {
                bail!("{key} contains non-UTF-8 bytes", key = Self::ENV_KEY)
            }
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Json => "json",
        }
    }
}

const LOG_FILTER_ENV: &str = "BFX_LOG";
const DRY_RUN_ENV: &str = "BFX_DRY_RUN";
const PERMISSIONS_ENV: &str = "BFX_ALLOW_PERMISSION_CHANGE";
const COMPRESSOR_ENV: &str = "BFX_COMPRESSOR";

/// `BFX_LOG`, then `RUST_LOG`, then the directive for `level`.
fn env_filter_for(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_env(LOG_FILTER_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level.filter_directive()))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    let value = value.trim();
    if value == "1"
        || value.eq_ignore_ascii_case("true")
        || value.eq_ignore_ascii_case("yes")
        || value.eq_ignore_ascii_case("on")
    {
        Ok(true)
    } else if value == "0"
        || value.eq_ignore_ascii_case("false")
        || value.eq_ignore_ascii_case("no")
        || value.eq_ignore_ascii_case("off")
    {
        Ok(false)
    } else {
        bail!("invalid {key}={value:?}; expected one of: 1,0,true,false,yes,no,on,off")
    }
}

fn env_bool(key: &str, default: bool) -> Result<bool> {
    match std::env::var(key) {
        Ok(value) => parse_bool(key, &value),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => bail!("{key} contains non-UTF-8 bytes"),
    }
}

fn init_logging(log_format_override: Option<LogFormat>, level: LogLevel) -> Result<LogFormat> {
    let format = log_format_override
        .or(LogFormat::from_env()?)
        .unwrap_or(LogFormat::Human);

    match format {
        LogFormat::Human => tracing_subscriber::fmt()
            .with_env_filter(env_filter_for(level))
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .compact()
            .try_init()
            .map_err(|err| anyhow::anyhow!("failed to initialize human logger: {err}"))?,
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(true)
            .with_env_filter(env_filter_for(level))
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .try_init()
            .map_err(|err| anyhow::anyhow!("failed to initialize JSON logger: {err}"))?,
    }

    Ok(format)
}

#[derive(Parser)]
#[command(
    name = "bfx",
    about = "BackFix: repair a dated backup archive from a known-good tree",
    version
)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Backup-error log naming the damaged archive files.
    log_file: PathBuf,
    /// Root of the known-good reference tree.
    good_root: PathBuf,
    /// Log what would be done without touching any file.
    #[arg(short = 'd', long)]
    dry_run: bool,
    /// Do not print the list of files that could not be repaired.
    #[arg(short = 'n', long)]
    no_error_list: bool,
    /// Temporarily add owner-write to read-only destinations.
    #[arg(short = 'p', long)]
    permissions: bool,
    /// Only report errors.
    #[arg(short = 'q', long, overrides_with = "verbose")]
    quiet: bool,
    /// Log permission bits and path decomposition too.
    #[arg(short = 'v', long, overrides_with = "quiet")]
    verbose: bool,
    /// Print the run summary and failures as JSON on stdout.
    #[arg(long)]
    json: bool,
    /// Log output format (`human` or `json`).
    ///
    /// Precedence: `--log-format` > `BFX_LOG_FORMAT` > `human`.
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
    /// Compressor program, invoked as `<PROGRAM> --stdout <source>`.
    ///
    /// Precedence: `--compressor` > `BFX_COMPRESSOR` > `bzip2`.
    #[arg(long, value_name = "PROGRAM")]
    compressor: Option<PathBuf>,
}

impl Cli {
    const fn log_level(&self) -> LogLevel {
        if self.quiet {
            LogLevel::Quiet
        } else if self.verbose {
            LogLevel::Verbose
        } else {
            LogLevel::Normal
        }
    }

    fn repair_options(&self) -> Result<RepairOptions> {
        let program: Option<OsString> = self
            .compressor
            .clone()
            .map(PathBuf::into_os_string)
            .or_else(|| std::env::var_os(COMPRESSOR_ENV).filter(|value| !value.is_empty()));
        let mut compressor = CompressorConfig::default();
        if let Some(program) = program {
            compressor = compressor.with_program(program);
        }

        Ok(RepairOptions {
            dry_run: self.dry_run || env_bool(DRY_RUN_ENV, false)?,
            allow_permission_change: self.permissions || env_bool(PERMISSIONS_ENV, false)?,
            log_level: self.log_level(),
            show_error_summary: !self.no_error_list,
            compressor,
        })
    }
}

// ── Output ──────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct RepairRunOutput<'a> {
    log_file: &'a Path,
    good_root: &'a Path,
    dry_run: bool,
    log_level: LogLevel,
    summary: RunSummary,
    failures: &'a FailureReport,
    exit_code: i32,
}

const fn exit_code_for(summary: &RunSummary) -> i32 {
    if summary.failed == 0 {
        exit_code::CLEAN
    } else {
        exit_code::FILES_FAILED
    }
}

fn print_text_report(options: &RepairOptions, report: &FailureReport) {
    if !options.show_error_summary || report.is_empty() {
        return;
    }
    if options.log_level != LogLevel::Quiet {
        println!("Files not corrected because of errors:");
    }
    print!("{report}");
}

// ── Main ────────────────────────────────────────────────────────────────────

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            eprintln!("error: {error:#}");
            std::process::exit(exit_code::OPERATIONAL);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let options = cli.repair_options()?;
    let log_format = init_logging(cli.log_format, options.log_level)?;
    let run_span = info_span!(
        target: "bfx::cli",
        "command",
        log_format = log_format.as_str(),
        level = options.log_level.as_str(),
        dry_run = options.dry_run
    );
    let _run_guard = run_span.enter();
    let started = Instant::now();

    if options.log_level != LogLevel::Quiet && !cli.json {
        println!(
            "Reading from {}, good files at {}",
            cli.log_file.display(),
            cli.good_root.display()
        );
    }
    info!(
        target: "bfx::cli",
        log_file = %cli.log_file.display(),
        good_root = %cli.good_root.display(),
        compressor = ?options.compressor.program,
        "command_start"
    );

    let log = File::open(&cli.log_file)
        .with_context(|| format!("failed to open error log {}", cli.log_file.display()))?;
    let worklist = build_worklist(BufReader::new(log), &options.compressor.extension)
        .with_context(|| format!("failed to read error log {}", cli.log_file.display()))?;

    let outcome = run_repair(worklist, &cli.good_root, &options);
    let code = exit_code_for(&outcome.summary);

    if cli.json {
        let output = RepairRunOutput {
            log_file: &cli.log_file,
            good_root: &cli.good_root,
            dry_run: options.dry_run,
            log_level: options.log_level,
            summary: outcome.summary,
            failures: &outcome.report,
            exit_code: code,
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("failed to serialize run output")?
        );
    } else {
        print_text_report(&options, &outcome.report);
    }

    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    if outcome.summary.is_clean() {
        info!(
            target: "bfx::cli",
            total = outcome.summary.total,
            repaired = outcome.summary.repaired,
            duration_ms,
            "command_succeeded"
        );
    } else {
        error!(
            target: "bfx::cli",
            total = outcome.summary.total,
            failed = outcome.summary.failed,
            duration_ms,
            "command_failed_files"
        );
    }

    Ok(code)
}
