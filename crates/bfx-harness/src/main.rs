#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use bfx_harness::FixtureTree;
use std::env;
use std::path::Path;

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let cmd = args.first().map(String::as_str);

    match cmd {
        Some("generate-fixture") => generate_fixture(&args[1..]),
        Some("--help" | "-h" | "help") | None => {
            print_usage();
            Ok(())
        }
        Some(other) => {
            print_usage();
            bail!("unknown command: {other}")
        }
    }
}

fn generate_fixture(args: &[String]) -> Result<()> {
    let Some(dir) = args.first() else {
        bail!("usage: bfx-harness generate-fixture <dir>");
    };
    let base = Path::new(dir);
    if base.exists() && base.read_dir()?.next().is_some() {
        bail!("{} is not empty", base.display());
    }

    let mut fixture = FixtureTree::create(base)
        .with_context(|| format!("failed to create fixture under {}", base.display()))?;
    fixture.noise("INFO: 3 archives scanned");
    fixture.plain("docs/notes.txt", b"known good notes\n", b"bit rot\n")?;
    fixture.compressed("sub/report.txt", b"quarterly numbers\n", b"\x00\x00\x00")?;
    fixture.missing_reference("lost/gone.txt", b"orphan\n")?;
    fixture.noise("WARNING: slow disk <not an error>");
    fixture.write_log().context("failed to write error log")?;

    println!("{}", serde_json::to_string_pretty(&fixture.manifest())?);
    Ok(())
}

fn print_usage() {
    println!("bfx-harness - fixture trees for BackFix");
    println!();
    println!("USAGE:");
    println!("  bfx-harness generate-fixture <dir>");
    println!();
    println!("Builds <dir>/archive/<stamp>, <dir>/good and <dir>/check.log with one");
    println!("plain, one compressed and one unrepairable entry, then prints a JSON");
    println!("manifest. Run it against `bfx <dir>/check.log <dir>/good`.");
}
