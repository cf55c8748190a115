#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use e2s_core::{Ext2Image, PointerPolicy, Record, RemainderRule, ScanOptions};
use e2s_error::{E2sError, EXIT_CORRUPTED, EXIT_USAGE_OR_IO};
use std::env;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter. Logging is off by default.
const LOG_ENV: &str = "E2S_LOG";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum OutputFormat {
    #[default]
    Csv,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Invocation {
    image: PathBuf,
    format: OutputFormat,
    options: ScanOptions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Help,
    Dump(Invocation),
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        std::process::exit(report_failure(&err));
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("off"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

/// Print `err` and pick the exit code from the underlying `E2sError`.
fn report_failure(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<E2sError>() {
        Some(E2sError::NotExt2) => {
            eprintln!("{}", E2sError::NotExt2);
            EXIT_CORRUPTED
        }
        Some(E2sError::Usage(_)) => {
            eprintln!("error: {err:#}");
            eprint!("{}", usage());
            EXIT_USAGE_OR_IO
        }
        Some(e2s) => {
            eprintln!("error: {err:#}");
            e2s.exit_code()
        }
        None => {
            eprintln!("error: {err:#}");
            EXIT_USAGE_OR_IO
        }
    }
}

fn run() -> Result<()> {
    match parse_args(env::args().skip(1))? {
        Command::Help => {
            print!("{}", usage());
            Ok(())
        }
        Command::Dump(invocation) => dump(&invocation),
    }
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Command, E2sError> {
    let mut image = None;
    let mut surplus = false;
    let mut format = OutputFormat::default();
    let mut options = ScanOptions::default();

    for arg in args {
        match arg.as_str() {
            "-h" | "--help" => return Ok(Command::Help),
            "--json" => format = OutputFormat::Json,
            "--stop-at-first-zero" => options.pointer_policy = PointerPolicy::StopAtFirstZero,
            "--legacy-group-remainder" => options.remainder_rule = RemainderRule::LegacyModulo,
            flag if flag.starts_with('-') && flag.len() > 1 => {
                return Err(E2sError::Usage(format!("unknown option: {flag}")));
            }
            _ if image.is_some() => surplus = true,
            _ => image = Some(PathBuf::from(arg)),
        }
    }

    // A later --help still wins over an extra path.
    let (Some(image), false) = (image, surplus) else {
        return Err(E2sError::Usage("expected exactly one image path".into()));
    };
    Ok(Command::Dump(Invocation {
        image,
        format,
        options,
    }))
}

fn usage() -> String {
    [
        "e2s: dump ext2 image metadata\n",
        "\n",
        "USAGE:\n",
        "  e2s [--json] [--stop-at-first-zero] [--legacy-group-remainder] <image>\n",
        "\n",
        "OPTIONS:\n",
        "  --json                     one JSON object per record instead of CSV\n",
        "  --stop-at-first-zero       end pointer scans at the first zero pointer\n",
        "  --legacy-group-remainder   size the last group as total % per_group\n",
        "  -h, --help                 print this help\n",
        "\n",
        "Set E2S_LOG (e.g. E2S_LOG=debug) to log to stderr.\n",
    ]
    .concat()
}

fn dump(invocation: &Invocation) -> Result<()> {
    let image = Ext2Image::open(&invocation.image, invocation.options)?;
    debug!(
        image = %invocation.image.display(),
        groups = image.groups().len(),
        format = ?invocation.format,
        "dumping"
    );

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    image.for_each_record(|record| write_record(&mut out, &record, invocation.format))?;
    out.flush().context("flush report")?;
    Ok(())
}

fn write_record(out: &mut impl Write, record: &Record, format: OutputFormat) -> e2s_error::Result<()> {
    match format {
        OutputFormat::Csv => writeln!(out, "{record}")?,
        OutputFormat::Json => {
            serde_json::to_writer(&mut *out, record).map_err(io::Error::from)?;
            writeln!(out)?;
        }
    }
    Ok(())
}
