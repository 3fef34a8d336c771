use clap::Parser;
use modhash::duplicates::find_duplicates;
use modhash::scan::scan;
use modhash::{ExtractMode, ExtractOptions, Extractor};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "modhash")]
#[command(version = "0.1.0")]
#[command(about = "Fingerprint tracker modules by their pattern data", long_about = None)]
struct Args {
    /// Module files or directories (MOD, XM; optionally gzip-wrapped)
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Effect-aware traversal with sample records and instrument names
    #[arg(short, long)]
    extended: bool,

    /// Trace every traversed cell to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Print files sharing a SHA-256 or pattern fingerprint instead of reports
    #[arg(short, long)]
    duplicates: bool,

    /// Output compact JSON (default is pretty-printed)
    #[arg(short, long)]
    compact: bool,

    /// Output JSON file (writes to stdout if not specified)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("modhash=info"));
    if args.verbose {
        filter = filter.add_directive("modhash::cells=trace".parse()?);
    }
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .with(filter)
        .init();

    let extractor = Extractor::new(ExtractOptions {
        mode: if args.extended {
            ExtractMode::Extended
        } else {
            ExtractMode::Basic
        },
        verbose: args.verbose,
    });

    let reports = scan(&args.inputs, &extractor);

    let json_value = if args.duplicates {
        serde_json::to_value(find_duplicates(&reports))?
    } else {
        serde_json::to_value(&reports)?
    };
    let json_string = if args.compact {
        serde_json::to_string(&json_value)?
    } else {
        serde_json::to_string_pretty(&json_value)?
    };

    match args.output {
        Some(path) => {
            let mut file = File::create(path)?;
            file.write_all(json_string.as_bytes())?;
            file.write_all(b"\n")?;
        }
        None => {
            println!("{}", json_string);
        }
    }

    Ok(())
}
