//! transmog: flatten nested JSON into relational tables
//!
//! Usage:
//!   # Read from file, write every table to stdout tagged with `__table`
//!   transmog data.json --entity orders
//!
//!   # Read NDJSON from stdin
//!   cat events.jsonl | transmog --ndjson --entity events
//!
//!   # Write one .jsonl file per table
//!   transmog events.jsonl --entity events --output-dir ./tables

// Use MiMalloc allocator for better performance
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use std::io::{self, BufReader, IsTerminal, Read};
use std::path::PathBuf;
use transmog::logging::{init_logging, LogConfig, LogFormat};
use transmog::{
    ArrayMode, JsonLinesWriter, ProcessingConfig, ProcessingReport, Processor, RecordSource,
    RecoveryMode, StreamWriter,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ArrayModeArg {
    Smart,
    Separate,
    Inline,
    Skip,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RecoveryArg {
    Strict,
    Skip,
    Warn,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PresetArg {
    MemoryOptimized,
    PerformanceOptimized,
    Simple,
    ErrorTolerant,
}

#[derive(Parser, Debug)]
#[command(name = "transmog")]
#[command(about = "Flatten nested JSON into relational tables", long_about = None)]
struct Args {
    /// Input file (use stdin if omitted)
    #[arg(value_name = "FILE")]
    input: Option<PathBuf>,

    /// Name of the main table
    #[arg(long, short = 'e', default_value = "root")]
    entity: String,

    /// Treat stdin as newline-delimited JSON (files are detected by extension)
    #[arg(long)]
    ndjson: bool,

    /// Output directory for one .jsonl file per table.
    /// If omitted, writes a single stream to stdout
    #[arg(long, short = 'o')]
    output_dir: Option<PathBuf>,

    /// JSON configuration file; flags below override its values
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Start from a named preset instead of the defaults
    #[arg(long, value_enum, conflicts_with = "config")]
    preset: Option<PresetArg>,

    #[arg(long, value_enum)]
    array_mode: Option<ArrayModeArg>,

    #[arg(long, value_enum)]
    recovery: Option<RecoveryArg>,

    /// Separator for flattened names (default: "_")
    #[arg(long)]
    separator: Option<String>,

    /// Depth at which names collapse to root_nested_field (default: 4)
    #[arg(long)]
    nested_threshold: Option<usize>,

    /// Records per chunk (default: 1000)
    #[arg(long)]
    batch_size: Option<usize>,

    /// Derive ids from record location so repeated runs match
    #[arg(long)]
    deterministic_ids: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Multi-line log output
    #[arg(long)]
    pretty_logs: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_format = if args.pretty_logs {
        LogFormat::Pretty
    } else {
        LogFormat::Compact
    };
    let log_config = LogConfig::from_verbosity(args.verbose)
        .with_format(log_format)
        .with_ansi(io::stderr().is_terminal());
    if let Err(error) = init_logging(&log_config) {
        anyhow::bail!("failed to initialize logging: {error}");
    }

    let config = build_config(&args)?;
    let processor = Processor::new(config).context("invalid configuration")?;
    let source = open_source(&args)?;

    let report = if let Some(dir) = &args.output_dir {
        let mut writer = JsonLinesWriter::create(dir, &args.entity)?;
        processor.process_to_writer(source, &args.entity, &mut writer)?
    } else {
        let stdout = io::stdout().lock();
        let mut writer = StreamWriter::new(io::BufWriter::new(stdout), &args.entity);
        processor.process_to_writer(source, &args.entity, &mut writer)?
    };

    print_summary(&report);
    Ok(())
}

/// Config file or preset first, then individual flags
fn build_config(args: &Args) -> Result<ProcessingConfig> {
    let mut config = if let Some(path) = &args.config {
        ProcessingConfig::from_path(path)
            .with_context(|| format!("failed to load config {}", path.display()))?
    } else {
        match args.preset {
            Some(PresetArg::MemoryOptimized) => ProcessingConfig::memory_optimized(),
            Some(PresetArg::PerformanceOptimized) => ProcessingConfig::performance_optimized(),
            Some(PresetArg::Simple) => ProcessingConfig::simple_mode(),
            Some(PresetArg::ErrorTolerant) => ProcessingConfig::error_tolerant(),
            None => ProcessingConfig::default(),
        }
    };

    if let Some(mode) = args.array_mode {
        config.array_mode = match mode {
            ArrayModeArg::Smart => ArrayMode::Smart,
            ArrayModeArg::Separate => ArrayMode::Separate,
            ArrayModeArg::Inline => ArrayMode::Inline,
            ArrayModeArg::Skip => ArrayMode::Skip,
        };
    }
    if let Some(recovery) = args.recovery {
        config.recovery_mode = match recovery {
            RecoveryArg::Strict => RecoveryMode::Strict,
            RecoveryArg::Skip => RecoveryMode::Skip,
            RecoveryArg::Warn => RecoveryMode::Warn,
        };
    }
    if let Some(sep) = &args.separator {
        config = config.with_separator(sep.clone());
    }
    if let Some(threshold) = args.nested_threshold {
        config = config.with_nested_threshold(threshold);
    }
    if let Some(size) = args.batch_size {
        config = config.with_batch_size(size);
    }
    if args.deterministic_ids {
        config = config.with_deterministic_ids();
    }

    Ok(config)
}

fn open_source(args: &Args) -> Result<RecordSource<'static>> {
    if let Some(path) = &args.input {
        return Ok(RecordSource::File(path.clone()));
    }

    let stdin = io::stdin();
    if args.ndjson {
        return Ok(RecordSource::Reader(Box::new(BufReader::new(stdin))));
    }

    let mut content = String::new();
    stdin
        .lock()
        .read_to_string(&mut content)
        .context("failed to read stdin")?;
    Ok(RecordSource::Json(content))
}

fn print_summary(report: &ProcessingReport) {
    eprintln!("processed {} records", report.processed);
    if report.has_failures() {
        eprintln!("dropped {} records:", report.failed());
        for failure in &report.failures {
            if failure.path.is_empty() {
                eprintln!("  record {}: {}", failure.record_index, failure.message);
            } else {
                eprintln!(
                    "  record {} at '{}': {}",
                    failure.record_index, failure.path, failure.message
                );
            }
        }
    }
}
