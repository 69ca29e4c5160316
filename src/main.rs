use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::Context as _;
use clap::error::ErrorKind;
use clap::Parser;

use seq_sift::config::{self, Config, HitSource, Projection};
use seq_sift::driver;
use seq_sift::error::{Result, EXIT_CONFIG, EXIT_RUNTIME};

/// Extract and filter sequences from large FASTA files.
#[derive(Debug, Parser)]
#[command(name = "seqsift", version)]
struct Cli {
    /// Input FASTA file.
    #[arg(short, long)]
    query: PathBuf,

    /// Output path base; must differ from every input file.
    #[arg(short, long, default_value = config::DEFAULT_OUTPUT)]
    output: PathBuf,

    /// Maximum number of sequences to extract (single-worker runs only).
    #[arg(short, long)]
    count: Option<i64>,

    /// Sequence length to extract: N, A:B, :B or A: (repeatable, up to 5
    /// exact and 5 range options).
    #[arg(short, long)]
    length: Vec<String>,

    /// Annotation field count: positive = first N fields with sequence,
    /// negative = first N fields only, 0 = sequence only.
    #[arg(short, long, allow_hyphen_values = true)]
    annot: Option<i64>,

    /// Maximum output bytes per worker: N, NKB, NMB or NGB.
    #[arg(short, long)]
    bytes: Option<String>,

    /// Blast table file with query and hit IDs; requires --pipe.
    #[arg(short, long)]
    table: Option<PathBuf>,

    /// Pipeline program fed by the extraction: 1 = HMMER, 2 = MUSCLE
    /// (reserved).
    #[arg(short, long)]
    pipe: Option<u8>,

    /// File of hit IDs to extract, one per line.
    #[arg(short, long)]
    search: Option<PathBuf>,

    /// Progress reporting.
    #[arg(short, long)]
    verbose: bool,

    /// Debug reporting.
    #[arg(long, hide = true)]
    trace: bool,

    /// Worker count; the input is partitioned across this many workers.
    #[arg(short, long, default_value_t = 1)]
    workers: usize,
}

impl Cli {
    fn into_config(self) -> Result<Config> {
        let mut cfg = Config {
            query: self.query,
            output: self.output,
            workers: self.workers,
            verbose: self.verbose,
            ..Config::default()
        };
        if let Some(count) = self.count {
            if count < 0 {
                return Err(seq_sift::Error::Config(format!(
                    "invalid sequence count = {} (count must be 0 or greater)",
                    count
                )));
            }
            cfg.max_records = count as u64;
        }
        for spec in &self.length {
            cfg.lengths.add_spec(spec)?;
        }
        if let Some(annot) = self.annot {
            cfg.projection = Projection::from_annot_count(annot)?;
        }
        if let Some(bytes) = &self.bytes {
            cfg.byte_budget = config::parse_byte_limit(bytes)?;
        }
        if let Some(pipe) = self.pipe {
            if pipe > 2 {
                return Err(seq_sift::Error::Config(format!(
                    "invalid pipe program = {} (0 = NONE, 1 = HMMER, 2 = MUSCLE)",
                    pipe
                )));
            }
            cfg.pipe_mode = pipe;
        }
        match (self.table, self.search) {
            (Some(_), Some(_)) => {
                return Err(seq_sift::Error::Config(
                    "conflict between pipeline and search mode".into(),
                ))
            }
            (Some(table), None) => {
                if cfg.pipe_mode == 0 {
                    log::warn!("ignoring blast table file, pipe mode is not set");
                } else {
                    cfg.hit_source = HitSource::Table(table);
                }
            }
            (None, Some(search)) => cfg.hit_source = HitSource::Search(search),
            (None, None) => {}
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e)
            if matches!(
                e.kind(),
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
            ) =>
        {
            // exits 0 after printing usage
            e.exit()
        }
        Err(e) => {
            eprintln!("{}", e);
            return exit_code(EXIT_CONFIG);
        }
    };

    init_logging(cli.verbose, cli.trace);

    let cfg = match cli.into_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{}", e);
            return exit_code(e.exit_code());
        }
    };
    if cfg.verbose {
        cfg.report();
    }

    let start = Instant::now();
    let result = driver::execute(&cfg)
        .with_context(|| format!("extraction from {} failed", cfg.query.display()));
    match result {
        Ok(summary) => {
            log::info!(
                "done: {} records, {} bytes, {} worker(s), {:.3}s",
                summary.records,
                summary.bytes_written,
                summary.workers,
                start.elapsed().as_secs_f64()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{:#}", e);
            exit_code(EXIT_RUNTIME)
        }
    }
}

fn init_logging(verbose: bool, trace: bool) {
    let mut builder = env_logger::Builder::from_default_env();
    if trace {
        builder.filter_level(log::LevelFilter::Debug);
    } else if verbose {
        builder.filter_level(log::LevelFilter::Info);
    }
    builder.format_timestamp(None).init();
}

/// Wraps the C-style negative exit codes for `ExitCode`.
fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(code as u8)
}
