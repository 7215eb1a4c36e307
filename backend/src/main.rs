//! Flightclean CLI - clean batches of flight trajectory logs
//!
//! # Main Commands
//!
//! ```bash
//! flightclean clean logs/ -o cleaned/          # Run the default profile over a directory
//! flightclean clean a.csv b.csv -p profile.json # Run a custom profile
//! flightclean serve                            # Start HTTP server (port 3000)
//! ```
//!
//! # Inspection Commands
//!
//! ```bash
//! flightclean analyze flight.csv        # Column profile and baseline statistics
//! flightclean profile default           # Print the default cleaning profile
//! flightclean profile validate p.json   # Validate a profile document
//! ```

use clap::{Parser, Subcommand};
use flightclean::{
    CleaningProfile, ConfigError, FileAnalysis, FileIngestor, PipelineExecutor, Session,
};
use flightclean::transform::TracingReporter;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "flightclean")]
#[command(about = "Batch cleaning pipeline for flight trajectory logs", long_about = None)]
struct Cli {
    /// Log filter when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Worker threads for per-file stages (default: available parallelism)
    #[arg(long, global = true, env = "FLIGHTCLEAN_WORKERS")]
    workers: Option<usize>,

    /// Rows per chunk between cancellation checks
    #[arg(long, global = true, env = "FLIGHTCLEAN_CHUNK_ROWS", default_value = "50000")]
    chunk_rows: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a cleaning profile over a batch and export the survivors
    Clean {
        /// Input files or directories (directories contribute their *.csv files)
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Cleaning profile JSON (default profile if omitted)
        #[arg(short, long)]
        profile: Option<PathBuf>,

        /// Output directory for cleaned files and batch_summary.json
        #[arg(short, long, default_value = "cleaned")]
        output: PathBuf,

        /// Also write the per-file lineage as JSON
        #[arg(long)]
        lineage: Option<PathBuf>,
    },

    /// Profile the columns and baseline kinematics of one file
    Analyze {
        /// Input file
        input: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Inspect cleaning profiles
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },

    /// Start HTTP server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000", env = "FLIGHTCLEAN_PORT")]
        port: u16,
    },
}

#[derive(Subcommand)]
enum ProfileAction {
    /// Print the default profile
    Default {
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate a profile document
    Validate {
        /// Profile JSON file
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    // Load .env file (if present)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)))
        .init();

    let mut executor = PipelineExecutor::new()
        .with_chunk_rows(cli.chunk_rows)
        .with_progress(Arc::new(TracingReporter));
    if let Some(workers) = cli.workers {
        executor = executor.with_workers(workers);
    }

    let result = match cli.command {
        Commands::Clean {
            inputs,
            profile,
            output,
            lineage,
        } => cmd_clean(&executor, &inputs, profile.as_deref(), &output, lineage.as_deref()).await,

        Commands::Analyze { input, output } => cmd_analyze(&input, cli.chunk_rows, output.as_deref()),

        Commands::Profile { action } => cmd_profile(action),

        Commands::Serve { port } => cmd_serve(port, executor).await,
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

/// Expand directories into their CSV files, sorted by name.
fn collect_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>, Box<dyn std::error::Error>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = fs::read_dir(input)?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| {
                    p.is_file()
                        && p.extension()
                            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
                })
                .collect();
            found.sort();
            files.extend(found);
        } else {
            files.push(input.clone());
        }
    }
    Ok(files)
}

async fn cmd_clean(
    executor: &PipelineExecutor,
    inputs: &[PathBuf],
    profile_path: Option<&Path>,
    output: &Path,
    lineage_path: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let profile = match profile_path {
        Some(path) => CleaningProfile::load(path)?,
        None => CleaningProfile::default(),
    };
    eprintln!("🧹 Profile '{}' ({} stages)", profile.name, profile.stages.len());

    let mut session = Session::new(profile)?.with_ingestor(FileIngestor::default().with_chunk_rows(executor.chunk_rows()));
    for path in collect_inputs(inputs)? {
        session.add_path(&path);
    }
    eprintln!("📄 {} files loaded", session.files().len());

    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n⏹  Cancelling after the current chunk...");
                cancel.cancel();
            }
        })
    };

    let report = session.run(executor, &cancel).await?.clone();
    watcher.abort();

    eprintln!("\n📊 Run {} ({} ms)", report.run, report.duration_ms);
    eprintln!("   Active:    {}", report.files_active);
    eprintln!("   Excluded:  {}", report.files_excluded);
    eprintln!("   Cache:     {} hits, {} misses", report.cache_hits, report.cache_misses);

    if report.cancelled {
        eprintln!("   Cancelled: {} files not processed, nothing exported", report.files_cancelled);
        return Ok(());
    }

    if let Some(anomaly) = session.anomaly_report() {
        for entry in &anomaly.flagged {
            eprintln!("   ⚠️  Anomalous: {}", entry.file);
        }
    }

    let summary = session.export(output)?;
    eprintln!(
        "\n💾 {} files written to {} ({:.1}% data reduction)",
        summary.files_exported,
        output.display(),
        summary.data_reduction_percentage
    );

    if let Some(path) = lineage_path {
        let lineage = session.lineage();
        let history: BTreeMap<String, _> = lineage
            .files()
            .into_iter()
            .map(|file| {
                let entries = lineage.history(&file);
                (file, entries)
            })
            .collect();
        fs::write(path, serde_json::to_string_pretty(&history)?)?;
        eprintln!("   Lineage saved to: {}", path.display());
    }

    Ok(())
}

fn cmd_analyze(input: &Path, chunk_rows: usize, output: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("📄 Analyzing: {}", input.display());

    let bytes = fs::read(input)?;
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| input.display().to_string());
    let source = flightclean::parser::source_info(0, name, &bytes);
    let ingested = FileIngestor::default()
        .with_chunk_rows(chunk_rows)
        .ingest_bytes(&bytes, &CancellationToken::new())?;

    eprintln!("   Encoding: {}", ingested.encoding);
    eprintln!("   Delimiter: '{}'", ingested.delimiter.escape_default());
    if ingested.headerless {
        eprintln!("   No header row: canonical fields assumed");
    }
    for err in &ingested.row_errors {
        eprintln!("   Skipped: {}", err);
    }

    let analysis = FileAnalysis::new(&source, &ingested.dataset, &ingested.baseline, ingested.rows_skipped);
    write_output(&serde_json::to_string_pretty(&analysis)?, output)
}

fn cmd_profile(action: ProfileAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        ProfileAction::Default { output } => {
            write_output(&CleaningProfile::default().to_json()?, output.as_deref())
        }
        ProfileAction::Validate { file } => {
            eprintln!("✔️  Validating: {}", file.display());
            match CleaningProfile::load(&file) {
                Ok(profile) => {
                    eprintln!("✅ Profile '{}' is valid ({} stages)", profile.name, profile.stages.len());
                    Ok(())
                }
                Err(ConfigError::Schema { errors }) => {
                    for err in errors.iter().take(10) {
                        eprintln!("   - {}", err);
                    }
                    Err(format!("{} schema errors", errors.len()).into())
                }
                Err(e) => Err(e.into()),
            }
        }
    }
}

async fn cmd_serve(port: u16, executor: PipelineExecutor) -> Result<(), Box<dyn std::error::Error>> {
    flightclean::server::start_server(port, executor).await?;
    Ok(())
}

fn write_output(content: &str, path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    match path {
        Some(p) => {
            fs::write(p, content)?;
            eprintln!("💾 Output written to: {}", p.display());
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}
