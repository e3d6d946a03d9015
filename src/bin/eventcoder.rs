//! Eventcoder CLI: batch protest-event coding with resumable progress.
//!
//! Usage:
//!   eventcoder run --input in.csv --output out.csv [--resume] [--limit N]
//!   eventcoder status [--checkpoint path]

use clap::{Args, Parser, Subcommand};
use eventcoder::{
    exceeds_tolerance, exit_code_for_error, load_csv, run_exit_code, BatchOrchestrator, CsvSink, OpenAiOracle,
    OpenCheckpoint, PipelineConfig, ProgressStore, PromptTemplate, RecordStatus, SqliteCheckpoint, EXIT_FORCED,
    EXIT_OK, EXIT_STARTUP, EXIT_STORAGE,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "eventcoder",
    version,
    about = "Label newspaper records with protest-event codes using a language model"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Label every unfinished record of an input table
    Run(RunArgs),
    /// Show checkpoint progress and the run log
    Status {
        /// Path to the checkpoint database
        #[arg(long)]
        checkpoint: Option<PathBuf>,
        /// YAML configuration file
        #[arg(long, env = "EVENTCODER_CONFIG")]
        config: Option<PathBuf>,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Input CSV with Title, Abstract and PubDate columns
    #[arg(long)]
    input: PathBuf,
    /// Output CSV (input columns plus labels)
    #[arg(long)]
    output: PathBuf,
    /// Continue an existing checkpoint
    #[arg(long)]
    resume: bool,
    /// Label at most N records in this run
    #[arg(long)]
    limit: Option<usize>,
    /// YAML configuration file
    #[arg(long, env = "EVENTCODER_CONFIG")]
    config: Option<PathBuf>,
    /// Path to the checkpoint database
    #[arg(long)]
    checkpoint: Option<PathBuf>,
    /// Maximum concurrent oracle calls
    #[arg(long)]
    concurrency: Option<usize>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<PipelineConfig, String> {
    let mut config = PipelineConfig::load(path.map(PathBuf::as_path)).map_err(|e| e.to_string())?;
    config.apply_process_env().map_err(|e| e.to_string())?;
    Ok(config)
}

fn cmd_run(args: RunArgs) -> i32 {
    let mut config = match load_config(args.config.as_ref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_STARTUP;
        }
    };
    if let Some(path) = args.checkpoint {
        config.checkpoint_path = Some(path);
    }
    if let Some(n) = args.concurrency {
        config.concurrency_limit = n;
    }
    if let Err(e) = config.validate() {
        eprintln!("Error: invalid configuration: {}", e);
        return EXIT_STARTUP;
    }

    let template = match &config.template_path {
        Some(path) => match PromptTemplate::from_file(path) {
            Ok(t) => t,
            Err(e) => {
                eprintln!("Error: cannot read template {}: {}", path.display(), e);
                return EXIT_STARTUP;
            }
        },
        None => PromptTemplate::builtin(),
    };
    let settings = match config.openai_settings() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_STARTUP;
        }
    };
    let oracle = match OpenAiOracle::new(settings, template) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Error: cannot create oracle client: {}", e);
            return EXIT_STARTUP;
        }
    };

    let table = match load_csv(&args.input) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Error: cannot load {}: {}", args.input.display(), e);
            return EXIT_STARTUP;
        }
    };

    let checkpoint_path = config.checkpoint_path();
    let checkpoint = match SqliteCheckpoint::open(&checkpoint_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: cannot open checkpoint {}: {}", checkpoint_path.display(), e);
            return EXIT_STORAGE;
        }
    };
    match checkpoint.load_progress() {
        Ok(progress) if !progress.is_empty() && !args.resume => {
            eprintln!(
                "Error: checkpoint {} already tracks {} records; pass --resume to continue it or choose another --checkpoint",
                checkpoint_path.display(),
                progress.len()
            );
            return EXIT_STARTUP;
        }
        Ok(_) => {}
        Err(e) => {
            eprintln!("Error: cannot read checkpoint: {}", e);
            return EXIT_STORAGE;
        }
    }

    info!(
        input = %args.input.display(),
        records = table.len(),
        checkpoint = %checkpoint_path.display(),
        model = %config.model,
        "loaded input"
    );

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to create tokio runtime: {}", e);
            return EXIT_STARTUP;
        }
    };

    let orchestrator = BatchOrchestrator::from_config(&config, Arc::new(oracle)).with_limit(args.limit);
    let mut sink = CsvSink::create(&args.output, &table).with_flush_every(config.flush_every);

    let result = rt.block_on(async {
        let token = orchestrator.cancellation_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            warn!("interrupt received, finishing in-flight records (press Ctrl-C again to stop now)");
            token.cancel();
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("second interrupt, exiting without draining; in-flight records revert on next start");
                std::process::exit(EXIT_FORCED);
            }
        });
        orchestrator.run(&table.records, &checkpoint, &mut sink).await
    });

    let summary = match result {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_code_for_error(&e);
        }
    };
    println!("{}", summary);
    println!("output           {}", sink.path().display());

    let failed = match checkpoint.status_counts() {
        Ok(counts) => counts.get(&RecordStatus::Failed).copied().unwrap_or(0),
        Err(e) => {
            eprintln!("Error: cannot read checkpoint: {}", e);
            return EXIT_STORAGE;
        }
    };
    let code = run_exit_code(&summary, failed, table.len(), config.failure_tolerance);
    if code != EXIT_OK && exceeds_tolerance(failed, table.len(), config.failure_tolerance) {
        eprintln!(
            "Error: {} of {} records failed (tolerance {:.1}%); re-run with --resume to retry them",
            failed,
            table.len(),
            config.failure_tolerance * 100.0
        );
    }
    code
}

fn cmd_status(checkpoint: Option<PathBuf>, config: Option<PathBuf>) -> i32 {
    let path = match checkpoint {
        Some(p) => p,
        None => match load_config(config.as_ref()) {
            Ok(c) => c.checkpoint_path(),
            Err(e) => {
                eprintln!("Error: {}", e);
                return EXIT_STARTUP;
            }
        },
    };
    if !path.exists() {
        eprintln!("Error: no checkpoint at {}", path.display());
        return EXIT_STORAGE;
    }
    let store = match SqliteCheckpoint::open_read_only(&path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: cannot open checkpoint {}: {}", path.display(), e);
            return EXIT_STORAGE;
        }
    };
    let (counts, runs) = match store.status_counts().and_then(|c| Ok((c, store.runs()?))) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_STORAGE;
        }
    };

    println!("checkpoint {}", path.display());
    for status in [
        RecordStatus::Pending,
        RecordStatus::InFlight,
        RecordStatus::Succeeded,
        RecordStatus::Failed,
        RecordStatus::Skipped,
    ] {
        println!("  {:<10} {:>8}", status.as_str(), counts.get(&status).copied().unwrap_or(0));
    }

    if runs.is_empty() {
        println!("No runs recorded.");
        return EXIT_OK;
    }
    println!();
    println!("{:>5}  {:<25}  {:<25}  {:>7}", "RUN", "STARTED", "FINISHED", "RECORDS");
    println!("{}", "-".repeat(68));
    for run in runs {
        let finished = run
            .finished_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "(unfinished)".to_string());
        println!(
            "{:>5}  {:<25}  {:<25}  {:>7}",
            run.run_id,
            run.started_at.to_rfc3339(),
            finished,
            run.total
        );
    }
    EXIT_OK
}

fn main() {
    let _ = dotenvy::dotenv();
    init_tracing();
    let cli = Cli::parse();
    let code = match cli.command {
        Commands::Run(args) => cmd_run(args),
        Commands::Status { checkpoint, config } => cmd_status(checkpoint, config),
    };
    std::process::exit(code);
}
