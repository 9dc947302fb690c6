//! # task-mill CLI (`tmill`)
//!
//! The `tmill` binary drives the batch parse pipeline: database
//! initialization, job submission, pipeline runs, and progress polling.
//!
//! ## Usage
//!
//! ```bash
//! tmill --config ./config/tmill.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tmill init` | Create the SQLite database and run schema migrations |
//! | `tmill submit <file>` | Create a job for a document without running it |
//! | `tmill run <job-id> --file <file>` | Run the pipeline for an existing job |
//! | `tmill parse <file>` | Submit and run in one step |
//! | `tmill status <job-id>` | Poll job progress and events |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! tmill init --config ./config/tmill.toml
//!
//! # Submit and run a skill write-up
//! tmill parse ./docs/grounding-skills.txt
//!
//! # Follow a job until it finishes
//! tmill status 6f96… --watch
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use task_mill::config;
use task_mill::db;
use task_mill::llm;
use task_mill::migrate;
use task_mill::orchestrate::{self, Sha256Hasher};
use task_mill::status;
use task_mill::store::JobStore;

/// task-mill CLI — converts free-text therapy-skill write-ups into
/// structured draft task records via a batch parse job pipeline.
#[derive(Parser)]
#[command(
    name = "tmill",
    about = "task-mill — batch-parse therapy-skill write-ups into structured draft tasks",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/tmill.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables (jobs,
    /// job_events, tasks, criteria, examples, interaction_examples).
    /// Idempotent — running it multiple times is safe.
    Init,

    /// Create a job for a document without starting the pipeline.
    ///
    /// Computes the content hash, inserts the job row, and prints the
    /// job id. Run it later with `tmill run`.
    Submit {
        /// Path to the free-text document.
        file: PathBuf,
    },

    /// Run the pipeline for an existing job.
    ///
    /// Blocks until the job reaches a terminal status. The document must
    /// be supplied again — job rows store only the content hash.
    Run {
        /// Job id returned by `tmill submit`.
        job_id: String,

        /// Path to the free-text document.
        #[arg(long)]
        file: PathBuf,

        /// Extraction mode hint forwarded to the extractor.
        #[arg(long)]
        parse_mode: Option<String>,
    },

    /// Submit a document and run it in one step.
    Parse {
        /// Path to the free-text document.
        file: PathBuf,

        /// Extraction mode hint forwarded to the extractor.
        #[arg(long)]
        parse_mode: Option<String>,
    },

    /// Poll a job's summary and event log.
    ///
    /// Prints events with `id > --after` and the new cursor; with
    /// `--watch`, keeps polling until the job reaches a terminal status.
    Status {
        /// Job id.
        job_id: String,

        /// Event-id cursor from a previous poll.
        #[arg(long, default_value_t = 0)]
        after: i64,

        /// Keep polling until the job finishes.
        #[arg(long)]
        watch: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Submit { file } => {
            let source_text = std::fs::read_to_string(&file)?;
            let pool = db::connect(&cfg).await?;
            let store = JobStore::new(pool.clone());
            let job_id = orchestrate::create_job(&store, &Sha256Hasher, &source_text).await?;
            println!("{}", job_id);
            pool.close().await;
        }
        Commands::Run {
            job_id,
            file,
            parse_mode,
        } => {
            let source_text = std::fs::read_to_string(&file)?;
            run_pipeline(&cfg, &job_id, &source_text, parse_mode.as_deref()).await?;
        }
        Commands::Parse { file, parse_mode } => {
            let source_text = std::fs::read_to_string(&file)?;
            let pool = db::connect(&cfg).await?;
            let store = JobStore::new(pool.clone());
            let job_id = orchestrate::create_job(&store, &Sha256Hasher, &source_text).await?;
            pool.close().await;
            println!("job: {}", job_id);
            run_pipeline(&cfg, &job_id, &source_text, parse_mode.as_deref()).await?;
        }
        Commands::Status {
            job_id,
            after,
            watch,
        } => {
            status::run_status(&cfg, &job_id, after, watch).await?;
        }
    }

    Ok(())
}

async fn run_pipeline(
    cfg: &config::Config,
    job_id: &str,
    source_text: &str,
    parse_mode: Option<&str>,
) -> Result<()> {
    let pool = db::connect(cfg).await?;
    let store = JobStore::new(pool.clone());

    let planner: Arc<dyn llm::SegmentPlanner> = Arc::from(llm::create_planner(&cfg.llm)?);
    let extractor: Arc<dyn llm::TaskExtractor> = Arc::from(llm::create_extractor(&cfg.llm)?);

    let job = orchestrate::run_job(
        cfg,
        &store,
        planner,
        extractor,
        job_id,
        source_text,
        parse_mode,
    )
    .await?;

    println!("status: {}", job.status.as_str());
    match job.total_segments {
        Some(total) => println!("segments: {}/{}", job.completed_segments, total),
        None => println!("segments: {}/?", job.completed_segments),
    }
    for task_id in &job.created_task_ids {
        println!("draft: {}", task_id);
    }
    if let Some(error) = &job.error {
        println!("error: {}", error);
    }

    pool.close().await;
    Ok(())
}
