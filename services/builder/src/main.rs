//! Ice2Ocean batch builder.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use builder::{admin, BatchDriver, BuilderConfig, PreviewProcessor};
use i2o_common::{FieldTable, StaticFieldTable};
use storage::{
    LocalFileCache, ProcessingStage, ProcessingStateTracker, RemoteObjectStore, WorkDir,
};

#[derive(Parser, Debug)]
#[command(name = "builder")]
#[command(about = "Batch pipeline for uploaded model output")]
struct Args {
    /// Log level
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process every upload labeled Started
    Run {
        /// Maximum concurrent workers
        #[arg(short, long, default_value_t = builder::config::DEFAULT_WORKERS)]
        workers: usize,

        /// Run one batch and exit (vs polling)
        #[arg(long)]
        once: bool,

        /// Seconds between batches when polling
        #[arg(long, default_value = "60")]
        poll_secs: u64,
    },
    /// List uploads and their stages
    List {
        #[arg(long)]
        status: Option<ProcessingStage>,
    },
    /// Move every upload in one stage to another
    Relabel {
        #[arg(long)]
        from: ProcessingStage,
        #[arg(long)]
        to: ProcessingStage,
    },
    /// Set one upload's stage
    Label {
        name: String,
        stage: ProcessingStage,
        #[arg(long)]
        message: Option<String>,
        /// Allow moves the stage diagram does not permit
        #[arg(long)]
        force: bool,
    },
    /// Upload a file and mark it Started
    Upload {
        file: PathBuf,
        /// Object name (default: the file name)
        #[arg(long)]
        name: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .json()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = BuilderConfig::from_env()?;
    let uploads: Arc<dyn RemoteObjectStore> = Arc::new(config.uploads.connect()?);
    let tracker = Arc::new(ProcessingStateTracker::new(
        uploads.clone(),
        config.uploads.container.clone(),
    ));

    match args.command {
        Command::Run {
            workers,
            once,
            poll_secs,
        } => {
            let products: Arc<dyn RemoteObjectStore> = Arc::new(config.products.connect()?);
            let files = Arc::new(LocalFileCache::new(
                uploads.clone(),
                config.uploads.container.clone(),
                &WorkDir::new(&config.work_dir)?,
                config.fetch.clone(),
            )?);
            let fields = match &config.field_table {
                Some(path) => Some(Arc::new(StaticFieldTable::load(path)?) as Arc<dyn FieldTable>),
                None => None,
            };
            let processor = Arc::new(PreviewProcessor::new(
                files,
                products,
                config.products.container.clone(),
                fields,
            ));
            let driver = BatchDriver::new(tracker, processor, workers);

            loop {
                let report = driver.run_once().await?;
                print!("{}", report);
                if once {
                    break;
                }
                info!(poll_secs, "Waiting for the next batch");
                tokio::time::sleep(Duration::from_secs(poll_secs)).await;
            }
        }
        Command::List { status } => {
            for entry in tracker.list_by_status(status).await? {
                let stage = entry.stage.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string());
                match entry.message {
                    Some(m) => println!("{}\t{}\t{}", entry.name, stage, m),
                    None => println!("{}\t{}", entry.name, stage),
                }
            }
        }
        Command::Relabel { from, to } => {
            let moved = tracker.relabel_all(from, to).await?;
            println!("Relabeled {} uploads from {} to {}", moved.len(), from, to);
        }
        Command::Label {
            name,
            stage,
            message,
            force,
        } => {
            admin::set_label(&tracker, &name, stage, message.as_deref(), force).await?;
            println!("{}: {}", name, stage);
        }
        Command::Upload { file, name } => {
            let name = admin::upload(uploads.as_ref(), &tracker, &file, name.as_deref()).await?;
            println!("Uploaded {} (Started)", name);
        }
    }

    Ok(())
}
