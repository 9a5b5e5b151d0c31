//! compgraph: verified component graph resolver
//!
//! Usage:
//!   compgraph resolve --intents intents.yaml   → one pass per intent, print status and graph
//!   compgraph run --intents intents.yaml       → controller loop until Ctrl-C
//!   compgraph config                           → print the effective config as TOML

use anyhow::Context;
use clap::{Parser, Subcommand};
use compgraph::render::{render_summary, render_tree};
use compgraph_controller::{
    load_intents, Controller, ControllerConfig, ControllerQueue, Ed25519Verifier, KeyDirectory,
    LocalFsRepository, MemoryStore, ObjectStore, QueueConfig, Reconciler, WorkQueue,
};
use compgraph_core::ObjectKey;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "compgraph",
    about = "Verify component versions and resolve their dependency graphs",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file (TOML)
    #[arg(long, global = true, default_value = "compgraph.toml")]
    config: PathBuf,

    /// Write logs to a file (in addition to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile every intent once and print the result
    Resolve {
        /// YAML file with one intent or a list of intents
        #[arg(short, long)]
        intents: PathBuf,
        /// Print full status as YAML instead of the tree
        #[arg(long, default_value_t = false)]
        yaml: bool,
    },
    /// Keep intents reconciled until interrupted
    Run {
        /// YAML file with one intent or a list of intents
        #[arg(short, long)]
        intents: PathBuf,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_file.as_deref())?;

    let config = ControllerConfig::load(&cli.config);
    if let Commands::Config = cli.command {
        print!("{}", config.to_toml());
        return Ok(());
    }
    config.validate()?;

    let store = Arc::new(MemoryStore::new());
    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        Arc::new(LocalFsRepository::new(&config.repository.root)),
        Arc::new(Ed25519Verifier::new(KeyDirectory::new(&config.verify.keys_dir))),
        config.clone(),
    ));

    match cli.command {
        Commands::Resolve { intents, yaml } => {
            let keys = seed(store.as_ref(), &intents).await?;
            resolve(&reconciler, store.as_ref(), &keys, yaml).await
        }
        Commands::Run { intents } => {
            let keys = seed(store.as_ref(), &intents).await?;
            run(reconciler, keys, &config.controller).await;
            Ok(())
        }
        Commands::Config => Ok(()),
    }
}

fn init_tracing(log_file: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "compgraph=info,compgraph_controller=info,compgraph_core=info".into());

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .with_context(|| format!("invalid log file path {}", path.display()))?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            (
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false),
                ),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(guard)
}

async fn seed(store: &dyn ObjectStore, path: &Path) -> anyhow::Result<Vec<ObjectKey>> {
    let mut keys = Vec::new();
    for intent in load_intents(path)? {
        keys.push(store.put_intent(intent).await?.key());
    }
    tracing::info!(count = keys.len(), "loaded intents from {}", path.display());
    Ok(keys)
}

async fn resolve(
    reconciler: &Reconciler,
    store: &dyn ObjectStore,
    keys: &[ObjectKey],
    yaml: bool,
) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let mut failed = 0;
    for key in keys {
        if let Err(e) = reconciler.reconcile(key, &cancel).await {
            failed += 1;
            eprintln!("{key}: {e}");
        }
        let intent = store.get_intent(key).await?;
        if yaml {
            println!("---\n{}", serde_yaml::to_string(&intent)?);
            continue;
        }
        println!("{}", render_summary(&intent));
        if let Some(root) = &intent.status.component_descriptor {
            print!("{}", render_tree(root));
        }
    }
    if failed > 0 {
        anyhow::bail!("{failed} of {} intents failed to resolve", keys.len());
    }
    Ok(())
}

async fn run(reconciler: Arc<Reconciler>, keys: Vec<ObjectKey>, settings: &QueueConfig) {
    let cancel = CancellationToken::new();
    let (queue, rx) = ControllerQueue::new(cancel.clone());
    for key in keys {
        queue.enqueue(key);
    }

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
        }
        shutdown.cancel();
    });

    let stats = Controller::new(reconciler, settings.workers)
        .with_panic_retry(settings.default_interval)
        .run(queue, rx, cancel)
        .await;
    tracing::info!(
        reconciled = stats.reconciled,
        failed = stats.failed,
        "controller stopped"
    );
}
