use crate::demo::{run_demo, DemoArgs};
use crate::infra::open_store;
use crate::server;
use clap::{Args, Parser, Subcommand};
use leadflow::config::{AppConfig, StorageConfig};
use leadflow::distribution::{LeadDistributionService, QueueId, TracingNotifier};
use leadflow::error::AppError;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(
    name = "leadflow",
    about = "Distribute real-estate leads across realtor queues",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service and expiry sweeper (default command)
    Serve(ServeArgs),
    /// Inspect distribution queues in the configured store
    Queue {
        #[command(subcommand)]
        command: QueueCommand,
    },
    /// Walk through a scripted distribution scenario against an in-memory store
    Demo(DemoArgs),
}

#[derive(Subcommand, Debug)]
enum QueueCommand {
    /// Print the ordered members of a queue with their scores
    Show(QueueShowArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

#[derive(Args, Debug)]
pub(crate) struct QueueShowArgs {
    /// Queue identifier, e.g. `agency-centro`
    pub(crate) queue_id: String,
    /// SQLite database to read instead of LEADFLOW_DATABASE
    #[arg(long)]
    pub(crate) database: Option<PathBuf>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Queue {
            command: QueueCommand::Show(args),
        } => show_queue(args),
        Command::Demo(args) => run_demo(args),
    }
}

fn show_queue(args: QueueShowArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let storage = args
        .database
        .map(StorageConfig::Sqlite)
        .unwrap_or(config.storage);

    let store = Arc::new(open_store(&storage)?);
    let service = LeadDistributionService::new(store, Arc::new(TracingNotifier), config.distribution);
    let queue_id = QueueId::new(args.queue_id);
    let entries = service.queue_snapshot(&queue_id)?;

    if entries.is_empty() {
        println!("Queue {queue_id} has no members");
        return Ok(());
    }

    println!("Queue {queue_id} ({} members)", entries.len());
    for entry in entries {
        println!(
            "  {:>2}. {:<24} score {:>4} | {:<6} | open {} | offered {} accepted {} rejected {} expired {} won {}",
            entry.position,
            entry.display_name,
            entry.score,
            entry.status.label(),
            entry.open_reservations,
            entry.stats.offered,
            entry.stats.accepted,
            entry.stats.rejected,
            entry.stats.expired,
            entry.stats.won,
        );
    }
    Ok(())
}
