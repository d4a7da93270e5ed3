mod commands;

use clap::{Parser, Subcommand};
use commands::{BackupArgs, MirrorArgs, RestoreArgs, SnapshotsArgs};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "blocksync",
    version,
    about = "Deduplicated backup, restore, and mirror sync between storage endpoints"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log warnings and errors only
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Back up an origin into a content-addressed destination
    Backup(BackupArgs),
    /// Restore a snapshot from a destination into an origin
    Restore(RestoreArgs),
    /// Mirror an origin into a destination, preserving paths
    Mirror(MirrorArgs),
    /// List the snapshots recorded at a destination
    Snapshots(SnapshotsArgs),
}

fn init_tracing(verbose: bool, quiet: bool) {
    let level = if quiet {
        "warn"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "blocksync={level},blocksync_core={level},blocksync_backends={level}"
        ))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Backup(args) => args.run().await,
        Commands::Restore(args) => args.run().await,
        Commands::Mirror(args) => args.run().await,
        Commands::Snapshots(args) => args.run().await,
    }
}
