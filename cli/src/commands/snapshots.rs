use anyhow::Result;
use blocksync_backends::{Address, Credentials};
use blocksync_core::RemoteStore;
use tracing::info;

#[derive(clap::Args, Debug)]
pub struct SnapshotsArgs {
    /// Destination endpoint holding the snapshot store
    pub dest: String,

    /// Also list each snapshot's file records
    #[arg(long)]
    files: bool,

    /// Username for a WebDAV destination (or embed it in the URL)
    #[arg(long, env = "BLOCKSYNC_DEST_USERNAME")]
    dest_username: Option<String>,

    /// Password for a WebDAV destination
    #[arg(long, env = "BLOCKSYNC_DEST_PASSWORD", hide_env_values = true)]
    dest_password: Option<String>,
}

impl SnapshotsArgs {
    pub async fn run(self) -> Result<()> {
        info!(dest = %self.dest, "listing snapshots");
        let credentials = Credentials {
            username: self.dest_username,
            password: self.dest_password,
        };
        let destination = Address::parse(&self.dest)?.connect(&credentials)?;

        // The fetch removes the remote copy, so the store must be written
        // back even for a read-only listing.
        let remote_store = RemoteStore::fetch(destination.as_ref()).await?;
        let result = list(&remote_store, self.files).await;
        let writeback = remote_store.finish(destination.as_ref()).await;
        result?;
        writeback?;
        Ok(())
    }
}

async fn list(remote_store: &RemoteStore, show_files: bool) -> Result<()> {
    let snapshots = remote_store.store().list_snapshots().await?;
    if snapshots.is_empty() {
        println!("no snapshots recorded");
        return Ok(());
    }

    println!("{:>6}  {:<19}  {:>7}  status", "id", "date", "files");
    for snapshot in snapshots {
        let records = remote_store
            .store()
            .list_file_records_by_snapshot(snapshot.id)
            .await?;
        println!(
            "{:>6}  {:<19}  {:>7}  {}",
            snapshot.id,
            snapshot.date,
            records.len(),
            snapshot.status
        );
        if show_files {
            for info in records.iter().map(|r| r.to_file_info()) {
                println!(
                    "        {}  {}  {}",
                    info.content_hash,
                    info.remote_hash.unwrap_or_default(),
                    info.path
                );
            }
        }
    }
    Ok(())
}
