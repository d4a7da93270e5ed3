use super::EndpointArgs;
use anyhow::Result;
use blocksync_core::restore;
use tracing::info;

#[derive(clap::Args, Debug)]
pub struct RestoreArgs {
    #[command(flatten)]
    endpoints: EndpointArgs,

    /// Snapshot date to restore, e.g. "2026-08-29 14:03:11" (default: most recent)
    #[arg(long, value_name = "DATE")]
    snapshot: Option<String>,

    /// Report origin files that are not part of the snapshot
    #[arg(long)]
    clean: bool,
}

impl RestoreArgs {
    pub async fn run(self) -> Result<()> {
        info!(
            origin = %self.endpoints.origin,
            dest = %self.endpoints.dest,
            snapshot = self.snapshot.as_deref().unwrap_or("latest"),
            "starting restore"
        );
        let origin = self.endpoints.connect_origin()?;
        let destination = self.endpoints.connect_dest()?;

        let report = restore(
            origin.as_ref(),
            destination.as_ref(),
            self.snapshot.as_deref(),
            self.clean,
        )
        .await?;

        println!(
            "snapshot {} restored: {} files written, {} already current",
            report.snapshot_id, report.restored, report.unchanged
        );
        if self.clean {
            println!("{} origin files are not part of the snapshot", report.stray);
        }
        Ok(())
    }
}
