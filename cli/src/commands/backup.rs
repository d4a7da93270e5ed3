use super::EndpointArgs;
use anyhow::Result;
use blocksync_core::{backup, BackupConfig};
use tracing::info;

#[derive(clap::Args, Debug)]
pub struct BackupArgs {
    #[command(flatten)]
    endpoints: EndpointArgs,

    /// Upload content blocks uncompressed
    #[arg(long)]
    no_compress: bool,

    /// On a remote hash mismatch, record a skip instead of re-uploading
    #[arg(long)]
    skip_hash: bool,
}

impl BackupArgs {
    pub async fn run(self) -> Result<()> {
        info!(
            origin = %self.endpoints.origin,
            dest = %self.endpoints.dest,
            "starting backup"
        );
        let origin = self.endpoints.connect_origin()?;
        let destination = self.endpoints.connect_dest()?;

        let config = BackupConfig {
            compress: !self.no_compress,
            skip_hash: self.skip_hash,
        };
        let report = backup(origin.as_ref(), destination.as_ref(), &config).await?;

        println!(
            "snapshot {} complete: {} files, {} blocks uploaded, {} skipped",
            report.snapshot_id, report.files_seen, report.uploaded, report.skipped
        );
        Ok(())
    }
}
