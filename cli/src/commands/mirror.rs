use super::EndpointArgs;
use anyhow::Result;
use blocksync_core::mirror;
use tracing::info;

#[derive(clap::Args, Debug)]
pub struct MirrorArgs {
    #[command(flatten)]
    endpoints: EndpointArgs,

    /// Remove destination files that are absent from the origin
    #[arg(long)]
    delete: bool,
}

impl MirrorArgs {
    pub async fn run(self) -> Result<()> {
        info!(
            origin = %self.endpoints.origin,
            dest = %self.endpoints.dest,
            delete = self.delete,
            "starting mirror"
        );
        let origin = self.endpoints.connect_origin()?;
        let destination = self.endpoints.connect_dest()?;

        let report = mirror(origin.as_ref(), destination.as_ref(), self.delete).await?;

        println!(
            "mirror complete: {} copied, {} up to date, {} newer at destination, {} deleted",
            report.copied, report.skipped, report.kept_newer, report.deleted
        );
        Ok(())
    }
}
