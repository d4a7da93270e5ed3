mod backup;
mod mirror;
mod restore;
mod snapshots;

pub use backup::BackupArgs;
pub use mirror::MirrorArgs;
pub use restore::RestoreArgs;
pub use snapshots::SnapshotsArgs;

use anyhow::Result;
use blocksync_backends::{Address, Credentials};
use blocksync_core::StorageBackend;

/// Origin/destination endpoint pair shared by the transfer commands.
///
/// An endpoint is a local path, an scp-style `user@host:/path`, or an
/// `http(s)://` WebDAV URL. WebDAV passwords never go on the command line
/// for real use; the environment variables cover that.
#[derive(clap::Args, Debug)]
pub struct EndpointArgs {
    /// Origin endpoint
    pub origin: String,

    /// Destination endpoint
    pub dest: String,

    /// Username for a WebDAV origin (or embed it in the URL)
    #[arg(long, env = "BLOCKSYNC_ORIGIN_USERNAME")]
    pub origin_username: Option<String>,

    /// Password for a WebDAV origin
    #[arg(long, env = "BLOCKSYNC_ORIGIN_PASSWORD", hide_env_values = true)]
    pub origin_password: Option<String>,

    /// Username for a WebDAV destination (or embed it in the URL)
    #[arg(long, env = "BLOCKSYNC_DEST_USERNAME")]
    pub dest_username: Option<String>,

    /// Password for a WebDAV destination
    #[arg(long, env = "BLOCKSYNC_DEST_PASSWORD", hide_env_values = true)]
    pub dest_password: Option<String>,
}

impl EndpointArgs {
    pub fn connect_origin(&self) -> Result<Box<dyn StorageBackend>> {
        let credentials = Credentials {
            username: self.origin_username.clone(),
            password: self.origin_password.clone(),
        };
        Ok(Address::parse(&self.origin)?.connect(&credentials)?)
    }

    pub fn connect_dest(&self) -> Result<Box<dyn StorageBackend>> {
        let credentials = Credentials {
            username: self.dest_username.clone(),
            password: self.dest_password.clone(),
        };
        Ok(Address::parse(&self.dest)?.connect(&credentials)?)
    }
}
