//! Storage backends: local filesystem, SSH, and WebDAV.

pub mod address;
pub mod local;
pub mod ssh;
pub mod webdav;

pub use address::{Address, Credentials};
pub use local::LocalBackend;
pub use ssh::SshBackend;
pub use webdav::WebDavBackend;
