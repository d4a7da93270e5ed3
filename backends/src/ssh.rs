//! SSH backend driven through the system `ssh` binary.
//!
//! Authentication relies on the operator's keys and ssh-agent
//! (`BatchMode=yes`), and every remote operation is a short command over a
//! fresh session: `find` for listing, `md5sum` for hashing, `stat` for
//! timestamps, `cat` for transfers.

use async_trait::async_trait;
use blocksync_core::backend::{FileStream, StorageBackend};
use blocksync_core::types::{self, FileInfo};
use blocksync_core::{Error, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error, warn};

const CONNECT_TIMEOUT_SECS: u32 = 10;

#[derive(Clone)]
pub struct SshBackend {
    /// `user@host` destination handed to the ssh binary.
    target: String,
    port: u16,
    /// Remote root path, trailing slash enforced.
    root: String,
}

impl SshBackend {
    pub fn new(user: &str, host: &str, port: u16, root: &str) -> Self {
        let mut root = root.to_string();
        if !root.ends_with('/') {
            root.push('/');
        }
        Self {
            target: format!("{user}@{host}"),
            port,
            root,
        }
    }

    fn full_path(&self, path: &str) -> String {
        format!("{}{}", self.root, path)
    }

    fn command(&self, remote_command: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-p")
            .arg(self.port.to_string())
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!("ConnectTimeout={CONNECT_TIMEOUT_SECS}"))
            .arg(&self.target)
            .arg(remote_command);
        cmd
    }

    async fn run(&self, remote_command: &str) -> Result<std::process::Output> {
        debug!(target = %self.target, command = remote_command, "running remote command");
        self.command(remote_command)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| Error::Transport(format!("spawning ssh: {err}")))
    }

    async fn run_with_stdin(&self, remote_command: &str, data: &[u8]) -> Result<std::process::Output> {
        debug!(target = %self.target, command = remote_command, "running remote command with stdin");
        let mut child = self
            .command(remote_command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| Error::Transport(format!("spawning ssh: {err}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(data)
                .await
                .map_err(|err| Error::Transport(format!("writing to ssh stdin: {err}")))?;
            // Dropping stdin closes the remote cat's input.
        }

        child
            .wait_with_output()
            .await
            .map_err(|err| Error::Transport(format!("waiting for ssh: {err}")))
    }
}

/// Single-quote shell escaping for remote paths.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn stderr_of(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

fn remote_error(path: &str, output: &std::process::Output) -> Error {
    let stderr = stderr_of(output);
    if stderr.contains("No such file") {
        Error::not_found(path)
    } else {
        Error::Transport(format!("remote command on {path} failed: {stderr}"))
    }
}

/// Parses one `find -printf '%P\t%M\t%T@\n'` line into relative path,
/// symbolic mode, and mtime.
fn parse_find_line(line: &str) -> Option<(String, String, DateTime<Utc>)> {
    let mut parts = line.splitn(3, '\t');
    let path = parts.next()?;
    let mode = parts.next()?;
    let epoch: f64 = parts.next()?.trim().parse().ok()?;
    if path.is_empty() {
        return None;
    }
    let modified = DateTime::from_timestamp(epoch as i64, 0)?;
    Some((path.to_string(), mode.to_string(), modified))
}

/// `md5sum` prints `<hash>  <filename>`; only the hash matters.
fn parse_md5sum_output(output: &str) -> Option<String> {
    let hash = output.split_whitespace().next()?;
    if hash.len() == 32 && hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        Some(hash.to_ascii_lowercase())
    } else {
        None
    }
}

#[async_trait]
impl StorageBackend for SshBackend {
    async fn list(&self) -> Result<FileStream> {
        let this = self.clone();
        let (tx, stream) = FileStream::channel();

        tokio::spawn(async move {
            let command = format!(
                "find {} -type f -printf '%P\\t%M\\t%T@\\n'",
                shell_quote(&this.root)
            );
            let output = match this.run(&command).await {
                Ok(output) if output.status.success() => output,
                Ok(output) => {
                    error!(target = %this.target, "remote listing failed: {}", stderr_of(&output));
                    return;
                }
                Err(err) => {
                    error!(target = %this.target, "remote listing failed: {err}");
                    return;
                }
            };

            for line in String::from_utf8_lossy(&output.stdout).lines() {
                let Some((path, permission, last_modified)) = parse_find_line(line) else {
                    warn!(line, "skipping unparseable listing line");
                    continue;
                };
                let content_hash = match this.hash(&path).await {
                    Ok(hash) => hash,
                    Err(err) => {
                        warn!(path = %path, "skipping unhashable entry: {err}");
                        continue;
                    }
                };
                let info = FileInfo {
                    file_name: path.rsplit('/').next().unwrap_or(&path).to_string(),
                    path,
                    content_hash,
                    permission,
                    last_modified,
                    remote_hash: None,
                };
                if tx.send(info).await.is_err() {
                    break;
                }
            }
        });

        Ok(stream)
    }

    async fn exists(&self, path: &str) -> bool {
        let command = format!("test -e {}", shell_quote(&self.full_path(path)));
        match self.run(&command).await {
            Ok(output) => output.status.success(),
            Err(_) => false,
        }
    }

    async fn get_file(&self, path: &str) -> Result<Bytes> {
        let command = format!("cat {}", shell_quote(&self.full_path(path)));
        let output = self.run(&command).await?;
        if !output.status.success() {
            return Err(remote_error(path, &output));
        }
        Ok(Bytes::from(output.stdout))
    }

    async fn save_file(&self, path: &str, data: &[u8], permission: &str) -> Result<()> {
        let full = self.full_path(path);
        let quoted = shell_quote(&full);

        let mut command = String::new();
        if let Some((dir, _)) = full.rsplit_once('/') {
            command.push_str(&format!("mkdir -p {} && ", shell_quote(dir)));
        }
        command.push_str(&format!("cat > {quoted}"));

        let output = self.run_with_stdin(&command, data).await?;
        if !output.status.success() {
            return Err(Error::Write(format!(
                "writing {path}: {}",
                stderr_of(&output)
            )));
        }

        // Content is on the remote now; a chmod failure is reported, not
        // rolled back.
        let mode = types::mode_bits(permission)?;
        let chmod = format!("chmod {:o} {quoted}", mode);
        match self.run(&chmod).await {
            Ok(output) if output.status.success() => {}
            Ok(output) => warn!(path, "could not apply permissions: {}", stderr_of(&output)),
            Err(err) => warn!(path, "could not apply permissions: {err}"),
        }
        Ok(())
    }

    async fn remove_file(&self, path: &str) -> Result<()> {
        let command = format!("rm -- {}", shell_quote(&self.full_path(path)));
        let output = self.run(&command).await?;
        if !output.status.success() {
            return Err(remote_error(path, &output));
        }
        Ok(())
    }

    async fn hash(&self, path: &str) -> Result<String> {
        let command = format!("md5sum {}", shell_quote(&self.full_path(path)));
        let output = self.run(&command).await?;
        if !output.status.success() {
            return Err(remote_error(path, &output));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_md5sum_output(&stdout)
            .ok_or_else(|| Error::Decode(format!("unexpected md5sum output: {stdout}")))
    }

    async fn last_modified(&self, path: &str) -> Result<DateTime<Utc>> {
        let command = format!("stat -c %Y {}", shell_quote(&self.full_path(path)));
        let output = self.run(&command).await?;
        if !output.status.success() {
            return Err(remote_error(path, &output));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let epoch: i64 = stdout
            .trim()
            .parse()
            .map_err(|_| Error::Decode(format!("unexpected stat output: {stdout}")))?;
        DateTime::from_timestamp(epoch, 0)
            .ok_or_else(|| Error::Decode(format!("timestamp out of range: {epoch}")))
    }
}
