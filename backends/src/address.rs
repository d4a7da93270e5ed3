//! Endpoint address parsing and backend construction.
//!
//! Three address shapes are recognised:
//!   - `http://…` / `https://…`            WebDAV share
//!   - `user@host:/path` or `user@host:~/path`  SSH
//!   - anything else                       local directory

use crate::local::LocalBackend;
use crate::ssh::SshBackend;
use crate::webdav::WebDavBackend;
use blocksync_core::{Error, Result, StorageBackend};

const DEFAULT_SSH_PORT: u16 = 22;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Local {
        path: String,
    },
    Ssh {
        user: String,
        host: String,
        port: u16,
        path: String,
    },
    WebDav {
        url: String,
        username: Option<String>,
    },
}

/// Credentials supplied out of band (flags or environment), used by backends
/// whose address cannot carry them safely.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Address {
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(Error::InvalidAddress("empty address".to_string()));
        }

        if let Some(rest) = raw
            .strip_prefix("http://")
            .map(|rest| ("http://", rest))
            .or_else(|| raw.strip_prefix("https://").map(|rest| ("https://", rest)))
        {
            let (scheme, rest) = rest;
            return parse_webdav(scheme, rest);
        }

        // scp-style `user@host:/path`
        if let Some((user, rest)) = raw.split_once('@') {
            if let Some((host, path)) = rest.split_once(':') {
                if user.is_empty() || host.is_empty() || path.is_empty() {
                    return Err(Error::InvalidAddress(format!(
                        "incomplete ssh address: {raw}"
                    )));
                }
                return Ok(Self::Ssh {
                    user: user.to_string(),
                    host: host.to_string(),
                    port: DEFAULT_SSH_PORT,
                    path: path.to_string(),
                });
            }
        }

        Ok(Self::Local {
            path: raw.to_string(),
        })
    }

    /// Builds the backend for this address. WebDAV needs a username (embedded
    /// in the URL or supplied via credentials) and a password.
    pub fn connect(&self, credentials: &Credentials) -> Result<Box<dyn StorageBackend>> {
        match self {
            Self::Local { path } => Ok(Box::new(LocalBackend::new(path))),
            Self::Ssh {
                user,
                host,
                port,
                path,
            } => Ok(Box::new(SshBackend::new(user, host, *port, path))),
            Self::WebDav { url, username } => {
                let username = username
                    .as_deref()
                    .or(credentials.username.as_deref())
                    .ok_or_else(|| {
                        Error::InvalidAddress(format!("no username for webdav endpoint {url}"))
                    })?;
                let password = credentials.password.as_deref().ok_or_else(|| {
                    Error::InvalidAddress(format!("no password for webdav endpoint {url}"))
                })?;
                Ok(Box::new(WebDavBackend::new(url, username, password)))
            }
        }
    }
}

fn parse_webdav(scheme: &str, rest: &str) -> Result<Address> {
    // Pull a `user@` prefix out of the authority so the stored URL is clean.
    let authority_end = rest.find('/').unwrap_or(rest.len());
    let (authority, tail) = rest.split_at(authority_end);

    let (username, authority) = match authority.rsplit_once('@') {
        Some((user, host)) if !user.is_empty() => (Some(user.to_string()), host),
        _ => (None, authority),
    };
    if authority.is_empty() {
        return Err(Error::InvalidAddress(format!(
            "no host in webdav address: {scheme}{rest}"
        )));
    }

    Ok(Address::WebDav {
        url: format!("{scheme}{authority}{tail}"),
        username,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_local() {
        assert_eq!(
            Address::parse("/var/backups").unwrap(),
            Address::Local {
                path: "/var/backups".to_string()
            }
        );
        assert_eq!(
            Address::parse("relative/dir").unwrap(),
            Address::Local {
                path: "relative/dir".to_string()
            }
        );
    }

    #[test]
    fn test_parse_ssh() {
        assert_eq!(
            Address::parse("backup@vault.example.com:/srv/backups").unwrap(),
            Address::Ssh {
                user: "backup".to_string(),
                host: "vault.example.com".to_string(),
                port: 22,
                path: "/srv/backups".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_ssh_rejects_incomplete() {
        assert!(Address::parse("backup@host:").is_err());
        assert!(Address::parse("@host:/path").is_err());
    }

    #[test]
    fn test_parse_webdav() {
        assert_eq!(
            Address::parse("https://dav.example.com/remote.php/dav/files/admin").unwrap(),
            Address::WebDav {
                url: "https://dav.example.com/remote.php/dav/files/admin".to_string(),
                username: None,
            }
        );
    }

    #[test]
    fn test_parse_webdav_embedded_user() {
        assert_eq!(
            Address::parse("https://admin@dav.example.com/files").unwrap(),
            Address::WebDav {
                url: "https://dav.example.com/files".to_string(),
                username: Some("admin".to_string()),
            }
        );
    }

    #[test]
    fn test_webdav_connect_requires_credentials() {
        let address = Address::parse("https://dav.example.com/files").unwrap();
        assert!(address.connect(&Credentials::default()).is_err());

        let creds = Credentials {
            username: Some("admin".to_string()),
            password: Some("secret".to_string()),
        };
        assert!(address.connect(&creds).is_ok());
    }

    #[test]
    fn test_email_like_local_path_without_colon_is_local() {
        assert_eq!(
            Address::parse("user@host-notes.txt").unwrap(),
            Address::Local {
                path: "user@host-notes.txt".to_string()
            }
        );
    }
}
