//! WebDAV backend over plain HTTP verbs plus PROPFIND.
//!
//! Listing parses a multistatus body from a single unbounded-depth PROPFIND;
//! hashing relies on the ownCloud `oc:checksums` extension property. Servers
//! that omit the checksum yield a hash miss, which forces a re-upload rather
//! than a false dedup hit.

use async_trait::async_trait;
use blocksync_core::backend::{FileStream, StorageBackend};
use blocksync_core::types::{self, FileInfo};
use blocksync_core::{Error, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use reqwest::{Method, StatusCode};
use tracing::{debug, error, warn};

const LIST_BODY: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<d:propfind xmlns:d="DAV:" xmlns:oc="http://owncloud.org/ns">
    <d:prop><d:getlastmodified/><d:resourcetype/><oc:checksums/></d:prop>
</d:propfind>"#;

const CHECKSUM_BODY: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<d:propfind xmlns:d="DAV:" xmlns:oc="http://owncloud.org/ns">
    <d:prop><oc:checksums/></d:prop>
</d:propfind>"#;

const LAST_MODIFIED_BODY: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<d:propfind xmlns:d="DAV:">
    <d:prop><d:getlastmodified/></d:prop>
</d:propfind>"#;

// Characters that must not appear raw in a request path.
const PATH_ENCODE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'#')
    .add(b'?')
    .add(b'{')
    .add(b'}');

#[derive(Clone)]
pub struct WebDavBackend {
    client: reqwest::Client,
    /// Server URL including the share root, trailing slash enforced.
    base: String,
    username: String,
    password: String,
}

impl WebDavBackend {
    pub fn new(server: &str, username: &str, password: &str) -> Self {
        let mut base = server.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        Self {
            client: reqwest::Client::new(),
            base,
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        let relative = path.trim_start_matches('/');
        format!("{}{}", self.base, utf8_percent_encode(relative, PATH_ENCODE))
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url(path))
            .basic_auth(&self.username, Some(&self.password))
    }

    async fn propfind(&self, path: &str, depth: &str, body: &'static str) -> Result<Bytes> {
        let method = Method::from_bytes(b"PROPFIND")
            .map_err(|err| Error::Transport(format!("building PROPFIND: {err}")))?;
        let response = self
            .request(method, path)
            .header("Depth", depth)
            .header("Content-Type", "application/xml")
            .body(body)
            .send()
            .await
            .map_err(|err| Error::Transport(format!("PROPFIND {path}: {err}")))?;

        match response.status() {
            StatusCode::MULTI_STATUS => response
                .bytes()
                .await
                .map_err(|err| Error::Transport(format!("reading PROPFIND body: {err}"))),
            StatusCode::NOT_FOUND => Err(Error::not_found(path)),
            status => Err(Error::Transport(format!(
                "PROPFIND {path}: unexpected status {status}"
            ))),
        }
    }
}

#[derive(Debug, Default)]
struct DavEntry {
    href: String,
    last_modified: Option<DateTime<Utc>>,
    checksum_md5: Option<String>,
    is_collection: bool,
}

/// Extracts the `MD5:` entry from an ownCloud checksum list such as
/// `SHA1:... MD5:... ADLER32:...`.
fn md5_from_checksums(checksums: &str) -> Option<String> {
    checksums
        .split_whitespace()
        .find_map(|token| token.strip_prefix("MD5:"))
        .map(|hash| hash.to_ascii_lowercase())
}

fn parse_http_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parses a WebDAV multistatus body into per-resource entries. Element names
/// are matched on their local part so any namespace prefix works.
fn parse_multistatus(xml: &[u8]) -> Result<Vec<DavEntry>> {
    enum Field {
        Href,
        LastModified,
        Checksum,
    }

    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut entry = DavEntry::default();
    let mut field: Option<Field> = None;
    let mut raw_modified = String::new();
    let mut raw_checksums = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"response" => {
                    entry = DavEntry::default();
                    raw_modified.clear();
                    raw_checksums.clear();
                }
                b"href" => field = Some(Field::Href),
                b"getlastmodified" => field = Some(Field::LastModified),
                b"checksum" => field = Some(Field::Checksum),
                b"collection" => entry.is_collection = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"collection" {
                    entry.is_collection = true;
                }
            }
            Ok(Event::Text(e)) => {
                let text = e
                    .unescape()
                    .map_err(|err| Error::Decode(format!("multistatus text: {err}")))?;
                match field {
                    Some(Field::Href) => entry.href.push_str(&text),
                    Some(Field::LastModified) => raw_modified.push_str(&text),
                    Some(Field::Checksum) => {
                        if !raw_checksums.is_empty() {
                            raw_checksums.push(' ');
                        }
                        raw_checksums.push_str(&text);
                    }
                    None => {}
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"response" => {
                    entry.last_modified = parse_http_date(&raw_modified);
                    entry.checksum_md5 = md5_from_checksums(&raw_checksums);
                    entries.push(std::mem::take(&mut entry));
                }
                b"href" | b"getlastmodified" | b"checksum" => field = None,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => return Err(Error::Decode(format!("multistatus parse: {err}"))),
        }
        buf.clear();
    }

    Ok(entries)
}

#[async_trait]
impl StorageBackend for WebDavBackend {
    async fn list(&self) -> Result<FileStream> {
        let this = self.clone();
        let (tx, stream) = FileStream::channel();

        tokio::spawn(async move {
            let body = match this.propfind("", "infinity", LIST_BODY).await {
                Ok(body) => body,
                Err(err) => {
                    error!(base = %this.base, "listing PROPFIND failed: {err}");
                    return;
                }
            };
            let entries = match parse_multistatus(&body) {
                Ok(entries) => entries,
                Err(err) => {
                    error!(base = %this.base, "listing parse failed: {err}");
                    return;
                }
            };

            // The first response is the collection the PROPFIND was issued
            // against; its href is the base every other href gets stripped
            // down by.
            let base_href = entries
                .first()
                .map(|e| e.href.clone())
                .unwrap_or_default();
            debug!(base_href = %base_href, "listing base path");

            for dav in entries {
                if dav.is_collection || dav.href.ends_with('/') {
                    debug!(href = %dav.href, "skipping collection");
                    continue;
                }
                let relative = dav
                    .href
                    .strip_prefix(&base_href)
                    .unwrap_or(&dav.href)
                    .trim_start_matches('/');
                if relative.is_empty() {
                    continue;
                }
                let path = percent_decode_str(relative).decode_utf8_lossy().into_owned();

                if dav.checksum_md5.is_none() {
                    warn!(path = %path, "server reported no checksum, treating as hash miss");
                }
                let info = FileInfo {
                    file_name: path.rsplit('/').next().unwrap_or(&path).to_string(),
                    content_hash: dav.checksum_md5.unwrap_or_default(),
                    // WebDAV carries no Unix mode.
                    permission: types::BLOCK_PERMISSION.to_string(),
                    last_modified: dav.last_modified.unwrap_or(DateTime::UNIX_EPOCH),
                    path,
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
        match self.request(Method::HEAD, path).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn get_file(&self, path: &str) -> Result<Bytes> {
        let response = self
            .request(Method::GET, path)
            .send()
            .await
            .map_err(|err| Error::Transport(format!("GET {path}: {err}")))?;
        match response.status() {
            StatusCode::OK => response
                .bytes()
                .await
                .map_err(|err| Error::Transport(format!("reading {path}: {err}"))),
            StatusCode::NOT_FOUND => Err(Error::not_found(path)),
            status => Err(Error::Transport(format!(
                "GET {path}: unexpected status {status}"
            ))),
        }
    }

    async fn save_file(&self, path: &str, data: &[u8], _permission: &str) -> Result<()> {
        // Permission strings have no WebDAV equivalent; the server decides.
        let response = self
            .request(Method::PUT, path)
            .body(data.to_vec())
            .send()
            .await
            .map_err(|err| Error::Write(format!("PUT {path}: {err}")))?;
        match response.status() {
            StatusCode::OK | StatusCode::CREATED | StatusCode::NO_CONTENT => Ok(()),
            status => Err(Error::Write(format!(
                "PUT {path}: unexpected status {status}"
            ))),
        }
    }

    async fn remove_file(&self, path: &str) -> Result<()> {
        let response = self
            .request(Method::DELETE, path)
            .send()
            .await
            .map_err(|err| Error::Transport(format!("DELETE {path}: {err}")))?;
        match response.status() {
            StatusCode::OK | StatusCode::NO_CONTENT => Ok(()),
            StatusCode::NOT_FOUND => Err(Error::not_found(path)),
            status => Err(Error::Transport(format!(
                "DELETE {path}: unexpected status {status}"
            ))),
        }
    }

    async fn hash(&self, path: &str) -> Result<String> {
        let body = self.propfind(path, "0", CHECKSUM_BODY).await?;
        let entries = parse_multistatus(&body)?;
        entries
            .into_iter()
            .find_map(|e| e.checksum_md5)
            .ok_or_else(|| Error::not_found(format!("MD5 checksum for {path}")))
    }

    async fn last_modified(&self, path: &str) -> Result<DateTime<Utc>> {
        let body = self.propfind(path, "0", LAST_MODIFIED_BODY).await?;
        let entries = parse_multistatus(&body)?;
        entries
            .into_iter()
            .find_map(|e| e.last_modified)
            .ok_or_else(|| Error::Decode(format!("no last-modified time for {path}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:" xmlns:oc="http://owncloud.org/ns">
  <d:response>
    <d:href>/remote.php/dav/files/admin/</d:href>
    <d:propstat>
      <d:prop>
        <d:getlastmodified>Tue, 15 Nov 1994 12:45:26 GMT</d:getlastmodified>
        <d:resourcetype><d:collection/></d:resourcetype>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
  <d:response>
    <d:href>/remote.php/dav/files/admin/docs/report%20final.txt</d:href>
    <d:propstat>
      <d:prop>
        <d:getlastmodified>Wed, 16 Nov 1994 09:00:00 GMT</d:getlastmodified>
        <d:resourcetype/>
        <oc:checksums>
          <oc:checksum>SHA1:0a4d55a8d778e5022fab701977c5d840bbc486d0 MD5:5D41402ABC4B2A76B9719D911017C592</oc:checksum>
        </oc:checksums>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
</d:multistatus>"#;

    #[test]
    fn test_parse_multistatus() {
        let entries = parse_multistatus(SAMPLE.as_bytes()).unwrap();
        assert_eq!(entries.len(), 2);

        assert!(entries[0].is_collection);
        assert_eq!(entries[0].href, "/remote.php/dav/files/admin/");

        let file = &entries[1];
        assert!(!file.is_collection);
        assert_eq!(
            file.href,
            "/remote.php/dav/files/admin/docs/report%20final.txt"
        );
        assert_eq!(
            file.checksum_md5.as_deref(),
            Some("5d41402abc4b2a76b9719d911017c592")
        );
        assert_eq!(
            file.last_modified.unwrap().timestamp(),
            DateTime::parse_from_rfc2822("Wed, 16 Nov 1994 09:00:00 GMT")
                .unwrap()
                .timestamp()
        );
    }

    #[test]
    fn test_md5_from_checksums() {
        assert_eq!(
            md5_from_checksums("SHA1:aaa MD5:BBB ADLER32:ccc").as_deref(),
            Some("bbb")
        );
        assert!(md5_from_checksums("SHA1:aaa ADLER32:ccc").is_none());
        assert!(md5_from_checksums("").is_none());
    }

    #[test]
    fn test_parse_http_date() {
        let parsed = parse_http_date("Tue, 15 Nov 1994 12:45:26 GMT").unwrap();
        assert_eq!(parsed.timestamp(), 784_903_526);
        assert!(parse_http_date("not a date").is_none());
    }

    #[test]
    fn test_url_encoding_and_trailing_slash() {
        let backend = WebDavBackend::new("https://dav.example.com/files", "u", "p");
        assert_eq!(
            backend.url("docs/report final.txt"),
            "https://dav.example.com/files/docs/report%20final.txt"
        );
        assert_eq!(backend.url("/a.txt"), "https://dav.example.com/files/a.txt");
    }
}
