//! NTRIP v2 client over HTTP.
//!
//! `GET /<mountpoint>` streams correction bytes; `GET /` returns the
//! sourcetable. Casters that answer with the v1 `ICY 200 OK` status line
//! are not supported.

use std::time::Duration;

use log::{debug, info};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Response, StatusCode};

use gnss_core::sourcetable::{parse_sourcetable, Sourcetable};

use crate::error::{ReceiverError, Result};

pub const USER_AGENT: &str = concat!("NTRIP gnss-rtk/", env!("CARGO_PKG_VERSION"));
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Caster connection settings plus a reusable HTTP client.
#[derive(Clone)]
pub struct NtripClient {
    base_url: String,
    username: Option<String>,
    password: Option<String>,
    client: reqwest::Client,
}

impl NtripClient {
    pub fn new(
        host: &str,
        port: u16,
        username: Option<String>,
        password: Option<String>,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert("ntrip-version", HeaderValue::from_static("Ntrip/2.0"));

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        Ok(NtripClient {
            base_url: base_url(host, port)?,
            username,
            password,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL of a mountpoint stream.
    pub fn mount_url(&self, mountpoint: &str) -> String {
        format!("{}/{}", self.base_url, mountpoint.trim_start_matches('/'))
    }

    /// Open a mountpoint stream. The response body is the raw byte stream.
    pub async fn connect(&self, mountpoint: &str) -> Result<Response> {
        let url = self.mount_url(mountpoint);
        info!("connecting to {url}");
        let response = self.get(&url).await?;
        debug!("{url}: {:?}", response.headers().get("content-type"));
        Ok(response)
    }

    /// Download and parse the caster's sourcetable.
    pub async fn sourcetable(&self) -> Result<Sourcetable> {
        let url = format!("{}/", self.base_url);
        let text = self.get(&url).await?.text().await?;
        let table = parse_sourcetable(&text);
        info!("{} mountpoints listed by {}", table.mounts.len(), self.base_url);
        Ok(table)
    }

    async fn get(&self, url: &str) -> Result<Response> {
        let mut request = self.client.get(url);
        if let Some(user) = &self.username {
            request = request.basic_auth(user, self.password.as_deref());
        }
        let response = request.send().await?;
        if response.status() != StatusCode::OK {
            return Err(ReceiverError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }
}

/// `http://host:port` unless `host` already carries a scheme.
fn base_url(host: &str, port: u16) -> Result<String> {
    let host = host.trim().trim_end_matches('/');
    if host.is_empty() {
        return Err(ReceiverError::Address("empty host".into()));
    }
    if host.starts_with("http://") || host.starts_with("https://") {
        return Ok(host.to_string());
    }
    if host.contains('/') {
        return Err(ReceiverError::Address(host.to_string()));
    }
    Ok(format!("http://{host}:{port}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod testutil {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    /// One-shot HTTP server. Returns its port and a handle yielding the raw
    /// request head it received.
    pub(crate) fn serve_once(
        status: &'static str,
        body: Vec<u8>,
        linger: Duration,
    ) -> (u16, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut head = Vec::new();
            let mut byte = [0u8; 1];
            while !head.ends_with(b"\r\n\r\n") {
                if stream.read(&mut byte).unwrap() == 0 {
                    break;
                }
                head.push(byte[0]);
            }
            let header = format!("HTTP/1.1 {status}\r\nConnection: close\r\n\r\n");
            stream.write_all(header.as_bytes()).unwrap();
            stream.write_all(&body).unwrap();
            stream.flush().unwrap();
            thread::sleep(linger);
            String::from_utf8_lossy(&head).into_owned()
        });
        (port, handle)
    }
}
