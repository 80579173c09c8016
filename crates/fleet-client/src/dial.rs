// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Opening the TCP stream a worker talks over.
//!
//! Direct dials go straight to the remote. Proxied dials connect to the proxy
//! and issue `CONNECT remote HTTP/1.1`; once the proxy answers 2xx the same
//! stream carries the tunnelled session.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use fleet_core::{ProxyUrl, WorkerError};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Largest proxy response head accepted before giving up.
pub const MAX_RESPONSE_HEAD: usize = 8 * 1024;

const HTTP_PROXY_DEFAULT_PORT: u16 = 80;

/// Connect to `remote` (`host:port`), through `proxy` when given.
///
/// The whole attempt (including the proxy handshake) is bounded by `timeout`.
pub async fn dial(
    remote: &str,
    proxy: Option<&ProxyUrl>,
    timeout: Duration,
) -> Result<TcpStream, WorkerError> {
    let Some(proxy) = proxy else {
        return bounded(remote, timeout, connect(remote)).await;
    };
    if proxy.scheme != "http" {
        return Err(WorkerError::UnsupportedProxy(proxy.scheme.clone()));
    }
    let via = proxy.authority(HTTP_PROXY_DEFAULT_PORT);
    bounded(&via, timeout, async {
        let mut stream = connect(&via).await?;
        open_tunnel(&mut stream, remote, proxy).await?;
        Ok::<_, WorkerError>(stream)
    })
    .await
}

async fn bounded<F>(addr: &str, timeout: Duration, attempt: F) -> Result<TcpStream, WorkerError>
where
    F: std::future::Future<Output = Result<TcpStream, WorkerError>>,
{
    tokio::time::timeout(timeout, attempt)
        .await
        .map_err(|_| WorkerError::ConnectTimeout {
            addr: addr.to_owned(),
        })?
}

async fn connect(addr: &str) -> Result<TcpStream, WorkerError> {
    TcpStream::connect(addr)
        .await
        .map_err(|source| WorkerError::Connect {
            addr: addr.to_owned(),
            source,
        })
}

/// `CONNECT` request head for `remote`, with basic auth when the proxy URL
/// carries credentials.
pub fn connect_request(remote: &str, proxy: &ProxyUrl) -> String {
    let mut head = format!("CONNECT {remote} HTTP/1.1\r\nHost: {remote}\r\n");
    if let Some(user) = &proxy.username {
        let credentials = format!("{user}:{}", proxy.password.as_deref().unwrap_or_default());
        head.push_str("Proxy-Authorization: Basic ");
        head.push_str(&STANDARD.encode(credentials));
        head.push_str("\r\n");
    }
    head.push_str("\r\n");
    head
}

async fn open_tunnel(
    stream: &mut TcpStream,
    remote: &str,
    proxy: &ProxyUrl,
) -> Result<(), WorkerError> {
    stream
        .write_all(connect_request(remote, proxy).as_bytes())
        .await?;
    let head = read_head(stream).await?;
    let status_line = head.lines().next().unwrap_or_default();
    match parse_status(status_line) {
        Some(code) if (200..300).contains(&code) => Ok(()),
        Some(_) => Err(WorkerError::Proxy(format!(
            "proxy refused tunnel: {status_line}"
        ))),
        None => Err(WorkerError::Proxy(format!(
            "malformed proxy status line: {status_line:?}"
        ))),
    }
}

// One byte at a time so nothing past the blank line is consumed.
async fn read_head(stream: &mut TcpStream) -> Result<String, WorkerError> {
    let mut head = Vec::with_capacity(256);
    let mut byte = [0_u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_RESPONSE_HEAD {
            return Err(WorkerError::Proxy("proxy response head too large".into()));
        }
        if stream.read(&mut byte).await? == 0 {
            return Err(WorkerError::Proxy(
                "proxy closed the connection during handshake".into(),
            ));
        }
        head.push(byte[0]);
    }
    Ok(String::from_utf8_lossy(&head).into_owned())
}

fn parse_status(line: &str) -> Option<u16> {
    let mut parts = line.split_whitespace();
    if !parts.next()?.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    fn proxy(url: &str) -> ProxyUrl {
        ProxyUrl::parse(url).unwrap()
    }

    #[test]
    fn request_without_credentials() {
        let head = connect_request("example.net:4343", &proxy("http://p:3128"));
        assert_eq!(
            head,
            "CONNECT example.net:4343 HTTP/1.1\r\nHost: example.net:4343\r\n\r\n"
        );
    }

    #[test]
    fn request_with_credentials_uses_basic_auth() {
        let head = connect_request("r:1", &proxy("http://user:pass@p:3128"));
        assert!(head.contains("Proxy-Authorization: Basic dXNlcjpwYXNz\r\n"));
    }

    #[test]
    fn status_line_parsing() {
        assert_eq!(parse_status("HTTP/1.1 200 Connection established"), Some(200));
        assert_eq!(parse_status("HTTP/1.0 407 Proxy Authentication Required"), Some(407));
        assert_eq!(parse_status("SSH-2.0-OpenSSH"), None);
        assert_eq!(parse_status(""), None);
    }

    #[tokio::test]
    async fn socks_proxy_is_unsupported() {
        let err = dial("r:1", Some(&proxy("socks5://p:1080")), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::UnsupportedProxy(scheme) if scheme == "socks5"));
    }

    #[tokio::test]
    async fn refused_tunnel_is_a_proxy_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            while reader.read_line(&mut line).await.unwrap() > 0 && line != "\r\n" {
                line.clear();
            }
            reader
                .get_mut()
                .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n")
                .await
                .unwrap();
        });

        let err = dial(
            "r:1",
            Some(&proxy(&format!("http://{addr}"))),
            Duration::from_secs(2),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, WorkerError::Proxy(msg) if msg.contains("407")));
    }

    #[tokio::test]
    async fn silent_proxy_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _hold = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let err = dial(
            "r:1",
            Some(&proxy(&format!("http://{addr}"))),
            Duration::from_millis(200),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, WorkerError::ConnectTimeout { .. }));
    }
}
