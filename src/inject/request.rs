//! CONNECT request head parsing and payload rendering.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::inject::rules::split_host_port;

/// Upper bound on a request or response head.
pub const MAX_HEAD_BYTES: usize = 16 * 1024;

#[derive(Debug, Error)]
pub enum InjectError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed request: {0}")]
    Malformed(String),

    #[error("Unsupported method: {0}")]
    Method(String),

    #[error("Head exceeds {} bytes", MAX_HEAD_BYTES)]
    TooLarge,

    #[error("Dial {target} failed: {source}")]
    Dial {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("Timed out: {0}")]
    Timeout(&'static str),
}

/// A parsed `CONNECT host:port HTTP/x` request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub host: String,
    pub port: u16,
    pub version: String,
}

impl ConnectRequest {
    pub fn host_port(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Read up to and including the blank line ending a head.
///
/// Returns the head and any bytes that arrived after it.
pub async fn read_head<R>(reader: &mut R) -> Result<(Vec<u8>, Vec<u8>), InjectError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        if let Some(end) = head_end(&buf) {
            let rest = buf.split_off(end);
            return Ok((buf, rest));
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(InjectError::TooLarge);
        }
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(InjectError::Malformed("connection closed before end of head".into()));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

/// Parse the request line of a CONNECT head.
pub fn parse_connect(head: &[u8]) -> Result<ConnectRequest, InjectError> {
    let text = std::str::from_utf8(head).map_err(|_| InjectError::Malformed("head is not UTF-8".into()))?;
    let line = text.lines().next().unwrap_or_default();

    let mut parts = line.split_whitespace();
    let (Some(method), Some(target), Some(version)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(InjectError::Malformed(format!("bad request line {:?}", line)));
    };
    if !method.eq_ignore_ascii_case("CONNECT") {
        return Err(InjectError::Method(method.to_string()));
    }

    let (host, port) = split_host_port(target, 0);
    if host.is_empty() || port == 0 {
        return Err(InjectError::Malformed(format!("bad CONNECT target {:?}", target)));
    }

    Ok(ConnectRequest {
        host,
        port,
        version: version.to_string(),
    })
}

/// Expand the payload placeholders for `request`.
pub fn render_payload(template: &str, request: &ConnectRequest) -> String {
    template
        .replace("[host_port]", &request.host_port())
        .replace("[host]", &request.host)
        .replace("[port]", &request.port.to_string())
        .replace("[protocol]", &request.version)
        .replace("[crlf]", "\r\n")
        .replace("[cr]", "\r")
        .replace("[lf]", "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_connect_line() {
        let req = parse_connect(b"CONNECT 104.16.1.1:443 HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        assert_eq!(req.host, "104.16.1.1");
        assert_eq!(req.port, 443);
        assert_eq!(req.version, "HTTP/1.1");
        assert_eq!(req.host_port(), "104.16.1.1:443");
    }

    #[test]
    fn rejects_other_methods_and_bad_targets() {
        assert!(matches!(
            parse_connect(b"GET / HTTP/1.1\r\n\r\n"),
            Err(InjectError::Method(m)) if m == "GET"
        ));
        assert!(matches!(
            parse_connect(b"CONNECT example.com HTTP/1.1\r\n\r\n"),
            Err(InjectError::Malformed(_))
        ));
        assert!(matches!(parse_connect(b"CONNECT\r\n\r\n"), Err(InjectError::Malformed(_))));
    }

    #[tokio::test]
    async fn read_head_keeps_trailing_bytes() {
        let mut input: &[u8] = b"CONNECT a.com:80 HTTP/1.1\r\n\r\n\x16\x03\x01";
        let (head, rest) = read_head(&mut input).await.unwrap();
        assert!(head.ends_with(b"\r\n\r\n"));
        assert_eq!(rest, b"\x16\x03\x01");
    }

    #[tokio::test]
    async fn read_head_fails_on_early_eof() {
        let mut input: &[u8] = b"CONNECT a.com:80 HTTP/1.1\r\n";
        assert!(matches!(read_head(&mut input).await, Err(InjectError::Malformed(_))));
    }

    #[test]
    fn payload_placeholders_expand() {
        let req = ConnectRequest {
            host: "akamai.net".into(),
            port: 80,
            version: "HTTP/1.1".into(),
        };
        let payload = render_payload("CONNECT [host_port] [protocol][crlf]Host: [host][crlf][crlf]", &req);
        assert_eq!(payload, "CONNECT akamai.net:80 HTTP/1.1\r\nHost: akamai.net\r\n\r\n");
    }
}
