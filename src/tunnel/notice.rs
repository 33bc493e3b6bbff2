//! Tunnel core notices.
//!
//! The core prints one JSON object per line:
//! `{"noticeType":"Tunnels","data":{"count":1},"timestamp":"..."}`.

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Number of established tunnels.
    Tunnels(u32),
    BytesTransferred { sent: u64, received: u64 },
    ServerRegion(String),
    ListeningHttpProxyPort(u16),
    /// Any other notice type.
    Other(String),
}

#[derive(Deserialize)]
struct RawNotice {
    #[serde(rename = "noticeType")]
    notice_type: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct Count {
    count: u32,
}

#[derive(Deserialize)]
struct Bytes {
    #[serde(default)]
    sent: u64,
    #[serde(default)]
    received: u64,
}

#[derive(Deserialize)]
struct Region {
    #[serde(rename = "serverRegion")]
    server_region: String,
}

#[derive(Deserialize)]
struct Port {
    port: u16,
}

impl Notice {
    /// Parse one output line. Returns `None` for anything that is not a notice.
    pub fn parse(line: &str) -> Option<Self> {
        let raw: RawNotice = serde_json::from_str(line.trim()).ok()?;
        let data = raw.data;
        let notice = match raw.notice_type.as_str() {
            "Tunnels" => Notice::Tunnels(serde_json::from_value::<Count>(data).ok()?.count),
            "BytesTransferred" => {
                let bytes: Bytes = serde_json::from_value(data).ok()?;
                Notice::BytesTransferred {
                    sent: bytes.sent,
                    received: bytes.received,
                }
            }
            "ConnectedServerRegion" => {
                Notice::ServerRegion(serde_json::from_value::<Region>(data).ok()?.server_region)
            }
            "ListeningHttpProxyPort" => {
                Notice::ListeningHttpProxyPort(serde_json::from_value::<Port>(data).ok()?.port)
            }
            _ => Notice::Other(raw.notice_type),
        };
        Some(notice)
    }
}
