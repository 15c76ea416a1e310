//! Protocol routing on the negotiated ALPN result
//!
//! Once the TLS layer reports which application protocol it agreed on,
//! `h2` streams go to the pooled HTTP/2 engine and everything else is
//! handed back untouched for the HTTP/1.1 path.

use crate::http::h2::{Connection, ConnectionManager, Result};
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// ALPN identifier for HTTP/2 over TLS
pub const ALPN_H2: &[u8] = b"h2";

/// ALPN identifier for HTTP/1.1
pub const ALPN_HTTP11: &[u8] = b"http/1.1";

/// Application protocol spoken on a byte stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http2,
    Http11,
}

impl Protocol {
    /// Map the negotiated ALPN name to a protocol
    ///
    /// No negotiation, or any name other than `h2`, means HTTP/1.1.
    pub fn from_alpn(alpn: Option<&[u8]>) -> Self {
        match alpn {
            Some(ALPN_H2) => Protocol::Http2,
            _ => Protocol::Http11,
        }
    }

    /// Wire identifier used in ALPN
    pub fn alpn_id(&self) -> &'static [u8] {
        match self {
            Protocol::Http2 => ALPN_H2,
            Protocol::Http11 => ALPN_HTTP11,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Http2 => write!(f, "HTTP/2"),
            Protocol::Http11 => write!(f, "HTTP/1.1"),
        }
    }
}

/// Where a byte stream ended up
pub enum Routed<S> {
    /// An HTTP/2 connection for the origin, new or reused
    Http2(Arc<Connection>),
    /// The stream, untouched, for the HTTP/1.1 path
    Legacy(S),
}

impl<S> Routed<S> {
    /// Protocol the stream was routed to
    pub fn protocol(&self) -> Protocol {
        match self {
            Routed::Http2(_) => Protocol::Http2,
            Routed::Legacy(_) => Protocol::Http11,
        }
    }
}

impl<S> fmt::Debug for Routed<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Routed::Http2(conn) => f.debug_tuple("Http2").field(conn).finish(),
            Routed::Legacy(_) => f.write_str("Legacy(..)"),
        }
    }
}

/// Sends negotiated byte streams to the right protocol implementation
#[derive(Debug, Default)]
pub struct ProtocolRouter {
    manager: ConnectionManager,
}

impl ProtocolRouter {
    /// Route HTTP/2 streams through `manager`
    pub fn new(manager: ConnectionManager) -> Self {
        ProtocolRouter { manager }
    }

    /// The pool backing HTTP/2 routes
    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Route a freshly negotiated stream to `host:port`
    pub async fn route<S>(&self, host: &str, port: u16, io: S, alpn: Option<&[u8]>) -> Result<Routed<S>>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let protocol = Protocol::from_alpn(alpn);
        tracing::debug!(host, port, protocol = %protocol, "routing negotiated stream");

        match protocol {
            Protocol::Http2 => {
                let conn = self.manager.get_or_connect(host, port, io).await?;
                Ok(Routed::Http2(conn))
            }
            Protocol::Http11 => Ok(Routed::Legacy(io)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_alpn() {
        assert_eq!(Protocol::from_alpn(Some(b"h2")), Protocol::Http2);
        assert_eq!(Protocol::from_alpn(Some(b"http/1.1")), Protocol::Http11);
        assert_eq!(Protocol::from_alpn(Some(b"h2c")), Protocol::Http11);
        assert_eq!(Protocol::from_alpn(None), Protocol::Http11);
        assert_eq!(Protocol::Http2.alpn_id(), b"h2");
        assert_eq!(Protocol::Http11.to_string(), "HTTP/1.1");
    }

    #[tokio::test]
    async fn test_legacy_stream_handed_back() {
        let router = ProtocolRouter::default();
        let (client, _server) = tokio::io::duplex(64);
        let routed = router.route("example.com", 443, client, Some(b"http/1.1")).await.unwrap();
        assert!(matches!(routed, Routed::Legacy(_)));
        assert!(router.manager().is_empty());
    }

    #[tokio::test]
    async fn test_h2_stream_pooled() {
        let router = ProtocolRouter::default();
        let (client, _server) = tokio::io::duplex(1 << 16);
        let routed = router.route("example.com", 443, client, Some(ALPN_H2)).await.unwrap();
        assert_eq!(routed.protocol(), Protocol::Http2);
        assert_eq!(router.manager().len(), 1);
        router.manager().dispose_all().await;
    }
}
