//! HTTP transport layer
//!
//! This module hosts the HTTP/2 connection engine and the protocol router
//! that decides, per negotiated byte stream, whether the engine is used.
//!
//! # Architecture
//!
//! The caller establishes the (usually TLS) byte stream and learns the ALPN
//! result. [`router::ProtocolRouter`] then either hands the stream to the
//! [`h2::ConnectionManager`] or gives it back for the legacy HTTP/1.1 path:
//!
//! ```no_run
//! use h2wire::http::h2::{ConnectionConfig, ConnectionManager, H2Request};
//! use h2wire::http::router::{ProtocolRouter, Routed};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(tls_stream: tokio::net::TcpStream) -> Result<(), Box<dyn std::error::Error>> {
//! let router = ProtocolRouter::new(ConnectionManager::new(ConnectionConfig::default()));
//!
//! match router.route("example.com", 443, tls_stream, Some(b"h2")).await? {
//!     Routed::Http2(conn) => {
//!         let request = H2Request::get("https://example.com/")?;
//!         let response = conn.send_request(request, &CancellationToken::new()).await?;
//!         println!("Status: {}", response.status());
//!     }
//!     Routed::Legacy(_stream) => {
//!         // HTTP/1.1 handled elsewhere
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod h2;
pub mod headers;
pub mod router;

pub use headers::Headers;
pub use router::{Protocol, ProtocolRouter, Routed};
