//! Client side of HTTP/2 (RFC 9113)
//!
//! One [`Connection`] multiplexes many request/response exchanges over a
//! single byte stream that has already negotiated `h2`.
//!
//! Layers, from the wire up:
//!
//! - [`frames`] and [`codec`]: the ten frame layouts and moving them over
//!   the transport
//! - [`header_block`]: HPACK (RFC 7541) for request and response fields
//! - [`stream`]: per-exchange state and the table of open streams
//! - [`connection`]: the reader task, the write lock and both levels of
//!   flow control
//! - [`manager`]: at most one live connection per `(host, port)`
//!
//! # Examples
//!
//! ```no_run
//! use h2wire::http::h2::{Connection, ConnectionConfig, H2Request};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(tls_stream: tokio::net::TcpStream) -> Result<(), Box<dyn std::error::Error>> {
//! let conn = Connection::handshake(tls_stream, ConnectionConfig::default()).await?;
//!
//! let request = H2Request::builder()
//!     .method("POST")
//!     .uri("https://example.com/upload")?
//!     .header("content-type", "text/plain")
//!     .body("hello")
//!     .build()?;
//!
//! let response = conn.send_request(request, &CancellationToken::new()).await?;
//! println!("Status: {}", response.status());
//!
//! conn.dispose().await;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod flow_control;
pub mod frames;
pub mod header_block;
pub mod manager;
pub mod message;
pub mod settings;
pub mod stream;

pub use codec::{FrameCodec, FrameReader, FrameWriter};
pub use config::{ConnectionConfig, ConnectionConfigBuilder};
pub use connection::{Connection, ConnectionId};
pub use error::{Error, ErrorCode, Result};
pub use frames::{DataFrame, Frame, FrameFlags, FrameType, HeadersFrame, SettingsFrame};
pub use manager::ConnectionManager;
pub use message::{H2Request, H2RequestBuilder, H2Response};
pub use settings::{Settings, SettingsBuilder};
pub use stream::{H2Stream, StreamState};

/// Client connection preface, sent before the first SETTINGS
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Size of the fixed frame header
pub const FRAME_HEADER_SIZE: usize = 9;

/// Window size both levels start from
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65535;

/// Frame payload limit until SETTINGS_MAX_FRAME_SIZE says otherwise
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16384;

/// Largest value SETTINGS_MAX_FRAME_SIZE may take (2^24 - 1)
pub const MAX_MAX_FRAME_SIZE: u32 = 16_777_215;

/// HPACK dynamic table size until SETTINGS_HEADER_TABLE_SIZE says otherwise
pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4096;

/// Largest flow-control window (2^31 - 1)
pub const MAX_WINDOW_SIZE: u32 = 0x7FFFFFFF;

/// Stream ids are 31 bits
pub const MAX_STREAM_ID: u32 = 0x7FFFFFFF;

/// Frames on stream 0 apply to the whole connection
pub const CONNECTION_STREAM_ID: u32 = 0;
