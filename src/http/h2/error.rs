//! Failures reported by the HTTP/2 engine
//!
//! Errors fall into three groups that callers can tell apart:
//! - protocol failures (the peer misbehaved, or the connection died)
//! - resource limits (the peer exceeded bounds configured locally)
//! - cancellation (requested locally, or a CANCEL reset from the peer)
//!
//! The wire-level codes of RFC 9113 Section 7 live in [`ErrorCode`].

use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Read or write on the transport failed
    #[error("transport: {0}")]
    Io(Arc<std::io::Error>),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("internal failure: {0}")]
    Internal(String),

    #[error("flow control violated: {0}")]
    FlowControl(String),

    #[error("bad frame size: {0}")]
    FrameSize(String),

    /// HPACK decoding failed; the shared decoder state is now unusable
    #[error("header compression: {0}")]
    Compression(String),

    /// The stream was cancelled, locally or by a CANCEL reset from the peer
    #[error("stream {0} cancelled")]
    Cancelled(u32),

    /// The peer reset the stream with a code other than CANCEL
    #[error("stream {stream_id} reset by peer with {code}")]
    StreamReset { stream_id: u32, code: ErrorCode },

    /// The peer sent GOAWAY and will not process this stream
    #[error("peer going away after stream {last_stream_id} ({code}): {debug}")]
    GoAway {
        last_stream_id: u32,
        code: ErrorCode,
        /// Opaque debug data, lossily decoded
        debug: String,
    },

    /// Decoded header list exceeds SETTINGS_MAX_HEADER_LIST_SIZE
    #[error("header list of {size} bytes exceeds limit of {limit}")]
    HeaderListTooLarge { size: usize, limit: usize },

    #[error("response body exceeds limit of {limit} bytes")]
    BodyTooLarge { limit: usize },

    /// First response block does not start with `:status`
    #[error("response has no :status")]
    MissingStatus,

    /// `:status` is not an integer in 100..=999
    #[error("malformed :status {0:?}")]
    InvalidStatus(String),

    #[error(":status in trailers")]
    StatusInTrailers,

    #[error("pseudo-header {0} not allowed here")]
    UnexpectedPseudoHeader(String),

    #[error("malformed header field: {0}")]
    InvalidHeader(String),

    #[error("request rejected: {0}")]
    InvalidRequest(String),

    /// No client stream ids remain on this connection
    #[error("stream ids exhausted")]
    StreamIdsExhausted,

    #[error("peer allows at most {0} concurrent streams")]
    TooManyStreams(u32),

    #[error("bad settings: {0}")]
    InvalidSettings(String),

    /// The transport reached end-of-file
    #[error("connection closed")]
    ConnectionClosed,

    #[error("connection disposed")]
    Disposed,
}

impl Error {
    /// Error code to put in GOAWAY or RST_STREAM for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Protocol(_)
            | Error::MissingStatus
            | Error::InvalidStatus(_)
            | Error::StatusInTrailers
            | Error::UnexpectedPseudoHeader(_)
            | Error::InvalidHeader(_) => ErrorCode::ProtocolError,
            Error::FlowControl(_) => ErrorCode::FlowControlError,
            Error::FrameSize(_) => ErrorCode::FrameSizeError,
            Error::Compression(_) => ErrorCode::CompressionError,
            Error::Cancelled(_)
            | Error::HeaderListTooLarge { .. }
            | Error::BodyTooLarge { .. } => ErrorCode::Cancel,
            Error::StreamReset { code, .. } | Error::GoAway { code, .. } => *code,
            Error::Disposed => ErrorCode::NoError,
            _ => ErrorCode::InternalError,
        }
    }

    /// True for cancellation, whether local or signalled by the peer
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }

    /// True when the peer exceeded a locally configured bound
    pub fn is_limit_exceeded(&self) -> bool {
        matches!(
            self,
            Error::HeaderListTooLarge { .. } | Error::BodyTooLarge { .. }
        )
    }

    /// True when the connection that produced this error cannot open new
    /// streams and should be dropped from the pool
    pub fn is_stale_connection(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::GoAway { .. }
                | Error::ConnectionClosed
                | Error::Disposed
                | Error::StreamIdsExhausted
                | Error::Protocol(_)
                | Error::FlowControl(_)
                | Error::FrameSize(_)
                | Error::Compression(_)
                | Error::Internal(_)
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::ConnectionClosed
        } else {
            Error::Io(Arc::new(err))
        }
    }
}

/// Error codes carried by RST_STREAM and GOAWAY
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NoError,
    ProtocolError,
    InternalError,
    FlowControlError,
    SettingsTimeout,
    StreamClosed,
    FrameSizeError,
    RefusedStream,
    Cancel,
    CompressionError,
    ConnectError,
    EnhanceYourCalm,
    InadequateSecurity,
    Http11Required,
}

/// Registered codes in wire order: the index is the code
const REGISTRY: [(ErrorCode, &str); 14] = [
    (ErrorCode::NoError, "NO_ERROR"),
    (ErrorCode::ProtocolError, "PROTOCOL_ERROR"),
    (ErrorCode::InternalError, "INTERNAL_ERROR"),
    (ErrorCode::FlowControlError, "FLOW_CONTROL_ERROR"),
    (ErrorCode::SettingsTimeout, "SETTINGS_TIMEOUT"),
    (ErrorCode::StreamClosed, "STREAM_CLOSED"),
    (ErrorCode::FrameSizeError, "FRAME_SIZE_ERROR"),
    (ErrorCode::RefusedStream, "REFUSED_STREAM"),
    (ErrorCode::Cancel, "CANCEL"),
    (ErrorCode::CompressionError, "COMPRESSION_ERROR"),
    (ErrorCode::ConnectError, "CONNECT_ERROR"),
    (ErrorCode::EnhanceYourCalm, "ENHANCE_YOUR_CALM"),
    (ErrorCode::InadequateSecurity, "INADEQUATE_SECURITY"),
    (ErrorCode::Http11Required, "HTTP_1_1_REQUIRED"),
];

impl ErrorCode {
    pub fn as_u32(self) -> u32 {
        self.index() as u32
    }

    /// Decode a code received from the peer
    ///
    /// Unregistered codes carry no special meaning (RFC 9113 Section 7) and
    /// are treated as INTERNAL_ERROR.
    pub fn from_wire(code: u32) -> Self {
        usize::try_from(code)
            .ok()
            .and_then(|i| REGISTRY.get(i))
            .map_or(ErrorCode::InternalError, |(c, _)| *c)
    }

    pub fn name(self) -> &'static str {
        REGISTRY[self.index()].1
    }

    fn index(self) -> usize {
        match self {
            ErrorCode::NoError => 0x0,
            ErrorCode::ProtocolError => 0x1,
            ErrorCode::InternalError => 0x2,
            ErrorCode::FlowControlError => 0x3,
            ErrorCode::SettingsTimeout => 0x4,
            ErrorCode::StreamClosed => 0x5,
            ErrorCode::FrameSizeError => 0x6,
            ErrorCode::RefusedStream => 0x7,
            ErrorCode::Cancel => 0x8,
            ErrorCode::CompressionError => 0x9,
            ErrorCode::ConnectError => 0xa,
            ErrorCode::EnhanceYourCalm => 0xb,
            ErrorCode::InadequateSecurity => 0xc,
            ErrorCode::Http11Required => 0xd,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u32())
    }
}

/// Result type for HTTP/2 operations
pub type Result<T> = std::result::Result<T, Error>;
