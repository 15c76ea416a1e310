//! Scripted HTTP/2 server for driving a client connection over an
//! in-memory duplex pipe

#![allow(dead_code)]

use bytes::{Bytes, BytesMut};
use h2wire::http::h2::frames::{ContinuationFrame, RstStreamFrame};
use h2wire::http::h2::{
    Connection, ConnectionConfig, DataFrame, Frame, FrameReader, FrameType, FrameWriter, HeadersFrame, Settings,
    SettingsFrame, CONNECTION_PREFACE,
};
use std::sync::Arc;
use std::sync::Once;
use std::time::Duration;
use tokio::io::{AsyncReadExt, DuplexStream, ReadHalf, WriteHalf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const PEER_READ_LIMIT: u32 = 16_777_215;
const STEP_TIMEOUT: Duration = Duration::from_secs(5);

static TRACING: Once = Once::new();

/// Log to the test writer; filter with `RUST_LOG=h2wire=trace`
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("h2wire=warn")),
            )
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();
    });
}

/// The server end of a test connection
pub struct Peer {
    reader: FrameReader<ReadHalf<DuplexStream>>,
    writer: FrameWriter<WriteHalf<DuplexStream>>,
    encoder: hpack::Encoder<'static>,
    decoder: hpack::Decoder<'static>,
}

/// A request as the server saw it
#[derive(Debug)]
pub struct ReceivedRequest {
    pub stream_id: u32,
    pub fields: Vec<(String, String)>,
    pub end_stream: bool,
    /// The header block exactly as sent
    pub block: Bytes,
}

impl ReceivedRequest {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Handshake a client connection against a peer advertising `settings`
pub async fn connect_with(config: ConnectionConfig, settings: Settings) -> (Arc<Connection>, Peer) {
    init_tracing();
    let (client, server) = tokio::io::duplex(1 << 20);
    let conn = Connection::handshake(client, config).await.expect("client handshake");

    let (mut read_half, write_half) = tokio::io::split(server);
    let mut preface = [0u8; 24];
    read_half.read_exact(&mut preface).await.expect("preface");
    assert_eq!(&preface[..], CONNECTION_PREFACE);

    let mut peer = Peer {
        reader: FrameReader::new(read_half),
        writer: FrameWriter::new(write_half),
        encoder: hpack::Encoder::new(),
        decoder: hpack::Decoder::new(),
    };

    let client_settings = peer.recv().await;
    assert_eq!(client_settings.frame_type, FrameType::Settings);
    assert!(!client_settings.flags.is_ack());

    peer.send(SettingsFrame::new(settings).encode()).await;
    peer.send(SettingsFrame::ack().encode()).await;

    // Once the client acknowledges, our settings are in effect
    let ack = peer.recv_type(FrameType::Settings).await;
    assert!(ack.flags.is_ack());

    (conn, peer)
}

pub async fn connect() -> (Arc<Connection>, Peer) {
    connect_with(ConnectionConfig::default(), Settings::new()).await
}

impl Peer {
    pub async fn send(&mut self, frame: Frame) {
        self.writer.write_frame(&frame).await.expect("peer write");
    }

    /// Next frame from the client
    pub async fn recv(&mut self) -> Frame {
        tokio::time::timeout(STEP_TIMEOUT, self.reader.read_frame(PEER_READ_LIMIT))
            .await
            .expect("timed out waiting for a frame")
            .expect("peer read")
    }

    /// Next frame, or `None` if nothing arrives within `wait`
    pub async fn try_recv(&mut self, wait: Duration) -> Option<Frame> {
        match tokio::time::timeout(wait, self.reader.read_frame(PEER_READ_LIMIT)).await {
            Ok(Ok(frame)) => Some(frame),
            Ok(Err(_)) | Err(_) => None,
        }
    }

    /// Skip frames until one of `frame_type` arrives
    pub async fn recv_type(&mut self, frame_type: FrameType) -> Frame {
        loop {
            let frame = self.recv().await;
            if frame.frame_type == frame_type {
                return frame;
            }
        }
    }

    /// Read the client's next request header block
    pub async fn recv_request(&mut self) -> ReceivedRequest {
        let first = self.recv_type(FrameType::Headers).await;
        let headers = HeadersFrame::decode(&first).expect("HEADERS");
        let mut block = BytesMut::from(&headers.header_block[..]);
        let mut end_headers = headers.end_headers;

        while !end_headers {
            let next = self.recv().await;
            assert_eq!(next.frame_type, FrameType::Continuation);
            assert_eq!(next.stream_id, first.stream_id);
            let continuation = ContinuationFrame::decode(&next).expect("CONTINUATION");
            block.extend_from_slice(&continuation.header_block);
            end_headers = continuation.end_headers;
        }

        let block = block.freeze();
        let fields = self
            .decoder
            .decode(&block)
            .expect("client header block")
            .into_iter()
            .map(|(n, v)| {
                (
                    String::from_utf8(n).expect("utf-8 name"),
                    String::from_utf8(v).expect("utf-8 value"),
                )
            })
            .collect();

        ReceivedRequest {
            stream_id: first.stream_id,
            fields,
            end_stream: headers.end_stream,
            block,
        }
    }

    /// Read request DATA for `stream_id` until END_STREAM
    pub async fn recv_body(&mut self, stream_id: u32) -> Bytes {
        let mut body = BytesMut::new();
        loop {
            let frame = self.recv_type(FrameType::Data).await;
            assert_eq!(frame.stream_id, stream_id);
            let data = DataFrame::decode(&frame).expect("DATA");
            body.extend_from_slice(&data.data);
            if data.end_stream {
                return body.freeze();
            }
        }
    }

    /// HPACK-encode a header list with the peer's encoder
    pub fn encode_headers(&mut self, fields: &[(&str, &str)]) -> Bytes {
        let block = self
            .encoder
            .encode(fields.iter().map(|(n, v)| (n.as_bytes(), v.as_bytes())));
        Bytes::from(block)
    }

    pub async fn send_headers(&mut self, stream_id: u32, fields: &[(&str, &str)], end_stream: bool) {
        let block = self.encode_headers(fields);
        self.send(HeadersFrame::new(stream_id, block, end_stream, true).encode())
            .await;
    }

    pub async fn send_data(&mut self, stream_id: u32, data: &[u8], end_stream: bool) {
        self.send(DataFrame::new(stream_id, Bytes::copy_from_slice(data), end_stream).encode())
            .await;
    }

    /// Complete response: headers, then the body if there is one
    pub async fn respond(&mut self, stream_id: u32, status: u16, body: &[u8]) {
        let status = status.to_string();
        self.send_headers(stream_id, &[(":status", status.as_str())], body.is_empty())
            .await;
        if !body.is_empty() {
            self.send_data(stream_id, body, true).await;
        }
    }

    pub async fn send_reset(&mut self, stream_id: u32, code: h2wire::http::h2::ErrorCode) {
        self.send(RstStreamFrame::new(stream_id, code).encode()).await;
    }
}
