//! HTTP/2 client connection
//!
//! A [`Connection`] multiplexes requests over one byte stream. It owns:
//!
//! - one background read loop, the only reader of the stream, which
//!   dispatches every incoming frame
//! - one write lock around the frame writer and the HPACK encoder; every
//!   frame, from any task, is written while holding it
//! - the live [`StreamTable`] and the connection-level send window, both
//!   shared lock-free between request tasks and the read loop
//!
//! Errors come in two severities. Stream errors reset one stream with
//! RST_STREAM and the connection carries on. Connection errors send a
//! best-effort GOAWAY, fail every live stream with the same error and tear
//! the connection down.

use super::codec::{FrameReader, FrameWriter};
use super::config::ConnectionConfig;
use super::error::{Error, ErrorCode, Result};
use super::flow_control::{FlowControlWindow, SendWindow};
use super::frames::{
    ContinuationFrame, DataFrame, Frame, FrameType, GoawayFrame, HeadersFrame, PingFrame, PriorityFrame,
    PushPromiseFrame, RstStreamFrame, SettingsFrame, WindowUpdateFrame,
};
use super::header_block::{HeaderDecoder, HeaderEncoder};
use super::message::{H2Request, H2Response};
use super::settings::Settings;
use super::stream::{Completion, H2Stream, HeadersOutcome, StreamIdAllocator, StreamTable};
use super::{DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_FRAME_SIZE};
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{oneshot, Notify};
use tokio_util::sync::CancellationToken;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Global counter for connection IDs; only uniqueness matters.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection, used to correlate log events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Everything serialized by the write lock
struct Writer {
    frames: FrameWriter<BoxedWriter>,
    encoder: HeaderEncoder,
}

/// State shared by the connection handle, request tasks and the read loop
struct Shared {
    id: ConnectionId,
    config: ConnectionConfig,
    writer: tokio::sync::Mutex<Writer>,
    streams: StreamTable,
    stream_ids: StreamIdAllocator,
    /// Connection-level send window
    send_window: SendWindow,
    /// Woken whenever send windows grow or streams go away
    window_notify: Notify,
    remote_settings: Mutex<Settings>,
    remote_initial_window: AtomicU32,
    remote_max_concurrent: AtomicU32,
    settings_acked: AtomicBool,
    goaway: Mutex<Option<Error>>,
    closed: CancellationToken,
    close_reason: Mutex<Option<Error>>,
    disposed: AtomicBool,
    next_ping: AtomicU64,
    pings: DashMap<u64, oneshot::Sender<Instant>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Shared {
    fn close_error(&self) -> Error {
        locked(&self.close_reason).clone().unwrap_or(Error::ConnectionClosed)
    }

    /// Fail fast if no new stream may be opened
    fn check_usable(&self) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(self.close_error());
        }
        if let Some(err) = locked(&self.goaway).clone() {
            return Err(err);
        }
        Ok(())
    }

    /// Add a stream that is about to open
    ///
    /// Teardown and GOAWAY sweep the table after setting their flag, so the
    /// flags are checked again once the stream is in: either the sweep saw
    /// it or this check sees the flag.
    fn register(&self, stream: Arc<H2Stream>) -> Result<()> {
        let stream_id = stream.id();
        self.streams.insert(stream);
        if let Err(err) = self.check_usable() {
            self.streams.remove(stream_id);
            return Err(err);
        }
        Ok(())
    }

    /// Tear the connection down, failing every live stream with `err`
    ///
    /// Safe to call more than once; the first reason sticks.
    fn terminate(&self, err: Error) {
        {
            let mut reason = locked(&self.close_reason);
            if reason.is_none() {
                *reason = Some(err.clone());
            }
        }
        self.closed.cancel();
        self.window_notify.notify_waiters();

        let reason = self.close_error();
        let failed = self.streams.fail_all(&reason);
        self.pings.clear();
        if failed > 0 {
            tracing::debug!(conn = %self.id, failed, error = %reason, "failed live streams");
        }
    }

    async fn write_frame(&self, frame: &Frame) -> Result<()> {
        let mut writer = self.writer.lock().await;
        tracing::trace!(
            conn = %self.id,
            frame_type = frame.frame_type.name(),
            stream_id = frame.stream_id,
            len = frame.payload_len(),
            "frame sent"
        );
        writer.frames.write_frame(frame).await
    }

    /// Best-effort RST_STREAM from a context that cannot report failure
    async fn send_reset(&self, stream_id: u32, code: ErrorCode) {
        if self.closed.is_cancelled() {
            return;
        }
        let frame = RstStreamFrame::new(stream_id, code).encode();
        if let Err(err) = self.write_frame(&frame).await {
            tracing::debug!(conn = %self.id, stream_id, error = %err, "failed to send RST_STREAM");
        }
    }

    /// GOAWAY written under the lock, bounded by `close_timeout`
    async fn send_goaway(&self, writer: &mut Writer, code: ErrorCode, debug: &str) {
        let frame = GoawayFrame::new(0, code, Bytes::copy_from_slice(debug.as_bytes())).encode();
        let write = async {
            writer.frames.write_frame(&frame).await?;
            writer.frames.shutdown().await
        };
        match tokio::time::timeout(self.config.close_timeout, write).await {
            Ok(Ok(())) => tracing::debug!(conn = %self.id, code = %code, "GOAWAY sent"),
            Ok(Err(err)) => tracing::debug!(conn = %self.id, error = %err, "failed to send GOAWAY"),
            Err(_) => tracing::debug!(conn = %self.id, "timed out sending GOAWAY"),
        }
    }

    /// Handle a connection error raised by the read loop
    async fn connection_error(&self, err: Error) {
        if self.closed.is_cancelled() {
            return;
        }
        tracing::warn!(conn = %self.id, error = %err, "HTTP/2 connection error");

        // Nothing can be written once the byte stream itself has failed
        if !matches!(err, Error::Io(_) | Error::ConnectionClosed) {
            let acquire = tokio::time::timeout(self.config.close_timeout, self.writer.lock());
            if let Ok(mut writer) = acquire.await {
                self.send_goaway(&mut writer, err.code(), &err.to_string()).await;
            }
        }

        self.terminate(err);
    }
}

/// Removes an abandoned stream and resets it on the wire
///
/// Held by `send_request` from registration until it returns. If the stream
/// is still in the table when the guard drops, the request was cancelled or
/// failed locally, so the peer is told with RST_STREAM(CANCEL).
struct StreamGuard {
    shared: Arc<Shared>,
    stream_id: u32,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if self.shared.streams.remove(self.stream_id).is_none() {
            return;
        }
        self.shared.window_notify.notify_waiters();
        tracing::debug!(conn = %self.shared.id, stream_id = self.stream_id, "stream abandoned, resetting");

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let shared = Arc::clone(&self.shared);
            let stream_id = self.stream_id;
            handle.spawn(async move {
                shared.send_reset(stream_id, ErrorCode::Cancel).await;
            });
        }
    }
}

/// HTTP/2 client connection
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    /// Start HTTP/2 on an already negotiated byte stream
    ///
    /// Writes the connection preface, the local SETTINGS and, when the
    /// configured connection window is larger than the default, a
    /// connection-level WINDOW_UPDATE. Then spawns the read loop.
    pub async fn handshake<S>(io: S, config: ConnectionConfig) -> Result<Arc<Connection>>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        config.validate()?;
        let local_settings = config.local_settings()?;
        let id = ConnectionId::new();

        let (read_half, write_half) = tokio::io::split(io);
        let reader: BoxedReader = Box::new(read_half);
        let writer: BoxedWriter = Box::new(write_half);

        let mut frames = FrameWriter::new(writer);
        frames.write_preface().await?;
        frames.write_frame(&SettingsFrame::new(local_settings).encode()).await?;

        let initial_connection_window = config.connection_window_size.max(DEFAULT_INITIAL_WINDOW_SIZE);
        if config.connection_window_size > DEFAULT_INITIAL_WINDOW_SIZE {
            let increment = config.connection_window_size - DEFAULT_INITIAL_WINDOW_SIZE;
            frames.write_frame(&WindowUpdateFrame::new(0, increment).encode()).await?;
        }

        tracing::debug!(conn = %id, "HTTP/2 preface and SETTINGS sent");

        let shared = Arc::new(Shared {
            id,
            writer: tokio::sync::Mutex::new(Writer {
                frames,
                encoder: HeaderEncoder::new(),
            }),
            streams: StreamTable::new(),
            stream_ids: StreamIdAllocator::new(),
            send_window: SendWindow::new(DEFAULT_INITIAL_WINDOW_SIZE),
            window_notify: Notify::new(),
            remote_settings: Mutex::new(Settings::new()),
            remote_initial_window: AtomicU32::new(DEFAULT_INITIAL_WINDOW_SIZE),
            remote_max_concurrent: AtomicU32::new(u32::MAX),
            settings_acked: AtomicBool::new(false),
            goaway: Mutex::new(None),
            closed: CancellationToken::new(),
            close_reason: Mutex::new(None),
            disposed: AtomicBool::new(false),
            next_ping: AtomicU64::new(1),
            pings: DashMap::new(),
            config,
        });

        let read_loop = ReadLoop {
            recv_window: FlowControlWindow::with_sizes(
                shared.config.connection_window_size,
                initial_connection_window,
            ),
            max_block_size: (shared.config.max_header_list_size as usize).max(DEFAULT_MAX_FRAME_SIZE as usize) * 2,
            shared: Arc::clone(&shared),
            reader: FrameReader::new(reader),
            decoder: HeaderDecoder::new(),
            pending: None,
            max_refused_push: 0,
        };
        tokio::spawn(read_loop.run());

        Ok(Arc::new(Connection { shared }))
    }

    /// Get connection ID
    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    /// Whether new requests can be sent on this connection
    pub fn is_usable(&self) -> bool {
        !self.shared.disposed.load(Ordering::Acquire)
            && self.shared.check_usable().is_ok()
            && !self.shared.stream_ids.is_exhausted()
    }

    /// Whether the connection has been torn down
    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }

    /// Why the connection was torn down, if it was
    pub fn close_reason(&self) -> Option<Error> {
        locked(&self.shared.close_reason).clone()
    }

    /// Number of streams awaiting completion
    pub fn active_streams(&self) -> usize {
        self.shared.streams.len()
    }

    /// Settings the peer has advertised so far
    pub fn remote_settings(&self) -> Settings {
        locked(&self.shared.remote_settings).clone()
    }

    /// Whether the peer acknowledged our SETTINGS
    pub fn settings_acked(&self) -> bool {
        self.shared.settings_acked.load(Ordering::Acquire)
    }

    /// Whether the peer sent GOAWAY
    pub fn goaway_received(&self) -> bool {
        locked(&self.shared.goaway).is_some()
    }

    /// Send a request and wait for the complete response
    ///
    /// Cancelling `cancel` stops any wait for the write lock, for flow-control
    /// window or for the response. A stream that was already opened is then
    /// removed and reset with RST_STREAM(CANCEL). A cancellation that happens
    /// before a stream id is allocated is reported as `Cancelled(0)`.
    pub async fn send_request(&self, request: H2Request, cancel: &CancellationToken) -> Result<H2Response> {
        self.shared.check_usable()?;

        let header_list = request.header_list();
        let mut body = request.body().clone();
        let end_stream = body.is_empty();

        let (stream, completion, _guard) = self.open_stream(&header_list, end_stream, cancel).await?;
        let stream_id = stream.id();

        while !body.is_empty() {
            let Some(reserved) = self.reserve_window(&stream, body.len(), cancel).await? else {
                self.stop_sending(&stream).await;
                break;
            };

            let mut writer = match self.lock_writer(stream_id, cancel).await {
                Ok(writer) => writer,
                Err(err) => {
                    stream.send_window().release(reserved);
                    self.shared.send_window.release(reserved);
                    self.shared.window_notify.notify_waiters();
                    return Err(err);
                }
            };

            // The peer may have lowered its max frame size since the reservation
            let len = reserved.min(writer.frames.max_frame_size() as usize);
            if len < reserved {
                stream.send_window().release(reserved - len);
                self.shared.send_window.release(reserved - len);
            }

            let chunk = body.split_to(len);
            let last = body.is_empty();
            if last {
                stream.body_sent();
            }
            let frame = DataFrame::new(stream_id, chunk, last).encode();
            tracing::trace!(conn = %self.shared.id, stream_id, len, end_stream = last, "DATA sent");
            if let Err(err) = writer.frames.write_frame(&frame).await {
                drop(writer);
                self.shared.terminate(err.clone());
                return Err(err);
            }
        }

        tokio::select! {
            biased;
            result = completion => result.unwrap_or_else(|_| Err(self.shared.close_error())),
            _ = cancel.cancelled() => {
                tracing::debug!(conn = %self.shared.id, stream_id, "request cancelled");
                Err(Error::Cancelled(stream_id))
            }
        }
    }

    async fn lock_writer(
        &self,
        stream_id: u32,
        cancel: &CancellationToken,
    ) -> Result<tokio::sync::MutexGuard<'_, Writer>> {
        let writer = tokio::select! {
            biased;
            _ = self.shared.closed.cancelled() => return Err(self.shared.close_error()),
            _ = cancel.cancelled() => return Err(Error::Cancelled(stream_id)),
            writer = self.shared.writer.lock() => writer,
        };
        if self.shared.closed.is_cancelled() {
            return Err(self.shared.close_error());
        }
        Ok(writer)
    }

    /// Allocate an id, register the stream and write its header block
    ///
    /// All of it happens under the write lock, so stream ids hit the wire
    /// in increasing order and the HPACK encoder has a single user.
    async fn open_stream(
        &self,
        header_list: &[(String, String)],
        end_stream: bool,
        cancel: &CancellationToken,
    ) -> Result<(Arc<H2Stream>, Completion, StreamGuard)> {
        let mut writer = self.lock_writer(0, cancel).await?;
        self.shared.check_usable()?;

        let limit = self.shared.remote_max_concurrent.load(Ordering::Acquire);
        if self.shared.streams.len() >= limit as usize {
            return Err(Error::TooManyStreams(limit));
        }

        let stream_id = self.shared.stream_ids.allocate()?;
        let (stream, completion) = H2Stream::new(
            stream_id,
            self.shared.remote_initial_window.load(Ordering::Acquire),
            self.shared.config.initial_window_size,
        );
        stream.headers_sent(end_stream);
        self.shared.register(Arc::clone(&stream))?;
        let guard = StreamGuard {
            shared: Arc::clone(&self.shared),
            stream_id,
        };

        let mut block = BytesMut::new();
        let encoded = writer
            .encoder
            .encode(header_list.iter().map(|(n, v)| (n.as_str(), v.as_str())), &mut block);
        if let Err(err) = encoded {
            // Encoder state no longer matches the peer's decoder
            drop(writer);
            self.shared.terminate(err.clone());
            return Err(err);
        }

        tracing::debug!(
            conn = %self.shared.id,
            stream_id,
            block_len = block.len(),
            end_stream,
            "opening stream"
        );

        if let Err(err) = write_header_block(&mut writer.frames, stream_id, block.freeze(), end_stream).await {
            drop(writer);
            self.shared.terminate(err.clone());
            return Err(err);
        }

        Ok((stream, completion, guard))
    }

    /// Wait until both send windows allow sending part of the body
    ///
    /// Returns `None` once the stream has left the table, which means the
    /// response already completed or the stream was reset.
    async fn reserve_window(
        &self,
        stream: &H2Stream,
        want: usize,
        cancel: &CancellationToken,
    ) -> Result<Option<usize>> {
        let stream_id = stream.id();
        let shared = &self.shared;

        loop {
            // Register for wakeups before looking at the windows
            let notified = shared.window_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if shared.closed.is_cancelled() {
                return Err(shared.close_error());
            }
            if shared.streams.get(stream_id).is_none() {
                return Ok(None);
            }

            let stream_share = stream.send_window().reserve(want);
            if stream_share > 0 {
                let granted = shared.send_window.reserve(stream_share);
                if granted > 0 {
                    if granted < stream_share {
                        stream.send_window().release(stream_share - granted);
                    }
                    return Ok(Some(granted));
                }
                stream.send_window().release(stream_share);
            }

            tracing::trace!(
                conn = %shared.id,
                stream_id,
                stream_window = stream.send_window().available(),
                connection_window = shared.send_window.available(),
                "waiting for flow-control window"
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled(stream_id)),
                _ = shared.closed.cancelled() => {}
                _ = &mut notified => {}
            }
        }
    }

    /// The stream left the table while its body was still being sent
    async fn stop_sending(&self, stream: &H2Stream) {
        // A complete response means the peer does not need the rest
        if stream.is_remote_closed() {
            tracing::debug!(
                conn = %self.shared.id,
                stream_id = stream.id(),
                "response completed before request body, resetting with NO_ERROR"
            );
            self.shared.send_reset(stream.id(), ErrorCode::NoError).await;
        }
    }

    /// Send a PING and wait for its ACK, returning the round-trip time
    pub async fn ping(&self) -> Result<Duration> {
        self.shared.check_usable()?;

        let token = self.shared.next_ping.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared.pings.insert(token, tx);

        let started = Instant::now();
        if let Err(err) = self.shared.write_frame(&PingFrame::new(token.to_be_bytes()).encode()).await {
            self.shared.pings.remove(&token);
            return Err(err);
        }

        tokio::select! {
            acked = rx => match acked {
                Ok(at) => Ok(at.duration_since(started)),
                Err(_) => Err(self.shared.close_error()),
            },
            _ = self.shared.closed.cancelled() => {
                self.shared.pings.remove(&token);
                Err(self.shared.close_error())
            }
        }
    }

    /// Close the connection
    ///
    /// Sends GOAWAY(NO_ERROR) if the write lock is free right now, then
    /// fails every live stream with [`Error::Disposed`]. Calling it again
    /// does nothing.
    pub async fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(conn = %self.shared.id, "disposing HTTP/2 connection");

        if !self.shared.closed.is_cancelled() {
            match self.shared.writer.try_lock() {
                Ok(mut writer) => {
                    self.shared.send_goaway(&mut writer, ErrorCode::NoError, "").await;
                }
                Err(_) => {
                    tracing::debug!(conn = %self.shared.id, "writer busy, skipping GOAWAY");
                }
            }
        }

        self.shared.terminate(Error::Disposed);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("active_streams", &self.shared.streams.len())
            .field("closed", &self.shared.closed.is_cancelled())
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.disposed.store(true, Ordering::Release);
        self.shared.terminate(Error::Disposed);
    }
}

/// Write HEADERS plus as many CONTINUATION frames as the peer's max frame
/// size requires
async fn write_header_block(
    frames: &mut FrameWriter<BoxedWriter>,
    stream_id: u32,
    mut block: Bytes,
    end_stream: bool,
) -> Result<()> {
    let max = frames.max_frame_size() as usize;

    let first = block.split_to(block.len().min(max));
    let headers = HeadersFrame::new(stream_id, first, end_stream, block.is_empty());
    frames.write_frame(&headers.encode()).await?;

    while !block.is_empty() {
        let fragment = block.split_to(block.len().min(max));
        let continuation = ContinuationFrame {
            stream_id,
            header_block: fragment,
            end_headers: block.is_empty(),
        };
        frames.write_frame(&continuation.encode()).await?;
    }
    Ok(())
}

/// Whose header block is being accumulated
#[derive(Debug, Clone, Copy)]
enum BlockKind {
    Response,
    Push { promised_stream_id: u32 },
}

/// A header block spread over HEADERS/PUSH_PROMISE and CONTINUATION frames
struct PendingBlock {
    stream_id: u32,
    kind: BlockKind,
    /// END_STREAM from the opening HEADERS, acted on once the block is decoded
    end_stream: bool,
    self_dependent: bool,
    fragments: BytesMut,
}

/// The connection's only reader
struct ReadLoop {
    shared: Arc<Shared>,
    reader: FrameReader<BoxedReader>,
    decoder: HeaderDecoder,
    /// Connection-level receive window
    recv_window: FlowControlWindow,
    pending: Option<PendingBlock>,
    max_block_size: usize,
    /// Highest promised stream id refused with RST_STREAM
    max_refused_push: u32,
}

impl ReadLoop {
    async fn run(mut self) {
        let shared = Arc::clone(&self.shared);
        tracing::debug!(conn = %shared.id, "read loop started");

        let result = loop {
            let frame = tokio::select! {
                biased;
                _ = shared.closed.cancelled() => break Ok(()),
                frame = self.reader.read_frame(shared.config.max_frame_size) => frame,
            };

            let dispatched = match frame {
                Ok(frame) => self.dispatch(frame).await,
                Err(err) => Err(err),
            };
            if let Err(err) = dispatched {
                break Err(err);
            }
        };

        match result {
            Ok(()) => tracing::debug!(conn = %shared.id, "read loop stopped"),
            Err(err) => shared.connection_error(err).await,
        }
    }

    async fn dispatch(&mut self, frame: Frame) -> Result<()> {
        tracing::trace!(
            conn = %self.shared.id,
            frame_type = frame.frame_type.name(),
            stream_id = frame.stream_id,
            flags = frame.flags.as_u8(),
            len = frame.payload_len(),
            "frame received"
        );

        if let Some(pending) = &self.pending {
            if frame.frame_type != FrameType::Continuation || frame.stream_id != pending.stream_id {
                return Err(Error::Protocol(format!(
                    "expected CONTINUATION for stream {}, got {} on stream {}",
                    pending.stream_id,
                    frame.frame_type.name(),
                    frame.stream_id
                )));
            }
        }

        match frame.frame_type {
            FrameType::Data => self.on_data(frame).await,
            FrameType::Headers => self.on_headers(frame).await,
            FrameType::Continuation => self.on_continuation(frame).await,
            FrameType::Priority => self.on_priority(frame).await,
            FrameType::RstStream => self.on_rst_stream(frame),
            FrameType::Settings => self.on_settings(frame).await,
            FrameType::PushPromise => self.on_push_promise(frame).await,
            FrameType::Ping => self.on_ping(frame).await,
            FrameType::Goaway => self.on_goaway(frame),
            FrameType::WindowUpdate => self.on_window_update(frame).await,
            FrameType::Unknown(_) => Ok(()),
        }
    }

    fn require_stream(frame: &Frame) -> Result<()> {
        if frame.stream_id == 0 {
            return Err(Error::Protocol(format!("{} on stream 0", frame.frame_type.name())));
        }
        Ok(())
    }

    /// Frames on streams that were never opened are connection errors
    fn check_not_idle(&self, frame: &Frame) -> Result<()> {
        let id = frame.stream_id;
        let refused_push = id % 2 == 0 && id <= self.max_refused_push;
        if !refused_push && (id % 2 == 0 || self.shared.stream_ids.is_idle(id)) {
            return Err(Error::Protocol(format!(
                "{} on idle stream {}",
                frame.frame_type.name(),
                id
            )));
        }
        Ok(())
    }

    /// Stream error: fail the stream and tell the peer
    async fn reset_stream(&mut self, stream_id: u32, err: Error) -> Result<()> {
        let code = err.code();
        tracing::debug!(conn = %self.shared.id, stream_id, error = %err, code = %code, "resetting stream");
        self.shared.streams.finish(stream_id, Err(err));
        self.shared.window_notify.notify_waiters();
        self.shared
            .write_frame(&RstStreamFrame::new(stream_id, code).encode())
            .await
    }

    fn complete_stream(&self, stream: &H2Stream) {
        let result = stream.take_response();
        if self.shared.streams.finish(stream.id(), result) {
            tracing::debug!(conn = %self.shared.id, stream_id = stream.id(), "stream completed");
        }
        self.shared.window_notify.notify_waiters();
    }

    async fn on_data(&mut self, frame: Frame) -> Result<()> {
        Self::require_stream(&frame)?;
        let data = DataFrame::decode(&frame)?;
        let stream_id = frame.stream_id;

        // Padding included; the connection window is debited even for
        // streams we no longer track
        let flow_len = frame.payload_len();
        self.recv_window.receive(flow_len)?;
        if let Some(increment) = self.recv_window.take_window_update() {
            tracing::debug!(conn = %self.shared.id, increment, "connection WINDOW_UPDATE");
            self.shared
                .write_frame(&WindowUpdateFrame::new(0, increment).encode())
                .await?;
        }

        let Some(stream) = self.shared.streams.get(stream_id) else {
            self.check_not_idle(&frame)?;
            if stream_id % 2 == 0 {
                return Ok(());
            }
            return self
                .shared
                .write_frame(&RstStreamFrame::new(stream_id, ErrorCode::StreamClosed).encode())
                .await;
        };

        let max_body = self.shared.config.max_response_body_size;
        match stream.recv_data(flow_len, &data.data, data.end_stream, max_body) {
            Ok(update) => {
                if let Some(increment) = update {
                    self.shared
                        .write_frame(&WindowUpdateFrame::new(stream_id, increment).encode())
                        .await?;
                }
                if data.end_stream {
                    self.complete_stream(&stream);
                }
                Ok(())
            }
            Err(err) => self.reset_stream(stream_id, err).await,
        }
    }

    async fn on_headers(&mut self, frame: Frame) -> Result<()> {
        Self::require_stream(&frame)?;
        let headers = HeadersFrame::decode(&frame)?;
        self.check_not_idle(&frame)?;

        let block = PendingBlock {
            stream_id: frame.stream_id,
            kind: BlockKind::Response,
            end_stream: headers.end_stream,
            self_dependent: headers
                .priority
                .is_some_and(|p| p.stream_dependency == frame.stream_id),
            fragments: BytesMut::from(&headers.header_block[..]),
        };
        self.continue_block(block, headers.end_headers).await
    }

    async fn on_push_promise(&mut self, frame: Frame) -> Result<()> {
        Self::require_stream(&frame)?;
        if !self.shared.config.enable_push {
            return Err(Error::Protocol("PUSH_PROMISE received with push disabled".to_string()));
        }
        let promise = PushPromiseFrame::decode(&frame)?;
        if promise.promised_stream_id == 0 || promise.promised_stream_id % 2 != 0 {
            return Err(Error::Protocol(format!(
                "invalid promised stream id {}",
                promise.promised_stream_id
            )));
        }

        let block = PendingBlock {
            stream_id: frame.stream_id,
            kind: BlockKind::Push {
                promised_stream_id: promise.promised_stream_id,
            },
            end_stream: false,
            self_dependent: false,
            fragments: BytesMut::from(&promise.header_block[..]),
        };
        self.continue_block(block, promise.end_headers).await
    }

    async fn on_continuation(&mut self, frame: Frame) -> Result<()> {
        let Some(mut block) = self.pending.take() else {
            return Err(Error::Protocol(format!(
                "CONTINUATION on stream {} without an open header block",
                frame.stream_id
            )));
        };
        let continuation = ContinuationFrame::decode(&frame)?;
        block.fragments.extend_from_slice(&continuation.header_block);
        self.continue_block(block, continuation.end_headers).await
    }

    async fn continue_block(&mut self, block: PendingBlock, end_headers: bool) -> Result<()> {
        if block.fragments.len() > self.max_block_size {
            return Err(Error::Protocol(format!(
                "header block of {} bytes on stream {} exceeds {}",
                block.fragments.len(),
                block.stream_id,
                self.max_block_size
            )));
        }
        if end_headers {
            self.finish_block(block).await
        } else {
            self.pending = Some(block);
            Ok(())
        }
    }

    async fn finish_block(&mut self, block: PendingBlock) -> Result<()> {
        // Decoded even when nobody wants it, to keep HPACK state in sync
        let fields = self.decoder.decode(&block.fragments)?;
        let stream_id = block.stream_id;

        if let BlockKind::Push { promised_stream_id } = block.kind {
            tracing::debug!(conn = %self.shared.id, stream_id, promised_stream_id, "refusing pushed stream");
            self.max_refused_push = self.max_refused_push.max(promised_stream_id);
            return self
                .shared
                .write_frame(&RstStreamFrame::new(promised_stream_id, ErrorCode::RefusedStream).encode())
                .await;
        }

        let Some(stream) = self.shared.streams.get(stream_id) else {
            tracing::trace!(conn = %self.shared.id, stream_id, "header block for closed stream");
            return self
                .shared
                .write_frame(&RstStreamFrame::new(stream_id, ErrorCode::StreamClosed).encode())
                .await;
        };

        if block.self_dependent {
            return self
                .reset_stream(stream_id, Error::Protocol(format!("stream {} depends on itself", stream_id)))
                .await;
        }

        let config = &self.shared.config;
        match stream.recv_headers(
            fields,
            block.end_stream,
            config.max_header_list_size as usize,
            config.max_response_body_size,
        ) {
            Ok(HeadersOutcome::Informational) => {
                tracing::trace!(conn = %self.shared.id, stream_id, "skipped informational response");
                Ok(())
            }
            Ok(HeadersOutcome::Response) => {
                if block.end_stream {
                    self.complete_stream(&stream);
                }
                Ok(())
            }
            Ok(HeadersOutcome::Trailers) => {
                self.complete_stream(&stream);
                Ok(())
            }
            Err(err) => self.reset_stream(stream_id, err).await,
        }
    }

    async fn on_priority(&mut self, frame: Frame) -> Result<()> {
        Self::require_stream(&frame)?;
        match PriorityFrame::decode(&frame) {
            Ok(priority) if priority.is_self_dependent() => {
                self.reset_stream(
                    frame.stream_id,
                    Error::Protocol(format!("stream {} depends on itself", frame.stream_id)),
                )
                .await
            }
            Ok(_) => Ok(()),
            Err(err) => self.reset_stream(frame.stream_id, err).await,
        }
    }

    fn on_rst_stream(&mut self, frame: Frame) -> Result<()> {
        Self::require_stream(&frame)?;
        let rst = RstStreamFrame::decode(&frame)?;
        self.check_not_idle(&frame)?;

        let stream_id = rst.stream_id;
        let err = if rst.error_code == ErrorCode::Cancel {
            Error::Cancelled(stream_id)
        } else {
            Error::StreamReset {
                stream_id,
                code: rst.error_code,
            }
        };
        tracing::debug!(conn = %self.shared.id, stream_id, code = %rst.error_code, "stream reset by peer");

        self.shared.streams.finish(stream_id, Err(err));
        self.shared.window_notify.notify_waiters();
        Ok(())
    }

    async fn on_settings(&mut self, frame: Frame) -> Result<()> {
        let settings = SettingsFrame::decode(&frame)?;
        if settings.ack {
            tracing::debug!(conn = %self.shared.id, "SETTINGS acknowledged by peer");
            self.shared.settings_acked.store(true, Ordering::Release);
            return Ok(());
        }

        let remote = settings.settings;
        let shared = Arc::clone(&self.shared);

        // Applied under the write lock so no stream opens with a stale
        // initial window and the encoder change precedes the next block
        let mut writer = shared.writer.lock().await;

        if let Some(size) = remote.initial_window_size {
            let previous = shared.remote_initial_window.swap(size, Ordering::AcqRel);
            let delta = size as i64 - previous as i64;
            if delta != 0 {
                shared.streams.adjust_send_windows(delta)?;
            }
        }
        if let Some(size) = remote.max_frame_size {
            writer.frames.set_max_frame_size(size);
        }
        if let Some(max) = remote.max_concurrent_streams {
            shared.remote_max_concurrent.store(max, Ordering::Release);
        }
        // Every value counts: the smallest one has to be signalled too
        for size in Settings::header_table_sizes(&frame.payload) {
            writer.encoder.set_max_table_size(size);
        }

        tracing::debug!(conn = %shared.id, settings = ?remote, "applied peer SETTINGS");
        locked(&shared.remote_settings).merge(&remote);

        writer.frames.write_frame(&SettingsFrame::ack().encode()).await?;
        drop(writer);

        shared.window_notify.notify_waiters();
        Ok(())
    }

    async fn on_ping(&mut self, frame: Frame) -> Result<()> {
        let ping = PingFrame::decode(&frame)?;
        if ping.ack {
            let token = u64::from_be_bytes(ping.data);
            if let Some((_, tx)) = self.shared.pings.remove(&token) {
                let _ = tx.send(Instant::now());
            }
            return Ok(());
        }
        self.shared.write_frame(&PingFrame::ack(ping.data).encode()).await
    }

    fn on_goaway(&mut self, frame: Frame) -> Result<()> {
        let goaway = GoawayFrame::decode(&frame)?;
        let err = Error::GoAway {
            last_stream_id: goaway.last_stream_id,
            code: goaway.error_code,
            debug: String::from_utf8_lossy(&goaway.debug_data).into_owned(),
        };
        tracing::warn!(
            conn = %self.shared.id,
            last_stream_id = goaway.last_stream_id,
            code = %goaway.error_code,
            "GOAWAY received"
        );

        *locked(&self.shared.goaway) = Some(err.clone());
        let failed = self.shared.streams.fail_above(goaway.last_stream_id, &err);
        if failed > 0 {
            tracing::debug!(conn = %self.shared.id, failed, "failed streams above GOAWAY last stream id");
        }
        self.shared.window_notify.notify_waiters();
        Ok(())
    }

    async fn on_window_update(&mut self, frame: Frame) -> Result<()> {
        let update = WindowUpdateFrame::decode(&frame)?;
        let stream_id = update.stream_id;

        if stream_id == 0 {
            if update.size_increment == 0 {
                return Err(Error::Protocol("zero WINDOW_UPDATE increment on connection".to_string()));
            }
            let window = self.shared.send_window.increase(update.size_increment)?;
            tracing::trace!(conn = %self.shared.id, increment = update.size_increment, window, "connection window grew");
        } else {
            self.check_not_idle(&frame)?;
            let Some(stream) = self.shared.streams.get(stream_id) else {
                return Ok(());
            };
            if update.size_increment == 0 {
                return self
                    .reset_stream(stream_id, Error::Protocol(format!("zero WINDOW_UPDATE increment on stream {}", stream_id)))
                    .await;
            }
            if let Err(err) = stream.send_window().increase(update.size_increment) {
                return self.reset_stream(stream_id, err).await;
            }
        }

        self.shared.window_notify.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_display() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
        assert_eq!(a.to_string(), format!("conn-{}", a.as_u64()));
    }

    #[tokio::test]
    async fn test_header_block_split_into_continuations() {
        let (client, server) = tokio::io::duplex(1 << 16);
        let (_r, w) = tokio::io::split(client);
        let mut frames = FrameWriter::new(Box::new(w) as BoxedWriter);

        let block = Bytes::from(vec![0xAB; 16384 * 2 + 10]);
        write_header_block(&mut frames, 1, block, true).await.unwrap();
        drop(frames);

        let (r, _w) = tokio::io::split(server);
        let mut reader = FrameReader::new(r);

        let first = reader.read_frame(16384).await.unwrap();
        assert_eq!(first.frame_type, FrameType::Headers);
        assert!(first.flags.is_end_stream());
        assert!(!first.flags.is_end_headers());
        assert_eq!(first.payload_len(), 16384);

        let second = reader.read_frame(16384).await.unwrap();
        assert_eq!(second.frame_type, FrameType::Continuation);
        assert!(!second.flags.is_end_headers());

        let third = reader.read_frame(16384).await.unwrap();
        assert_eq!(third.frame_type, FrameType::Continuation);
        assert!(third.flags.is_end_headers());
        assert_eq!(third.payload_len(), 10);
    }

    #[tokio::test]
    async fn test_stream_registered_after_goaway_is_rejected() {
        let (client, _server) = tokio::io::duplex(1 << 16);
        let conn = Connection::handshake(client, ConnectionConfig::default()).await.unwrap();

        // GOAWAY lands between the usability check and the insert
        *locked(&conn.shared.goaway) = Some(Error::GoAway {
            last_stream_id: 0,
            code: ErrorCode::NoError,
            debug: String::new(),
        });
        let (stream, _completion) = H2Stream::new(1, 65535, 65535);
        let err = conn.shared.register(stream).unwrap_err();

        assert!(matches!(err, Error::GoAway { last_stream_id: 0, .. }));
        assert_eq!(conn.shared.streams.len(), 0);

        conn.shared.terminate(Error::Disposed);
        let (stream, _completion) = H2Stream::new(3, 65535, 65535);
        assert!(conn.shared.register(stream).is_err());
        assert_eq!(conn.shared.streams.len(), 0);
    }
}
