//! HTTP/2 stream management
//!
//! This module implements stream management as defined in RFC 7540 Section 5.1.
//!
//! A [`H2Stream`] is shared between the task that sent the request (which
//! debits its send window and waits for completion) and the connection's
//! read loop (which fills in the response). The [`StreamTable`] is the
//! single source of truth for which streams are live: whoever removes a
//! stream from it is the one that completes it.

use super::error::{Error, Result};
use super::flow_control::{FlowControlWindow, SendWindow};
use super::header_block::{self, ResponseHead};
use super::message::H2Response;
use super::MAX_STREAM_ID;
use crate::http::headers::Headers;
use bytes::BytesMut;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;

/// Stream ID type
pub type StreamId = u32;

/// Receiver side of a stream's completion
pub type Completion = oneshot::Receiver<Result<H2Response>>;

/// Stream state as defined in RFC 7540 Section 5.1
///
/// Client streams never pass through the reserved states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Idle: No frames have been sent/received
    Idle,
    /// Open: Both sides can send frames
    Open,
    /// Half-closed (local): We can't send, they can
    HalfClosedLocal,
    /// Half-closed (remote): They can't send, we can
    HalfClosedRemote,
    /// Closed: Stream is closed
    Closed,
}

impl StreamState {
    /// Check if stream can send data
    pub fn can_send(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedRemote)
    }

    /// Check if stream can receive data
    pub fn can_receive(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedLocal)
    }

    /// Check if stream is closed
    pub fn is_closed(&self) -> bool {
        matches!(self, StreamState::Closed)
    }

    fn close_local(self) -> Self {
        match self {
            StreamState::Idle | StreamState::Open => StreamState::HalfClosedLocal,
            _ => StreamState::Closed,
        }
    }

    fn close_remote(self) -> Self {
        match self {
            StreamState::Idle | StreamState::Open => StreamState::HalfClosedRemote,
            _ => StreamState::Closed,
        }
    }
}

/// What a header block did to the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadersOutcome {
    /// Interim (1xx) response consumed
    Informational,
    /// Final response headers attached
    Response,
    /// Trailers attached; the response is complete
    Trailers,
}

/// Receive-side state, only mutated by the read loop
#[derive(Debug)]
struct RecvState {
    window: FlowControlWindow,
    state: StreamState,
    head: Option<ResponseHead>,
    trailers: Option<Headers>,
    body: BytesMut,
}

/// HTTP/2 stream
#[derive(Debug)]
pub struct H2Stream {
    /// Stream ID
    id: StreamId,
    /// Outbound flow control, shared with the connection's SETTINGS handling
    send_window: SendWindow,
    /// Inbound state
    recv: Mutex<RecvState>,
    /// Taken exactly once, by whoever completes the stream
    completion: Mutex<Option<oneshot::Sender<Result<H2Response>>>>,
}

impl H2Stream {
    /// Create a new stream with specified window sizes
    pub fn new(id: StreamId, send_window: u32, recv_window: u32) -> (Arc<Self>, Completion) {
        let (tx, rx) = oneshot::channel();
        let stream = H2Stream {
            id,
            send_window: SendWindow::new(send_window),
            recv: Mutex::new(RecvState {
                window: FlowControlWindow::with_initial_size(recv_window),
                state: StreamState::Idle,
                head: None,
                trailers: None,
                body: BytesMut::new(),
            }),
            completion: Mutex::new(Some(tx)),
        };
        (Arc::new(stream), rx)
    }

    /// Get stream ID
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Get send window
    pub fn send_window(&self) -> &SendWindow {
        &self.send_window
    }

    fn recv(&self) -> MutexGuard<'_, RecvState> {
        self.recv.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Get stream state
    pub fn state(&self) -> StreamState {
        self.recv().state
    }

    /// Current receive window
    pub fn recv_window(&self) -> i64 {
        self.recv().window.size()
    }

    /// HEADERS for the request were written
    pub fn headers_sent(&self, end_stream: bool) {
        let mut recv = self.recv();
        if recv.state == StreamState::Idle {
            recv.state = StreamState::Open;
        }
        if end_stream {
            recv.state = recv.state.close_local();
        }
    }

    /// The last request DATA frame (END_STREAM) was written
    pub fn body_sent(&self) {
        let mut recv = self.recv();
        recv.state = recv.state.close_local();
    }

    /// Whether the peer has finished sending
    pub fn is_remote_closed(&self) -> bool {
        matches!(self.state(), StreamState::HalfClosedRemote | StreamState::Closed)
    }

    /// Account for and buffer a DATA frame
    ///
    /// `flow_len` is the full frame payload length (padding included) and
    /// is debited from the stream window; only `data` is buffered. Returns
    /// the stream WINDOW_UPDATE increment to send, if any.
    pub fn recv_data(&self, flow_len: usize, data: &[u8], end_stream: bool, max_body: usize) -> Result<Option<u32>> {
        let mut recv = self.recv();

        if recv.head.is_none() {
            return Err(Error::Protocol(format!("DATA before HEADERS on stream {}", self.id)));
        }
        if !recv.state.can_receive() {
            return Err(Error::Protocol(format!("DATA on closed stream {}", self.id)));
        }

        recv.window.receive(flow_len)?;

        if recv.body.len() + data.len() > max_body {
            return Err(Error::BodyTooLarge { limit: max_body });
        }
        recv.body.extend_from_slice(data);

        if end_stream {
            recv.state = recv.state.close_remote();
            return Ok(None);
        }
        Ok(recv.window.take_window_update())
    }

    /// Attach a decoded header block
    ///
    /// The first final block becomes the response head; interim 1xx blocks
    /// are skipped; a later block is trailers and must end the stream.
    pub fn recv_headers(
        &self,
        fields: Vec<(String, String)>,
        end_stream: bool,
        max_list_size: usize,
        max_body: usize,
    ) -> Result<HeadersOutcome> {
        let mut recv = self.recv();

        if !recv.state.can_receive() {
            return Err(Error::Protocol(format!("HEADERS on closed stream {}", self.id)));
        }

        if recv.head.is_some() {
            if !end_stream {
                return Err(Error::Protocol(format!(
                    "trailers without END_STREAM on stream {}",
                    self.id
                )));
            }
            recv.trailers = Some(header_block::validate_trailers(fields, max_list_size)?);
            recv.state = recv.state.close_remote();
            return Ok(HeadersOutcome::Trailers);
        }

        let head = header_block::validate_response(fields, max_list_size)?;
        if head.is_informational() {
            if end_stream {
                return Err(Error::Protocol(format!(
                    "{} response with END_STREAM on stream {}",
                    head.status, self.id
                )));
            }
            return Ok(HeadersOutcome::Informational);
        }

        // Allocation hint only; the body is still bounded by max_body
        if let Some(len) = head.content_length().filter(|len| *len > 0) {
            let hint = (len as usize).min(max_body);
            recv.body.reserve(hint);
        }

        recv.head = Some(head);
        if end_stream {
            recv.state = recv.state.close_remote();
        }
        Ok(HeadersOutcome::Response)
    }

    /// Assemble the response once the peer has finished sending
    pub fn take_response(&self) -> Result<H2Response> {
        let mut recv = self.recv();
        let head = recv
            .head
            .take()
            .ok_or_else(|| Error::Internal(format!("stream {} completed without headers", self.id)))?;
        let trailers = recv.trailers.take();
        let body = std::mem::take(&mut recv.body).freeze();
        recv.state = StreamState::Closed;
        Ok(H2Response::new(self.id, head.status, head.headers, trailers, body))
    }

    /// Deliver the terminal result to the waiting caller
    ///
    /// Returns false if the stream was already completed.
    fn complete(&self, result: Result<H2Response>) -> bool {
        let sender = self
            .completion
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match sender {
            // The caller may have stopped waiting; nothing to do then
            Some(tx) => {
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }
}

/// Live streams of a connection
#[derive(Debug, Default)]
pub struct StreamTable {
    streams: DashMap<StreamId, Arc<H2Stream>>,
}

impl StreamTable {
    /// Create an empty table
    pub fn new() -> Self {
        StreamTable {
            streams: DashMap::new(),
        }
    }

    /// Register a stream
    pub fn insert(&self, stream: Arc<H2Stream>) {
        self.streams.insert(stream.id(), stream);
    }

    /// Look up a live stream
    pub fn get(&self, id: StreamId) -> Option<Arc<H2Stream>> {
        self.streams.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove a stream without completing it
    ///
    /// A caller abandoning its request uses this: winning the removal means
    /// nobody else will complete the stream.
    pub fn remove(&self, id: StreamId) -> Option<Arc<H2Stream>> {
        self.streams.remove(&id).map(|(_, stream)| stream)
    }

    /// Remove a stream and deliver its terminal result
    ///
    /// Only the caller that wins the removal completes the stream.
    pub fn finish(&self, id: StreamId, result: Result<H2Response>) -> bool {
        match self.remove(id) {
            Some(stream) => stream.complete(result),
            None => false,
        }
    }

    /// Fail every live stream; returns how many were failed
    pub fn fail_all(&self, err: &Error) -> usize {
        let ids: Vec<StreamId> = self.streams.iter().map(|entry| *entry.key()).collect();
        ids.into_iter()
            .filter(|id| self.finish(*id, Err(err.clone())))
            .count()
    }

    /// Fail every live stream with an id above `last_id`
    pub fn fail_above(&self, last_id: StreamId, err: &Error) -> usize {
        let ids: Vec<StreamId> = self
            .streams
            .iter()
            .map(|entry| *entry.key())
            .filter(|id| *id > last_id)
            .collect();
        ids.into_iter()
            .filter(|id| self.finish(*id, Err(err.clone())))
            .count()
    }

    /// Apply a SETTINGS_INITIAL_WINDOW_SIZE delta to every live stream
    pub fn adjust_send_windows(&self, delta: i64) -> Result<()> {
        for entry in self.streams.iter() {
            entry.value().send_window().adjust(delta)?;
        }
        Ok(())
    }

    /// Number of live streams
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Check if no streams are live
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

/// Allocates client stream ids: odd, increasing by two
#[derive(Debug)]
pub struct StreamIdAllocator {
    next: AtomicU32,
}

impl StreamIdAllocator {
    /// Start at stream 1
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Start at an arbitrary odd id
    pub fn starting_at(first: StreamId) -> Self {
        StreamIdAllocator {
            next: AtomicU32::new(first),
        }
    }

    /// Allocate the next id
    ///
    /// Fails once the 31-bit id space is used up instead of wrapping.
    pub fn allocate(&self) -> Result<StreamId> {
        self.next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |next| {
                (next <= MAX_STREAM_ID).then_some(next + 2)
            })
            .map_err(|_| Error::StreamIdsExhausted)
    }

    /// Whether `id` is an odd id this allocator has not handed out yet
    pub fn is_idle(&self, id: StreamId) -> bool {
        id >= self.next.load(Ordering::Acquire)
    }

    /// Whether no further ids can be allocated
    pub fn is_exhausted(&self) -> bool {
        self.next.load(Ordering::Acquire) > MAX_STREAM_ID
    }
}

impl Default for StreamIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
