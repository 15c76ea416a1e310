//! HTTP/2 frame encoding and decoding
//!
//! This module moves whole frames between the byte stream and [`Frame`]
//! values. It knows the 9-byte header layout and nothing else: payload
//! layouts live in [`super::frames`], protocol semantics in the connection.
//!
//! Neither [`FrameReader`] nor [`FrameWriter`] is meant for concurrent use;
//! the connection owns exactly one of each.

use super::error::{Error, Result};
use super::frames::{Frame, FrameFlags, FrameType};
use super::{CONNECTION_PREFACE, DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_SIZE, MAX_MAX_FRAME_SIZE, MAX_STREAM_ID};
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frame header encoding and decoding
pub struct FrameCodec;

impl FrameCodec {
    /// Encode a frame header into a buffer
    pub fn encode_header(
        frame_type: FrameType,
        flags: FrameFlags,
        stream_id: u32,
        length: usize,
    ) -> [u8; FRAME_HEADER_SIZE] {
        let mut header = [0u8; FRAME_HEADER_SIZE];

        // Length (24 bits, big-endian)
        header[0] = ((length >> 16) & 0xFF) as u8;
        header[1] = ((length >> 8) & 0xFF) as u8;
        header[2] = (length & 0xFF) as u8;

        // Type (8 bits)
        header[3] = frame_type.as_u8();

        // Flags (8 bits)
        header[4] = flags.as_u8();

        // Stream ID (31 bits, big-endian, reserved bit is 0)
        let stream_id = stream_id & MAX_STREAM_ID;
        header[5..9].copy_from_slice(&stream_id.to_be_bytes());

        header
    }

    /// Decode a frame header from bytes
    ///
    /// Returns the frame type, flags, stream id and declared payload length.
    pub fn decode_header(bytes: &[u8; FRAME_HEADER_SIZE]) -> (FrameType, FrameFlags, u32, usize) {
        // Length (24 bits, big-endian)
        let length = ((bytes[0] as usize) << 16) | ((bytes[1] as usize) << 8) | (bytes[2] as usize);

        // Type (8 bits); extension types are kept, not coerced
        let frame_type = FrameType::from_u8(bytes[3]);

        // Flags (8 bits)
        let flags = FrameFlags::from_u8(bytes[4]);

        // Stream ID (31 bits, ignore reserved bit)
        let stream_id = u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]) & MAX_STREAM_ID;

        (frame_type, flags, stream_id, length)
    }

    /// Encode a complete frame (header and payload) into one buffer
    pub fn encode(frame: &Frame) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + frame.payload.len());
        buf.put_slice(&Self::encode_header(
            frame.frame_type,
            frame.flags,
            frame.stream_id,
            frame.payload.len(),
        ));
        buf.put_slice(&frame.payload);
        buf.freeze()
    }
}

/// Reads frames from the receiving half of the byte stream
pub struct FrameReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap a reader
    pub fn new(inner: R) -> Self {
        FrameReader { inner }
    }

    /// Read exactly one frame
    ///
    /// `max_frame_size` is the limit this endpoint advertised. A larger
    /// declared length is a FRAME_SIZE_ERROR; end-of-stream before the
    /// declared bytes arrive is [`Error::ConnectionClosed`].
    pub async fn read_frame(&mut self, max_frame_size: u32) -> Result<Frame> {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        self.inner.read_exact(&mut header).await?;

        let (frame_type, flags, stream_id, length) = FrameCodec::decode_header(&header);
        if length > max_frame_size as usize {
            return Err(Error::FrameSize(format!(
                "{} frame of {} bytes exceeds max frame size {}",
                frame_type.name(),
                length,
                max_frame_size
            )));
        }

        let payload = if length == 0 {
            Bytes::new()
        } else {
            let mut buf = BytesMut::zeroed(length);
            self.inner.read_exact(&mut buf).await?;
            buf.freeze()
        };

        Ok(Frame::new(frame_type, flags, stream_id, payload))
    }

    /// Consume the reader, returning the underlying stream
    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Writes frames to the sending half of the byte stream
pub struct FrameWriter<W> {
    inner: W,
    max_frame_size: u32,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Wrap a writer; frames are bounded by the RFC default until the peer
    /// advertises otherwise
    pub fn new(inner: W) -> Self {
        FrameWriter {
            inner,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Largest payload the peer accepts
    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    /// Apply the peer's SETTINGS_MAX_FRAME_SIZE
    pub fn set_max_frame_size(&mut self, size: u32) {
        self.max_frame_size = size.clamp(DEFAULT_MAX_FRAME_SIZE, MAX_MAX_FRAME_SIZE);
    }

    /// Write the 24-byte client connection preface
    pub async fn write_preface(&mut self) -> Result<()> {
        self.inner.write_all(CONNECTION_PREFACE).await?;
        Ok(())
    }

    /// Write one frame: header, then payload, then flush
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if frame.payload.len() > self.max_frame_size as usize {
            return Err(Error::FrameSize(format!(
                "refusing to write {} frame of {} bytes, peer max is {}",
                frame.frame_type.name(),
                frame.payload.len(),
                self.max_frame_size
            )));
        }

        let header = FrameCodec::encode_header(
            frame.frame_type,
            frame.flags,
            frame.stream_id,
            frame.payload.len(),
        );
        self.inner.write_all(&header).await?;
        if !frame.payload.is_empty() {
            self.inner.write_all(&frame.payload).await?;
        }
        self.inner.flush().await?;
        Ok(())
    }

    /// Shut down the write half
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }

    /// Consume the writer, returning the underlying stream
    pub fn into_inner(self) -> W {
        self.inner
    }
}
