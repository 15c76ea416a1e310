//! Frame layer (RFC 9113 Section 6)
//!
//! [`Frame`] is what crosses the wire: a type, flags, a stream id and an
//! opaque payload. The typed frames below parse a `Frame` payload with
//! `decode` and produce one with `encode`. Checks that need connection
//! state, such as stream-0 rules for DATA, stay in the connection.

use super::error::{Error, ErrorCode, Result};
use super::settings::Settings;
use super::MAX_STREAM_ID;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Data,
    Headers,
    Priority,
    RstStream,
    Settings,
    PushPromise,
    Ping,
    Goaway,
    WindowUpdate,
    Continuation,
    /// Extension type; the connection discards these
    Unknown(u8),
}

/// Defined frame types, indexed by their wire code
const FRAME_TYPES: [(FrameType, &str); 10] = [
    (FrameType::Data, "DATA"),
    (FrameType::Headers, "HEADERS"),
    (FrameType::Priority, "PRIORITY"),
    (FrameType::RstStream, "RST_STREAM"),
    (FrameType::Settings, "SETTINGS"),
    (FrameType::PushPromise, "PUSH_PROMISE"),
    (FrameType::Ping, "PING"),
    (FrameType::Goaway, "GOAWAY"),
    (FrameType::WindowUpdate, "WINDOW_UPDATE"),
    (FrameType::Continuation, "CONTINUATION"),
];

impl FrameType {
    pub fn as_u8(self) -> u8 {
        match self {
            FrameType::Unknown(byte) => byte,
            known => FRAME_TYPES
                .iter()
                .position(|(t, _)| *t == known)
                .map_or(0xff, |i| i as u8),
        }
    }

    pub fn from_u8(byte: u8) -> Self {
        FRAME_TYPES
            .get(byte as usize)
            .map_or(FrameType::Unknown(byte), |(t, _)| *t)
    }

    pub fn name(&self) -> &'static str {
        match self {
            FrameType::Unknown(_) => "UNKNOWN",
            known => FRAME_TYPES
                .iter()
                .find(|(t, _)| t == known)
                .map_or("UNKNOWN", |(_, name)| name),
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u8())
    }
}

/// The flags octet of a frame header
///
/// Bits mean different things per frame type: 0x1 is END_STREAM on DATA and
/// HEADERS but ACK on SETTINGS and PING.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFlags(u8);

impl FrameFlags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_u8(bits: u8) -> Self {
        FrameFlags(bits)
    }

    pub fn as_u8(&self) -> u8 {
        self.0
    }

    pub fn set(&mut self, flag: u8) {
        self.0 |= flag;
    }

    pub fn is_set(&self, flag: u8) -> bool {
        self.0 & flag == flag
    }

    pub fn is_end_stream(&self) -> bool {
        self.is_set(Self::END_STREAM)
    }

    pub fn is_ack(&self) -> bool {
        self.is_set(Self::ACK)
    }

    pub fn is_end_headers(&self) -> bool {
        self.is_set(Self::END_HEADERS)
    }

    pub fn is_padded(&self) -> bool {
        self.is_set(Self::PADDED)
    }

    pub fn is_priority(&self) -> bool {
        self.is_set(Self::PRIORITY)
    }
}

/// One frame as read from or written to the transport
///
/// The 24-bit length field is implied by the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub flags: FrameFlags,
    /// Reserved bit always clear
    pub stream_id: u32,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(frame_type: FrameType, flags: FrameFlags, stream_id: u32, payload: Bytes) -> Self {
        Frame {
            frame_type,
            flags,
            stream_id: stream_id & MAX_STREAM_ID,
            payload,
        }
    }

    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

/// Remove the pad length octet and trailing padding from a PADDED payload
fn strip_padding(frame: &Frame) -> Result<(Bytes, Option<u8>)> {
    let mut payload = frame.payload.clone();
    if !frame.flags.is_padded() {
        return Ok((payload, None));
    }

    if payload.is_empty() {
        return Err(Error::FrameSize(format!(
            "padded {} frame without pad length",
            frame.frame_type.name()
        )));
    }

    let pad_len = payload.get_u8();
    if pad_len as usize > payload.len() {
        return Err(Error::Protocol(format!(
            "{} padding {} exceeds payload {}",
            frame.frame_type.name(),
            pad_len,
            payload.len()
        )));
    }
    payload.truncate(payload.len() - pad_len as usize);

    Ok((payload, Some(pad_len)))
}

/// Append padding bytes for an encoded frame
fn put_padding(buf: &mut BytesMut, padding: Option<u8>) {
    if let Some(pad_len) = padding {
        buf.put_bytes(0, pad_len as usize);
    }
}

fn expect_len(frame: &Frame, expected: usize) -> Result<()> {
    if frame.payload.len() != expected {
        return Err(Error::FrameSize(format!(
            "{} payload must be {} bytes, got {}",
            frame.frame_type.name(),
            expected,
            frame.payload.len()
        )));
    }
    Ok(())
}

/// DATA (RFC 9113 Section 6.1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    pub stream_id: u32,
    pub data: Bytes,
    pub end_stream: bool,
    pub padding: Option<u8>,
}

impl DataFrame {
    pub fn new(stream_id: u32, data: Bytes, end_stream: bool) -> Self {
        DataFrame {
            stream_id,
            data,
            end_stream,
            padding: None,
        }
    }

    pub fn with_padding(mut self, padding: u8) -> Self {
        self.padding = Some(padding);
        self
    }

    /// Flow-controlled length of this frame
    ///
    /// This is the amount debited from flow-control windows, which is larger
    /// than `data.len()` when the frame is padded.
    pub fn frame_size(&self) -> usize {
        let mut size = self.data.len();
        if let Some(pad_len) = self.padding {
            size += 1 + pad_len as usize;
        }
        size
    }

    pub fn decode(frame: &Frame) -> Result<Self> {
        let (data, padding) = strip_padding(frame)?;
        Ok(DataFrame {
            stream_id: frame.stream_id,
            data,
            end_stream: frame.flags.is_end_stream(),
            padding,
        })
    }

    pub fn encode(&self) -> Frame {
        let mut flags = FrameFlags::empty();
        if self.end_stream {
            flags.set(FrameFlags::END_STREAM);
        }

        let payload = match self.padding {
            None => self.data.clone(),
            Some(pad_len) => {
                flags.set(FrameFlags::PADDED);
                let mut buf = BytesMut::with_capacity(self.frame_size());
                buf.put_u8(pad_len);
                buf.put_slice(&self.data);
                put_padding(&mut buf, self.padding);
                buf.freeze()
            }
        };

        Frame::new(FrameType::Data, flags, self.stream_id, payload)
    }
}

/// HEADERS (RFC 9113 Section 6.2)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadersFrame {
    pub stream_id: u32,
    pub header_block: Bytes,
    pub end_stream: bool,
    pub end_headers: bool,
    pub priority: Option<PrioritySpec>,
    pub padding: Option<u8>,
}

impl HeadersFrame {
    pub fn new(stream_id: u32, header_block: Bytes, end_stream: bool, end_headers: bool) -> Self {
        HeadersFrame {
            stream_id,
            header_block,
            end_stream,
            end_headers,
            priority: None,
            padding: None,
        }
    }

    pub fn with_priority(mut self, priority: PrioritySpec) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_padding(mut self, padding: u8) -> Self {
        self.padding = Some(padding);
        self
    }

    pub fn decode(frame: &Frame) -> Result<Self> {
        let (mut fragment, padding) = strip_padding(frame)?;

        let priority = if frame.flags.is_priority() {
            if fragment.len() < PrioritySpec::ENCODED_LEN {
                return Err(Error::FrameSize(
                    "HEADERS with PRIORITY flag shorter than 5 bytes".to_string(),
                ));
            }
            Some(PrioritySpec::decode(&mut fragment))
        } else {
            None
        };

        Ok(HeadersFrame {
            stream_id: frame.stream_id,
            header_block: fragment,
            end_stream: frame.flags.is_end_stream(),
            end_headers: frame.flags.is_end_headers(),
            priority,
            padding,
        })
    }

    pub fn encode(&self) -> Frame {
        let mut flags = FrameFlags::empty();
        if self.end_stream {
            flags.set(FrameFlags::END_STREAM);
        }
        if self.end_headers {
            flags.set(FrameFlags::END_HEADERS);
        }

        let mut buf = BytesMut::with_capacity(self.header_block.len() + 6);
        if let Some(pad_len) = self.padding {
            flags.set(FrameFlags::PADDED);
            buf.put_u8(pad_len);
        }
        if let Some(priority) = &self.priority {
            flags.set(FrameFlags::PRIORITY);
            priority.encode(&mut buf);
        }
        buf.put_slice(&self.header_block);
        put_padding(&mut buf, self.padding);

        Frame::new(FrameType::Headers, flags, self.stream_id, buf.freeze())
    }
}

/// Stream dependency and weight (RFC 9113 Section 5.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrioritySpec {
    pub stream_dependency: u32,
    pub exclusive: bool,
    /// Weight as carried on the wire (effective weight minus one)
    pub weight: u8,
}

impl PrioritySpec {
    const ENCODED_LEN: usize = 5;

    pub fn new(stream_dependency: u32, exclusive: bool, weight: u8) -> Self {
        PrioritySpec {
            stream_dependency,
            exclusive,
            weight,
        }
    }

    fn decode(buf: &mut Bytes) -> Self {
        let dep = buf.get_u32();
        let weight = buf.get_u8();
        PrioritySpec {
            stream_dependency: dep & MAX_STREAM_ID,
            exclusive: dep & 0x8000_0000 != 0,
            weight,
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        let mut dep = self.stream_dependency & MAX_STREAM_ID;
        if self.exclusive {
            dep |= 0x8000_0000; // Set exclusive bit
        }
        buf.put_u32(dep);
        buf.put_u8(self.weight);
    }
}

/// PRIORITY (RFC 9113 Section 6.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityFrame {
    pub stream_id: u32,
    pub priority: PrioritySpec,
}

impl PriorityFrame {
    pub fn decode(frame: &Frame) -> Result<Self> {
        expect_len(frame, PrioritySpec::ENCODED_LEN)?;
        let mut payload = frame.payload.clone();
        Ok(PriorityFrame {
            stream_id: frame.stream_id,
            priority: PrioritySpec::decode(&mut payload),
        })
    }

    pub fn encode(&self) -> Frame {
        let mut buf = BytesMut::with_capacity(PrioritySpec::ENCODED_LEN);
        self.priority.encode(&mut buf);
        Frame::new(FrameType::Priority, FrameFlags::empty(), self.stream_id, buf.freeze())
    }

    /// A stream cannot depend on itself (RFC 9113 Section 5.3.1)
    pub fn is_self_dependent(&self) -> bool {
        self.priority.stream_dependency == self.stream_id
    }
}

/// RST_STREAM (RFC 9113 Section 6.4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RstStreamFrame {
    pub stream_id: u32,
    pub error_code: ErrorCode,
}

impl RstStreamFrame {
    pub fn new(stream_id: u32, error_code: ErrorCode) -> Self {
        RstStreamFrame {
            stream_id,
            error_code,
        }
    }

    pub fn decode(frame: &Frame) -> Result<Self> {
        expect_len(frame, 4)?;
        let code = frame.payload.clone().get_u32();
        Ok(RstStreamFrame {
            stream_id: frame.stream_id,
            error_code: ErrorCode::from_wire(code),
        })
    }

    pub fn encode(&self) -> Frame {
        let mut buf = BytesMut::with_capacity(4);
        buf.put_u32(self.error_code.as_u32());
        Frame::new(FrameType::RstStream, FrameFlags::empty(), self.stream_id, buf.freeze())
    }
}

/// SETTINGS (RFC 9113 Section 6.5)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsFrame {
    pub ack: bool,
    pub settings: Settings,
}

impl SettingsFrame {
    pub fn new(settings: Settings) -> Self {
        SettingsFrame {
            ack: false,
            settings,
        }
    }

    /// Empty SETTINGS with ACK set
    pub fn ack() -> Self {
        SettingsFrame {
            ack: true,
            settings: Settings::default(),
        }
    }

    pub fn decode(frame: &Frame) -> Result<Self> {
        if frame.stream_id != 0 {
            return Err(Error::Protocol(format!(
                "SETTINGS on stream {}",
                frame.stream_id
            )));
        }

        if frame.flags.is_ack() {
            if !frame.payload.is_empty() {
                return Err(Error::FrameSize(format!(
                    "SETTINGS ACK with {} byte payload",
                    frame.payload.len()
                )));
            }
            return Ok(SettingsFrame::ack());
        }

        Ok(SettingsFrame::new(Settings::decode(&frame.payload)?))
    }

    pub fn encode(&self) -> Frame {
        if self.ack {
            return Frame::new(
                FrameType::Settings,
                FrameFlags::from_u8(FrameFlags::ACK),
                0,
                Bytes::new(),
            );
        }
        Frame::new(
            FrameType::Settings,
            FrameFlags::empty(),
            0,
            self.settings.encode(),
        )
    }
}

/// PUSH_PROMISE (RFC 9113 Section 6.6)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushPromiseFrame {
    pub stream_id: u32,
    pub promised_stream_id: u32,
    pub header_block: Bytes,
    pub end_headers: bool,
    pub padding: Option<u8>,
}

impl PushPromiseFrame {
    pub fn decode(frame: &Frame) -> Result<Self> {
        let (mut fragment, padding) = strip_padding(frame)?;
        if fragment.len() < 4 {
            return Err(Error::FrameSize(
                "PUSH_PROMISE shorter than promised stream id".to_string(),
            ));
        }
        let promised_stream_id = fragment.get_u32() & MAX_STREAM_ID;

        Ok(PushPromiseFrame {
            stream_id: frame.stream_id,
            promised_stream_id,
            header_block: fragment,
            end_headers: frame.flags.is_end_headers(),
            padding,
        })
    }

    pub fn encode(&self) -> Frame {
        let mut flags = FrameFlags::empty();
        if self.end_headers {
            flags.set(FrameFlags::END_HEADERS);
        }

        let mut buf = BytesMut::with_capacity(self.header_block.len() + 5);
        if let Some(pad_len) = self.padding {
            flags.set(FrameFlags::PADDED);
            buf.put_u8(pad_len);
        }
        buf.put_u32(self.promised_stream_id & MAX_STREAM_ID);
        buf.put_slice(&self.header_block);
        put_padding(&mut buf, self.padding);

        Frame::new(FrameType::PushPromise, flags, self.stream_id, buf.freeze())
    }
}

/// PING (RFC 9113 Section 6.7)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingFrame {
    pub ack: bool,
    pub data: [u8; 8],
}

impl PingFrame {
    pub fn new(data: [u8; 8]) -> Self {
        PingFrame { ack: false, data }
    }

    /// Reply to a PING, echoing its payload
    pub fn ack(data: [u8; 8]) -> Self {
        PingFrame { ack: true, data }
    }

    pub fn decode(frame: &Frame) -> Result<Self> {
        if frame.stream_id != 0 {
            return Err(Error::Protocol(format!("PING on stream {}", frame.stream_id)));
        }
        expect_len(frame, 8)?;

        let mut data = [0u8; 8];
        data.copy_from_slice(&frame.payload);
        Ok(PingFrame {
            ack: frame.flags.is_ack(),
            data,
        })
    }

    pub fn encode(&self) -> Frame {
        let flags = if self.ack {
            FrameFlags::from_u8(FrameFlags::ACK)
        } else {
            FrameFlags::empty()
        };
        Frame::new(FrameType::Ping, flags, 0, Bytes::copy_from_slice(&self.data))
    }
}

/// GOAWAY (RFC 9113 Section 6.8)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoawayFrame {
    pub last_stream_id: u32,
    pub error_code: ErrorCode,
    pub debug_data: Bytes,
}

impl GoawayFrame {
    pub fn new(last_stream_id: u32, error_code: ErrorCode, debug_data: Bytes) -> Self {
        GoawayFrame {
            last_stream_id,
            error_code,
            debug_data,
        }
    }

    pub fn decode(frame: &Frame) -> Result<Self> {
        if frame.stream_id != 0 {
            return Err(Error::Protocol(format!("GOAWAY on stream {}", frame.stream_id)));
        }
        if frame.payload.len() < 8 {
            return Err(Error::FrameSize(format!(
                "GOAWAY payload must be at least 8 bytes, got {}",
                frame.payload.len()
            )));
        }

        let mut payload = frame.payload.clone();
        let last_stream_id = payload.get_u32() & MAX_STREAM_ID;
        let error_code = ErrorCode::from_wire(payload.get_u32());
        Ok(GoawayFrame {
            last_stream_id,
            error_code,
            debug_data: payload,
        })
    }

    pub fn encode(&self) -> Frame {
        let mut buf = BytesMut::with_capacity(8 + self.debug_data.len());
        buf.put_u32(self.last_stream_id & MAX_STREAM_ID);
        buf.put_u32(self.error_code.as_u32());
        buf.put_slice(&self.debug_data);
        Frame::new(FrameType::Goaway, FrameFlags::empty(), 0, buf.freeze())
    }
}

/// WINDOW_UPDATE (RFC 9113 Section 6.9)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowUpdateFrame {
    /// 0 for the connection window
    pub stream_id: u32,
    pub size_increment: u32,
}

impl WindowUpdateFrame {
    pub fn new(stream_id: u32, size_increment: u32) -> Self {
        WindowUpdateFrame {
            stream_id,
            size_increment,
        }
    }

    /// Decode a WINDOW_UPDATE frame
    ///
    /// A zero increment decodes successfully; whether it is a stream or a
    /// connection error depends on the stream id and is decided by the caller.
    pub fn decode(frame: &Frame) -> Result<Self> {
        expect_len(frame, 4)?;
        let increment = frame.payload.clone().get_u32() & 0x7FFF_FFFF;
        Ok(WindowUpdateFrame {
            stream_id: frame.stream_id,
            size_increment: increment,
        })
    }

    pub fn encode(&self) -> Frame {
        let mut buf = BytesMut::with_capacity(4);
        // Reserved bit must be 0
        buf.put_u32(self.size_increment & 0x7FFF_FFFF);
        Frame::new(FrameType::WindowUpdate, FrameFlags::empty(), self.stream_id, buf.freeze())
    }
}

/// CONTINUATION (RFC 9113 Section 6.10)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationFrame {
    pub stream_id: u32,
    pub header_block: Bytes,
    pub end_headers: bool,
}

impl ContinuationFrame {
    pub fn decode(frame: &Frame) -> Result<Self> {
        Ok(ContinuationFrame {
            stream_id: frame.stream_id,
            header_block: frame.payload.clone(),
            end_headers: frame.flags.is_end_headers(),
        })
    }

    pub fn encode(&self) -> Frame {
        let flags = if self.end_headers {
            FrameFlags::from_u8(FrameFlags::END_HEADERS)
        } else {
            FrameFlags::empty()
        };
        Frame::new(FrameType::Continuation, flags, self.stream_id, self.header_block.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::h2::settings::SettingsBuilder;

    #[test]
    fn test_every_defined_type_round_trips_its_code() {
        for code in 0u8..=9 {
            let frame_type = FrameType::from_u8(code);
            assert!(!matches!(frame_type, FrameType::Unknown(_)));
            assert_eq!(frame_type.as_u8(), code);
        }
        assert_eq!(FrameType::from_u8(0xa), FrameType::Unknown(0xa));
        assert_eq!(FrameType::Unknown(0x42).as_u8(), 0x42);
        assert_eq!(FrameType::WindowUpdate.to_string(), "WINDOW_UPDATE (0x8)");
        assert_eq!(FrameType::Unknown(0x42).name(), "UNKNOWN");
    }

    #[test]
    fn test_flag_bits_overlap_by_frame_type() {
        let flags = FrameFlags::from_u8(FrameFlags::END_STREAM | FrameFlags::PADDED);
        assert!(flags.is_end_stream());
        // Same bit, read on a SETTINGS or PING frame
        assert!(flags.is_ack());
        assert!(flags.is_padded());
        assert!(!flags.is_end_headers());
        assert!(!flags.is_priority());

        let mut flags = FrameFlags::empty();
        flags.set(FrameFlags::END_HEADERS);
        assert_eq!(flags.as_u8(), 0x4);
    }

    #[test]
    fn test_frame_new_clears_reserved_bit() {
        let frame = Frame::new(FrameType::Data, FrameFlags::empty(), 0x8000_0003, Bytes::new());
        assert_eq!(frame.stream_id, 3);
    }

    #[test]
    fn test_data_frame_padding_is_stripped() {
        let frame = DataFrame::new(1, Bytes::from("Hello"), true).with_padding(10);
        assert_eq!(frame.frame_size(), 16); // 5 + 1 + 10

        let raw = frame.encode();
        assert_eq!(raw.payload_len(), 16);
        assert!(raw.flags.is_padded());

        let decoded = DataFrame::decode(&raw).unwrap();
        assert_eq!(decoded.data, Bytes::from("Hello"));
        assert_eq!(decoded.padding, Some(10));
        assert_eq!(decoded.frame_size(), 16);
        assert!(decoded.end_stream);
    }

    #[test]
    fn test_data_frame_padding_too_long() {
        // pad length 5 but only 3 bytes follow
        let raw = Frame::new(
            FrameType::Data,
            FrameFlags::from_u8(FrameFlags::PADDED),
            1,
            Bytes::from_static(&[5, b'a', b'b', b'c']),
        );
        assert!(matches!(DataFrame::decode(&raw), Err(Error::Protocol(_))));

        // padded flag with no pad length byte at all
        let raw = Frame::new(
            FrameType::Data,
            FrameFlags::from_u8(FrameFlags::PADDED),
            1,
            Bytes::new(),
        );
        assert!(matches!(DataFrame::decode(&raw), Err(Error::FrameSize(_))));
    }

    #[test]
    fn test_headers_frame_priority_and_padding() {
        let frame = HeadersFrame::new(3, Bytes::from("block"), false, true)
            .with_priority(PrioritySpec::new(1, true, 15))
            .with_padding(4);

        let raw = frame.encode();
        assert!(raw.flags.is_priority());
        assert!(raw.flags.is_padded());
        assert_eq!(raw.payload_len(), 1 + 5 + 5 + 4);

        let decoded = HeadersFrame::decode(&raw).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_headers_frame_truncated_priority() {
        let raw = Frame::new(
            FrameType::Headers,
            FrameFlags::from_u8(FrameFlags::PRIORITY | FrameFlags::END_HEADERS),
            1,
            Bytes::from_static(&[0, 0, 0]),
        );
        assert!(matches!(HeadersFrame::decode(&raw), Err(Error::FrameSize(_))));
    }

    #[test]
    fn test_priority_frame() {
        let frame = PriorityFrame {
            stream_id: 5,
            priority: PrioritySpec::new(5, false, 0),
        };
        let decoded = PriorityFrame::decode(&frame.encode()).unwrap();
        assert!(decoded.is_self_dependent());

        let short = Frame::new(FrameType::Priority, FrameFlags::empty(), 5, Bytes::from_static(&[0; 4]));
        assert!(matches!(PriorityFrame::decode(&short), Err(Error::FrameSize(_))));
    }

    #[test]
    fn test_settings_frame() {
        let settings = SettingsBuilder::new()
            .initial_window_size(1024)
            .build()
            .unwrap();
        let frame = SettingsFrame::new(settings);
        assert!(!frame.ack);
        assert_eq!(SettingsFrame::decode(&frame.encode()).unwrap(), frame);

        let ack_frame = SettingsFrame::ack();
        let raw = ack_frame.encode();
        assert!(raw.flags.is_ack());
        assert!(raw.payload.is_empty());
    }

    #[test]
    fn test_settings_ack_with_payload_is_frame_size_error() {
        let raw = Frame::new(
            FrameType::Settings,
            FrameFlags::from_u8(FrameFlags::ACK),
            0,
            Bytes::from_static(&[0, 4, 0, 0, 0, 1]),
        );
        assert!(matches!(SettingsFrame::decode(&raw), Err(Error::FrameSize(_))));
    }

    #[test]
    fn test_ping_frame() {
        let data = [1, 2, 3, 4, 5, 6, 7, 8];
        let ping = PingFrame::new(data);
        assert!(!ping.ack);
        assert_eq!(PingFrame::decode(&ping.encode()).unwrap(), ping);

        let pong = PingFrame::ack(data);
        assert!(pong.encode().flags.is_ack());

        let short = Frame::new(FrameType::Ping, FrameFlags::empty(), 0, Bytes::from_static(&[0; 4]));
        assert!(matches!(PingFrame::decode(&short), Err(Error::FrameSize(_))));
    }

    #[test]
    fn test_goaway_frame() {
        let frame = GoawayFrame::new(7, ErrorCode::EnhanceYourCalm, Bytes::from("slow down"));
        let decoded = GoawayFrame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded, frame);

        let short = Frame::new(FrameType::Goaway, FrameFlags::empty(), 0, Bytes::from_static(&[0; 7]));
        assert!(matches!(GoawayFrame::decode(&short), Err(Error::FrameSize(_))));
    }

    #[test]
    fn test_window_update_masks_reserved_bit() {
        let raw = Frame::new(
            FrameType::WindowUpdate,
            FrameFlags::empty(),
            3,
            Bytes::from_static(&[0x80, 0, 0x04, 0]),
        );
        let decoded = WindowUpdateFrame::decode(&raw).unwrap();
        assert_eq!(decoded.size_increment, 1024);
        assert_eq!(decoded.stream_id, 3);
    }

    #[test]
    fn test_push_promise_frame() {
        let frame = PushPromiseFrame {
            stream_id: 1,
            promised_stream_id: 2,
            header_block: Bytes::from("hdrs"),
            end_headers: true,
            padding: Some(2),
        };
        assert_eq!(PushPromiseFrame::decode(&frame.encode()).unwrap(), frame);
    }

    #[test]
    fn test_rst_stream_unknown_code() {
        let raw = Frame::new(
            FrameType::RstStream,
            FrameFlags::empty(),
            1,
            Bytes::from_static(&[0, 0, 0x10, 0]),
        );
        let decoded = RstStreamFrame::decode(&raw).unwrap();
        assert_eq!(decoded.error_code, ErrorCode::InternalError);
    }
}
