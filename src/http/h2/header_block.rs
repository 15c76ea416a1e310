//! HPACK header block handling
//!
//! Outgoing request header lists go through [`HeaderEncoder`], a wrapper
//! around `loona_hpack::Encoder` that follows the peer's
//! SETTINGS_HEADER_TABLE_SIZE and keeps credentials out of every
//! compression context.
//!
//! Incoming header blocks are decoded with the `hpack` crate's decoder and
//! then checked against the locally advertised header list limit and the
//! pseudo-header rules for responses and trailers.

use super::error::{Error, Result};
use super::DEFAULT_HEADER_TABLE_SIZE;
use crate::http::headers::{Headers, HEADER_FIELD_OVERHEAD};
use bytes::{BufMut, BytesMut};
use hpack::encoder::encode_integer_into;
use std::fmt;
use std::io::{self, Write};

/// Headers that must never enter any compression context
const SENSITIVE_HEADERS: &[&str] = &["authorization", "proxy-authorization", "cookie", "set-cookie"];

/// Whether a header is emitted as a never-indexed literal
pub fn is_sensitive(name: &str) -> bool {
    SENSITIVE_HEADERS.iter().any(|s| s.eq_ignore_ascii_case(name))
}

/// Size of a header list as counted by SETTINGS_MAX_HEADER_LIST_SIZE
pub fn header_list_size<'a>(fields: impl IntoIterator<Item = (&'a str, &'a str)>) -> usize {
    fields
        .into_iter()
        .map(|(name, value)| name.len() + value.len() + HEADER_FIELD_OVERHEAD)
        .sum()
}

/// Encodes request header lists
///
/// One per connection, used only under the write lock: blocks must reach
/// the wire in the order they were encoded.
pub struct HeaderEncoder {
    inner: loona_hpack::Encoder<'static>,
    /// Dynamic table capacity last signalled (or assumed) for the peer decoder
    capacity: usize,
    /// Smallest and final capacity since the last block, when they changed
    pending_update: Option<(usize, usize)>,
}

impl HeaderEncoder {
    /// Create an encoder using the default 4096-byte table capacity
    pub fn new() -> Self {
        HeaderEncoder {
            inner: loona_hpack::Encoder::new(),
            capacity: DEFAULT_HEADER_TABLE_SIZE as usize,
            pending_update: None,
        }
    }

    /// Current dynamic table capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Apply one SETTINGS_HEADER_TABLE_SIZE value from the peer
    ///
    /// Call once per value, in arrival order. The capacity never grows
    /// beyond the default; the next encoded block starts with the dynamic
    /// table size update(s) RFC 7541 Section 4.2 requires.
    pub fn set_max_table_size(&mut self, peer_size: u32) {
        let new_capacity = (peer_size as usize).min(DEFAULT_HEADER_TABLE_SIZE as usize);
        let smallest = match self.pending_update {
            Some((smallest, _)) => smallest.min(new_capacity),
            None => self.capacity.min(new_capacity),
        };
        if self.pending_update.is_none() && new_capacity == self.capacity {
            return;
        }
        self.pending_update = Some((smallest, new_capacity));
        self.capacity = new_capacity;
    }

    /// Encode a header list, appending the block to `dst`
    pub fn encode<'a>(&mut self, fields: impl IntoIterator<Item = (&'a str, &'a str)>, dst: &mut BytesMut) -> Result<()> {
        self.encode_block(fields, &mut BufMut::writer(dst))
            .map_err(|e| Error::Internal(format!("header block encode failed: {}", e)))
    }

    fn encode_block<'a, W: Write>(
        &mut self,
        fields: impl IntoIterator<Item = (&'a str, &'a str)>,
        out: &mut W,
    ) -> io::Result<()> {
        if let Some((smallest, last)) = self.pending_update.take() {
            if smallest < last {
                encode_integer_into(smallest, 5, 0x20, out)?;
                self.inner.set_max_table_size(smallest);
            }
            encode_integer_into(last, 5, 0x20, out)?;
            self.inner.set_max_table_size(last);
        }

        for (name, value) in fields {
            if is_sensitive(name) {
                write_never_indexed(name, value, out)?;
            } else {
                self.inner
                    .encode_into([(name.as_bytes(), value.as_bytes())], out)?;
            }
        }
        Ok(())
    }
}

/// Literal Header Field Never Indexed with a literal name (RFC 7541 Section 6.2.3)
fn write_never_indexed<W: Write>(name: &str, value: &str, out: &mut W) -> io::Result<()> {
    out.write_all(&[0x10])?;
    for literal in [name.as_bytes(), value.as_bytes()] {
        encode_integer_into(literal.len(), 7, 0x00, out)?;
        out.write_all(literal)?;
    }
    Ok(())
}

impl Default for HeaderEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HeaderEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeaderEncoder")
            .field("capacity", &self.capacity)
            .field("pending_update", &self.pending_update)
            .finish_non_exhaustive()
    }
}

/// Decodes response header blocks
pub struct HeaderDecoder {
    inner: hpack::Decoder<'static>,
}

impl HeaderDecoder {
    /// Create a decoder with the default 4096-byte dynamic table
    pub fn new() -> Self {
        HeaderDecoder {
            inner: hpack::Decoder::new(),
        }
    }

    /// Decode a complete header block into an ordered field list
    ///
    /// Any HPACK failure is a COMPRESSION_ERROR: the decoder state can no
    /// longer be trusted, so the whole connection has to go.
    pub fn decode(&mut self, block: &[u8]) -> Result<Vec<(String, String)>> {
        let fields = self
            .inner
            .decode(block)
            .map_err(|e| Error::Compression(format!("header block decode failed: {:?}", e)))?;

        Ok(fields
            .into_iter()
            .map(|(name, value)| {
                (
                    String::from_utf8_lossy(&name).into_owned(),
                    String::from_utf8_lossy(&value).into_owned(),
                )
            })
            .collect())
    }
}

impl Default for HeaderDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Validated initial header block of a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    /// `:status`
    pub status: u16,
    /// Regular header fields
    pub headers: Headers,
}

impl ResponseHead {
    /// Whether this is an interim (1xx) response
    pub fn is_informational(&self) -> bool {
        (100..200).contains(&self.status)
    }

    /// `content-length`, if present and parseable
    pub fn content_length(&self) -> Option<u64> {
        self.headers.get("content-length")?.trim().parse().ok()
    }
}

fn check_list_size(fields: &[(String, String)], limit: usize) -> Result<()> {
    let size = header_list_size(fields.iter().map(|(n, v)| (n.as_str(), v.as_str())));
    if size > limit {
        return Err(Error::HeaderListTooLarge { size, limit });
    }
    Ok(())
}

fn check_field_name(name: &str) -> Result<()> {
    if name.is_empty() || name.bytes().any(|b| b.is_ascii_uppercase()) {
        return Err(Error::InvalidHeader(format!("malformed field name {:?}", name)));
    }
    Ok(())
}

/// Validate the decoded fields of a response header block
///
/// The list size is checked before anything else so an oversized list is
/// never attached to a stream.
pub fn validate_response(fields: Vec<(String, String)>, max_list_size: usize) -> Result<ResponseHead> {
    check_list_size(&fields, max_list_size)?;

    let mut iter = fields.into_iter();
    let status = match iter.next() {
        Some((name, value)) if name == ":status" => parse_status(&value)?,
        Some((name, _)) if name.starts_with(':') => {
            return Err(Error::UnexpectedPseudoHeader(name));
        }
        _ => return Err(Error::MissingStatus),
    };

    let mut headers = Headers::new();
    for (name, value) in iter {
        if name.starts_with(':') {
            return Err(Error::UnexpectedPseudoHeader(name));
        }
        check_field_name(&name)?;
        headers.insert(name, value);
    }

    Ok(ResponseHead { status, headers })
}

/// Validate the decoded fields of a trailing header block
pub fn validate_trailers(fields: Vec<(String, String)>, max_list_size: usize) -> Result<Headers> {
    check_list_size(&fields, max_list_size)?;

    let mut trailers = Headers::new();
    for (name, value) in fields {
        if name == ":status" {
            return Err(Error::StatusInTrailers);
        }
        if name.starts_with(':') {
            return Err(Error::UnexpectedPseudoHeader(name));
        }
        check_field_name(&name)?;
        trailers.insert(name, value);
    }
    Ok(trailers)
}

fn parse_status(value: &str) -> Result<u16> {
    if value.len() != 3 {
        return Err(Error::InvalidStatus(value.to_string()));
    }
    match value.parse::<u16>() {
        Ok(status) if (100..=999).contains(&status) => Ok(status),
        _ => Err(Error::InvalidStatus(value.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect()
    }

    fn decode_with_hpack(block: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        hpack::Decoder::new().decode(block).unwrap()
    }

    fn encode(encoder: &mut HeaderEncoder, list: &[(&str, &str)]) -> BytesMut {
        let mut buf = BytesMut::new();
        encoder.encode(list.iter().copied(), &mut buf).unwrap();
        buf
    }

    fn size_update(size: usize) -> Vec<u8> {
        let mut out = Vec::new();
        encode_integer_into(size, 5, 0x20, &mut out).unwrap();
        out
    }

    #[test]
    fn test_encode_static_match() {
        let mut encoder = HeaderEncoder::new();
        let buf = encode(&mut encoder, &[(":method", "GET"), (":scheme", "https"), (":path", "/")]);
        assert_eq!(&buf[..], &[0x82, 0x87, 0x84]);
    }

    #[test]
    fn test_every_static_table_name_survives_decoding() {
        // RFC 7541 Appendix A, names only
        let names = [
            ":authority", "accept-charset", "accept-encoding", "accept-language", "accept-ranges",
            "accept", "access-control-allow-origin", "age", "allow", "cache-control",
            "content-disposition", "content-encoding", "content-language", "content-length",
            "content-location", "content-range", "content-type", "date", "etag", "expect",
            "expires", "from", "host", "if-match", "if-modified-since", "if-none-match", "if-range",
            "if-unmodified-since", "last-modified", "link", "location", "max-forwards",
            "proxy-authenticate", "range", "referer", "refresh", "retry-after", "server",
            "strict-transport-security", "transfer-encoding", "user-agent", "vary", "via",
            "www-authenticate",
        ];
        let list: Vec<(&str, &str)> = names.iter().map(|n| (*n, "x-value")).collect();

        let mut encoder = HeaderEncoder::new();
        let mut peer = hpack::Decoder::new();
        // Twice, so the decoder state carries across blocks
        for _ in 0..2 {
            let decoded = peer.decode(&encode(&mut encoder, &list)).unwrap();
            let decoded_names: Vec<&[u8]> = decoded.iter().map(|(n, _)| n.as_slice()).collect();
            let expected: Vec<&[u8]> = names.iter().map(|n| n.as_bytes()).collect();
            assert_eq!(decoded_names, expected);
            assert!(decoded.iter().all(|(_, v)| v == b"x-value"));
        }
    }

    #[test]
    fn test_encoded_block_decodes() {
        let mut encoder = HeaderEncoder::new();
        let list = [
            (":method", "POST"),
            (":scheme", "https"),
            (":authority", "example.com"),
            (":path", "/upload"),
            ("content-type", "text/plain"),
            ("x-custom", "value"),
            ("authorization", "Bearer secret"),
        ];
        let buf = encode(&mut encoder, &list);

        let decoded = decode_with_hpack(&buf);
        let expected: Vec<(Vec<u8>, Vec<u8>)> = list
            .iter()
            .map(|(n, v)| (n.as_bytes().to_vec(), v.as_bytes().to_vec()))
            .collect();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn test_sensitive_headers_never_indexed() {
        let mut encoder = HeaderEncoder::new();
        let buf = encode(&mut encoder, &[("cookie", "a=b")]);
        assert_eq!(&buf[..], b"\x10\x06cookie\x03a=b");

        // Sent again, still a literal: nothing entered the dynamic table
        let again = encode(&mut encoder, &[("cookie", "a=b")]);
        assert_eq!(again, buf);
        assert!(is_sensitive("Authorization"));
        assert!(!is_sensitive("accept"));
    }

    #[test]
    fn test_table_size_update_signalled_once() {
        let mut encoder = HeaderEncoder::new();
        encoder.set_max_table_size(4096);
        assert_eq!(&encode(&mut encoder, &[(":method", "GET")])[..], &[0x82]);

        encoder.set_max_table_size(0);
        assert_eq!(encoder.capacity(), 0);
        assert_eq!(&encode(&mut encoder, &[(":method", "GET")])[..], &[0x20, 0x82]);
        assert_eq!(&encode(&mut encoder, &[(":method", "GET")])[..], &[0x82]);
    }

    #[test]
    fn test_table_size_shrink_then_restore() {
        let mut encoder = HeaderEncoder::new();
        encoder.set_max_table_size(100);
        encoder.set_max_table_size(8192);
        assert_eq!(encoder.capacity(), 4096);

        let buf = encode(&mut encoder, &[(":method", "GET")]);
        // Smallest (100) then final (4096)
        let mut expected = size_update(100);
        expected.extend(size_update(4096));
        expected.put_u8(0x82);
        assert_eq!(&buf[..], &expected[..]);
    }

    #[test]
    fn test_zero_table_keeps_peer_in_sync() {
        let mut encoder = HeaderEncoder::new();
        let mut peer = hpack::Decoder::new();
        let list = [("x-trace", "abc"), ("x-trace", "abc")];

        peer.decode(&encode(&mut encoder, &list)).unwrap();
        encoder.set_max_table_size(0);
        let decoded = peer.decode(&encode(&mut encoder, &list)).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[1], (b"x-trace".to_vec(), b"abc".to_vec()));
    }

    #[test]
    fn test_decoder_rejects_garbage() {
        let mut decoder = HeaderDecoder::new();
        // Indexed field 127+ beyond both tables
        assert!(matches!(
            decoder.decode(&[0xff, 0x7f]),
            Err(Error::Compression(_))
        ));
    }

    #[test]
    fn test_decoder_keeps_dynamic_state() {
        let mut server = hpack::Encoder::new();
        let mut decoder = HeaderDecoder::new();

        let first = server.encode(vec![(&b":status"[..], &b"200"[..]), (&b"x-a"[..], &b"1"[..])]);
        let second = server.encode(vec![(&b":status"[..], &b"200"[..]), (&b"x-a"[..], &b"1"[..])]);

        assert_eq!(decoder.decode(&first).unwrap(), fields(&[(":status", "200"), ("x-a", "1")]));
        assert_eq!(decoder.decode(&second).unwrap(), fields(&[(":status", "200"), ("x-a", "1")]));
    }

    #[test]
    fn test_validate_response() {
        let head = validate_response(
            fields(&[(":status", "200"), ("content-length", "7")]),
            65536,
        )
        .unwrap();
        assert_eq!(head.status, 200);
        assert_eq!(head.content_length(), Some(7));
        assert!(!head.is_informational());

        let head = validate_response(fields(&[(":status", "103")]), 65536).unwrap();
        assert!(head.is_informational());
    }

    #[test]
    fn test_validate_response_errors() {
        assert!(matches!(
            validate_response(fields(&[("content-type", "x")]), 65536),
            Err(Error::MissingStatus)
        ));
        assert!(matches!(
            validate_response(Vec::new(), 65536),
            Err(Error::MissingStatus)
        ));
        assert!(matches!(
            validate_response(fields(&[(":status", "abc")]), 65536),
            Err(Error::InvalidStatus(_))
        ));
        assert!(matches!(
            validate_response(fields(&[(":status", "099")]), 65536),
            Err(Error::InvalidStatus(_))
        ));
        assert!(matches!(
            validate_response(fields(&[(":status", "200"), (":path", "/")]), 65536),
            Err(Error::UnexpectedPseudoHeader(_))
        ));
        assert!(matches!(
            validate_response(fields(&[(":status", "200"), ("X-Upper", "1")]), 65536),
            Err(Error::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_header_list_limit_checked_first() {
        // 7 + 3 + 32 = 42, plus 1 + 100 + 32 = 133
        let long = "v".repeat(100);
        let list = fields(&[(":status", "200"), ("x", long.as_str())]);
        assert!(matches!(
            validate_response(list.clone(), 174),
            Err(Error::HeaderListTooLarge { size: 175, limit: 174 })
        ));
        assert!(validate_response(list, 175).is_ok());

        // Oversized wins even over a missing status
        let list = fields(&[("x", long.as_str())]);
        assert!(matches!(
            validate_response(list, 10),
            Err(Error::HeaderListTooLarge { .. })
        ));
    }

    #[test]
    fn test_validate_trailers() {
        let trailers = validate_trailers(fields(&[("grpc-status", "0")]), 65536).unwrap();
        assert_eq!(trailers.get("grpc-status"), Some("0"));

        assert!(matches!(
            validate_trailers(fields(&[(":status", "200")]), 65536),
            Err(Error::StatusInTrailers)
        ));
        assert!(matches!(
            validate_trailers(fields(&[(":authority", "x")]), 65536),
            Err(Error::UnexpectedPseudoHeader(_))
        ));
    }
}
