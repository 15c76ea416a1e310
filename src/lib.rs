//! h2wire - client-side HTTP/2 connection engine
//!
//! This crate multiplexes HTTP requests over a single, already-negotiated
//! byte stream using HTTP/2 (RFC 9113), with HPACK header compression and
//! two-level flow control. TLS, TCP dialing and the HTTP/1.1 path live
//! outside the crate; see [`http::router`] for the hand-off point.

pub mod http;
