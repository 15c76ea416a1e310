//! HTTP/2 request and response messages

use super::error::{Error, Result};
use crate::http::headers::Headers;
use bytes::Bytes;
use url::Url;

/// Headers that are meaningful only for a single HTTP/1.1 hop
/// (RFC 9113 Section 8.2.2)
const CONNECTION_SPECIFIC_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
];

/// HTTP/2 request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct H2Request {
    method: String,
    scheme: String,
    authority: String,
    path: String,
    headers: Headers,
    body: Bytes,
}

impl H2Request {
    /// Start building a request
    pub fn builder() -> H2RequestBuilder {
        H2RequestBuilder::new()
    }

    /// A bodiless GET for an absolute `http` or `https` URL
    pub fn get(url: &str) -> Result<Self> {
        H2Request::builder().uri(url)?.build()
    }

    /// Get method
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Get scheme
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Get authority
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Get path (including query)
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Get headers
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Get body
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The header list sent on the wire
    ///
    /// Pseudo-headers come first. Regular names are lower-cased,
    /// connection-specific headers and `host` are dropped, `te` survives
    /// only as `trailers`, and `content-length` is added for a non-empty body
    /// that does not carry one.
    pub fn header_list(&self) -> Vec<(String, String)> {
        let mut list = Vec::with_capacity(self.headers.len() + 5);
        list.push((":method".to_string(), self.method.clone()));
        list.push((":scheme".to_string(), self.scheme.clone()));
        list.push((":authority".to_string(), self.authority.clone()));
        list.push((":path".to_string(), self.path.clone()));

        for (name, value) in self.headers.iter() {
            let name = name.to_ascii_lowercase();
            if name == "host" || CONNECTION_SPECIFIC_HEADERS.contains(&name.as_str()) {
                continue;
            }
            if name == "te" {
                if value.trim().eq_ignore_ascii_case("trailers") {
                    list.push((name, "trailers".to_string()));
                }
                continue;
            }
            list.push((name, value.to_string()));
        }

        if !self.body.is_empty() && !self.headers.contains("content-length") {
            list.push(("content-length".to_string(), self.body.len().to_string()));
        }

        list
    }
}

/// Builder for HTTP/2 requests
#[derive(Debug, Clone)]
pub struct H2RequestBuilder {
    method: String,
    scheme: String,
    authority: Option<String>,
    path: String,
    headers: Headers,
    body: Bytes,
}

impl H2RequestBuilder {
    /// Create a builder for `GET https://<authority>/`
    pub fn new() -> Self {
        H2RequestBuilder {
            method: "GET".to_string(),
            scheme: "https".to_string(),
            authority: None,
            path: "/".to_string(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Set method
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Set scheme, authority and path from an absolute URL
    ///
    /// The fragment is never sent, and a URL carrying userinfo is rejected
    /// since `:authority` must not contain it (RFC 9113 Section 8.3.1).
    pub fn uri(mut self, url: &str) -> Result<Self> {
        let parsed = Url::parse(url).map_err(|e| Error::InvalidRequest(format!("{}: {}", e, url)))?;

        let scheme = parsed.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(Error::InvalidRequest(format!("unsupported scheme: {}", scheme)));
        }
        if !parsed.username().is_empty() || parsed.password().is_some() {
            return Err(Error::InvalidRequest(format!("userinfo not allowed: {}", url)));
        }
        let host = match parsed.host_str() {
            Some(host) if !host.is_empty() => host,
            _ => return Err(Error::InvalidRequest(format!("missing authority: {}", url))),
        };

        self.authority = Some(match parsed.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        });
        self.path = match parsed.query() {
            Some(query) => format!("{}?{}", parsed.path(), query),
            None => parsed.path().to_string(),
        };
        self.scheme = scheme.to_string();
        Ok(self)
    }

    /// Set scheme
    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Set authority (`host[:port]`)
    pub fn authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = Some(authority.into());
        self
    }

    /// Set path (including query)
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Add a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set body
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Build the request
    pub fn build(self) -> Result<H2Request> {
        if self.method.is_empty() || !self.method.bytes().all(is_token_byte) {
            return Err(Error::InvalidRequest(format!("invalid method {:?}", self.method)));
        }
        let authority = self
            .authority
            .filter(|a| !a.is_empty())
            .ok_or_else(|| Error::InvalidRequest("missing authority".to_string()))?;
        if authority.contains('@') {
            return Err(Error::InvalidRequest(format!("userinfo in authority {:?}", authority)));
        }
        if self.path.is_empty() {
            return Err(Error::InvalidRequest("empty path".to_string()));
        }

        for (name, value) in self.headers.iter() {
            if name.is_empty() || !name.bytes().all(is_token_byte) {
                return Err(Error::InvalidHeader(format!("invalid header name {:?}", name)));
            }
            if value.bytes().any(|b| b == b'\r' || b == b'\n' || b == 0) {
                return Err(Error::InvalidHeader(format!("invalid value for header {}", name)));
            }
        }

        Ok(H2Request {
            method: self.method,
            scheme: self.scheme,
            authority,
            path: self.path,
            headers: self.headers,
            body: self.body,
        })
    }
}

impl Default for H2RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// RFC 9110 `tchar`
fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

/// HTTP/2 response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct H2Response {
    stream_id: u32,
    status: u16,
    headers: Headers,
    trailers: Option<Headers>,
    body: Bytes,
}

impl H2Response {
    /// Create a response
    pub fn new(stream_id: u32, status: u16, headers: Headers, trailers: Option<Headers>, body: Bytes) -> Self {
        H2Response {
            stream_id,
            status,
            headers,
            trailers,
            body,
        }
    }

    /// Stream the response arrived on
    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// Get status code
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Get headers
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Get a header value
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Trailing headers, if the peer sent any
    pub fn trailers(&self) -> Option<&Headers> {
        self.trailers.as_ref()
    }

    /// Get body
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Get body as string
    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    /// Consume the response, returning the body
    pub fn into_body(self) -> Bytes {
        self.body
    }
}
