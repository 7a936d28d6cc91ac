//! Incoming HTTP request type.

use std::net::SocketAddr;

use bytes::Bytes;
use http::header::{HOST, REFERER};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Uri};
use serde::de::DeserializeOwned;

use crate::error::Error;

/// An incoming HTTP request with its body already buffered.
///
/// Stages receive `&mut Request`, so they can inspect or rewrite headers
/// before handing the request further down the chain.
#[derive(Clone, Debug)]
pub struct Request {
    pub(crate) method: Method,
    pub(crate) uri: Uri,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
    pub(crate) remote_addr: Option<SocketAddr>,
}

impl Request {
    /// A request with no headers and an empty body.
    ///
    /// A `uri` that does not parse is replaced by `/`.
    ///
    /// Mostly useful for driving a composed handler in tests:
    ///
    /// ```rust
    /// use layercake::Request;
    /// use http::Method;
    ///
    /// let req = Request::new(Method::GET, "http://example.foo/")
    ///     .with_header("accept-encoding", "gzip");
    /// assert_eq!(req.host(), "example.foo");
    /// ```
    pub fn new(method: Method, uri: impl AsRef<str>) -> Self {
        let uri = uri.as_ref().parse().unwrap_or_else(|_| Uri::from_static("/"));
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            remote_addr: None,
        }
    }

    pub(crate) fn from_parts(
        parts: http::request::Parts,
        body: Bytes,
        remote_addr: Option<SocketAddr>,
    ) -> Self {
        Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
            remote_addr,
        }
    }

    /// Adds a header. Names or values that are not valid HTTP are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn path(&self) -> &str { self.uri.path() }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }
    pub fn body(&self) -> &[u8] { &self.body }
    pub fn remote_addr(&self) -> Option<SocketAddr> { self.remote_addr }

    /// Path plus query string, the way it appeared on the request line.
    pub fn request_uri(&self) -> &str {
        self.uri.path_and_query().map_or("/", |pq| pq.as_str())
    }

    /// The `Host` header, falling back to the URI authority (HTTP/2 and
    /// absolute-form requests).
    pub fn host(&self) -> &str {
        self.header(HOST.as_str())
            .or_else(|| self.uri.authority().map(|a| a.as_str()))
            .unwrap_or_default()
    }

    pub fn referer(&self) -> &str {
        self.header(REFERER.as_str()).unwrap_or_default()
    }

    /// Case-insensitive header lookup. Values that are not visible ASCII
    /// read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Decodes the buffered body as JSON. The body stays in place, so a later
    /// stage (or a panic report) can still read it.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}
