//! Outgoing response: the [`ResponseSink`] abstraction and the buffered
//! [`Response`] the server hands to the pipeline.
//!
//! Stages never see a concrete response type. They see `&mut dyn
//! ResponseSink`, which lets any stage slip its own decorator (a status
//! recorder, a gzip encoder) between itself and the next stage without the
//! rest of the chain noticing.

use std::io;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, StatusCode};
use http_body_util::Full;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Content-type values the built-in stages emit.
#[derive(Clone, Copy, Debug)]
pub enum ContentType {
    Html,  // text/html; charset=utf-8
    Json,  // application/json
    Text,  // text/plain; charset=utf-8
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Html => "text/html; charset=utf-8",
            Self::Json => "application/json",
            Self::Text => "text/plain; charset=utf-8",
        }
    }

    pub fn header_value(self) -> HeaderValue {
        HeaderValue::from_static(self.as_str())
    }
}

// ── ResponseSink ──────────────────────────────────────────────────────────────

/// Where a handler writes its response.
///
/// The model is the classic streaming one: headers are mutable until the
/// response is sent, the status may be set explicitly, and body bytes are
/// written in order. The first body write *commits* the status; a sink that
/// was never given one answers `200 OK`.
///
/// Decorators must forward every method to the sink they wrap.
pub trait ResponseSink: Send {
    fn headers(&self) -> &HeaderMap;

    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Sets the status. Calls after the first body write are ignored.
    fn set_status(&mut self, status: StatusCode);

    /// Writes body bytes and returns how many were accepted.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// `true` once body bytes have been written.
    fn committed(&self) -> bool;

    /// Throws away status and body produced so far, if the sink still can.
    ///
    /// Returns `false` when the bytes are already out of reach (streamed, or
    /// folded into an encoder's state). Headers are kept either way.
    fn discard(&mut self) -> bool {
        false
    }

    fn write_all(&mut self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.write(buf)? {
                0 => return Err(io::ErrorKind::WriteZero.into()),
                n => buf = buf.get(n..).unwrap_or_default(),
            }
        }
        Ok(())
    }

    /// Sets `Content-Type` and writes `body`. Convenience for terminal
    /// handlers.
    fn send(&mut self, content_type: ContentType, body: &[u8]) -> io::Result<()> {
        self.headers_mut().insert(CONTENT_TYPE, content_type.header_value());
        self.write_all(body)
    }
}

// ── Response ─────────────────────────────────────────────────────────────────

/// The buffered response sink.
///
/// Collects headers, status and body in memory; the server converts it into
/// a hyper response once the composed handler returns. Because nothing has
/// left the process yet, [`discard`](ResponseSink::discard) always succeeds.
#[derive(Debug, Default)]
pub struct Response {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: Vec<u8>,
    committed: bool,
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    /// The status that will be sent: the one set explicitly, else `200 OK`.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_inner(self) -> http::Response<Full<Bytes>> {
        let status = self.status();
        let mut response = http::Response::new(Full::new(Bytes::from(self.body)));
        *response.status_mut() = status;
        *response.headers_mut() = self.headers;
        response
    }
}

impl ResponseSink for Response {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn set_status(&mut self, status: StatusCode) {
        if self.committed {
            tracing::debug!(%status, "status set after body write, ignored");
            return;
        }
        self.status = Some(status);
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.committed = true;
        self.body.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn committed(&self) -> bool {
        self.committed
    }

    fn discard(&mut self) -> bool {
        self.status = None;
        self.body.clear();
        self.committed = false;
        true
    }
}
