//! gzip response compression.
//!
//! The stage compresses when the client lists `gzip` in `Accept-Encoding` and
//! the response does not already carry a `Content-Encoding`. Encoders are
//! expensive to set up (the deflate state is a few hundred KiB), so they are
//! kept in a pool shared by every handler one [`compression()`] middleware
//! wraps, reset between responses, and handed back afterwards.
//!
//! The gzip member is framed by hand around a raw deflate stream: that is
//! what lets a pooled encoder be reset onto a fresh output buffer instead of
//! being rebuilt.
//!
//! No member is emitted when the next stage fails before writing, or when a
//! later stage discards the response: the encoding headers are withdrawn and
//! the response goes out uncompressed.

use std::io::{self, Write};
use std::sync::Arc;

use flate2::write::DeflateEncoder;
use flate2::{Compression, Crc};
use http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, VARY};
use http::{HeaderMap, HeaderValue, StatusCode};
use parking_lot::Mutex;
use tracing::debug;

use super::Middleware;
use crate::handler::{BoxFuture, BoxedHandler, Handler};
use crate::request::Request;
use crate::response::ResponseSink;

/// Magic, CM = deflate, no flags, no mtime, no extra flags, OS = unknown.
const GZIP_HEADER: [u8; 10] = [0x1f, 0x8b, 0x08, 0x00, 0, 0, 0, 0, 0x00, 0xff];

/// Encoders kept ready up front.
const PREFILL: usize = 4;
/// Idle encoders kept beyond that are dropped on return.
const MAX_IDLE: usize = 64;

// ── Encoder pool ──────────────────────────────────────────────────────────────

struct EncoderPool {
    level: Compression,
    idle: Mutex<Vec<DeflateEncoder<Vec<u8>>>>,
}

impl EncoderPool {
    fn new(level: Compression) -> Self {
        let idle = (0..PREFILL).map(|_| DeflateEncoder::new(Vec::new(), level)).collect();
        Self { level, idle: Mutex::new(idle) }
    }

    fn checkout(&self) -> DeflateEncoder<Vec<u8>> {
        self.idle
            .lock()
            .pop()
            .unwrap_or_else(|| DeflateEncoder::new(Vec::new(), self.level))
    }

    /// Takes an encoder back. It must have been finished; `reset` rewinds its
    /// deflate state onto an empty buffer.
    fn checkin(&self, mut encoder: DeflateEncoder<Vec<u8>>) {
        if let Err(e) = encoder.reset(Vec::new()) {
            debug!("dropping encoder that failed to reset: {e}");
            return;
        }
        let mut idle = self.idle.lock();
        if idle.len() < MAX_IDLE {
            idle.push(encoder);
        }
    }
}

// ── gzip sink ─────────────────────────────────────────────────────────────────

/// Routes body writes through a deflate encoder into the wrapped sink.
struct GzipSink<'a> {
    inner: &'a mut dyn ResponseSink,
    encoder: DeflateEncoder<Vec<u8>>,
    crc: Crc,
    started: bool,
    // Set once encoding is given up; writes then go to `inner` untouched.
    bypass: bool,
}

impl<'a> GzipSink<'a> {
    fn new(inner: &'a mut dyn ResponseSink, encoder: DeflateEncoder<Vec<u8>>) -> Self {
        Self { inner, encoder, crc: Crc::new(), started: false, bypass: false }
    }

    /// Stops encoding and withdraws the headers announcing it.
    fn abandon(&mut self) {
        self.bypass = true;
        let headers = self.inner.headers_mut();
        headers.remove(CONTENT_ENCODING);
        headers.remove(VARY);
    }

    fn start(&mut self) -> io::Result<()> {
        if !self.started {
            self.started = true;
            self.inner.write_all(&GZIP_HEADER)?;
        }
        Ok(())
    }

    /// Moves whatever the encoder has produced so far into the wrapped sink.
    fn drain(&mut self) -> io::Result<()> {
        let out = std::mem::take(self.encoder.get_mut());
        if out.is_empty() {
            return Ok(());
        }
        self.inner.write_all(&out)
    }

    /// Ends the member: remaining deflate output, then CRC-32 and input size.
    /// An empty body still produces a complete, valid member.
    /// Nothing is written once the sink was abandoned.
    fn finish(mut self) -> io::Result<DeflateEncoder<Vec<u8>>> {
        if self.bypass {
            return Ok(self.encoder);
        }
        self.start()?;
        self.encoder.try_finish()?;
        self.drain()?;
        let mut trailer = [0u8; 8];
        trailer[..4].copy_from_slice(&self.crc.sum().to_le_bytes());
        trailer[4..].copy_from_slice(&self.crc.amount().to_le_bytes());
        self.inner.write_all(&trailer)?;
        Ok(self.encoder)
    }
}

impl ResponseSink for GzipSink<'_> {
    fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    fn set_status(&mut self, status: StatusCode) {
        self.inner.set_status(status);
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.bypass {
            return self.inner.write(buf);
        }
        self.start()?;
        self.crc.update(buf);
        self.encoder.write_all(buf)?;
        self.drain()?;
        Ok(buf.len())
    }

    fn committed(&self) -> bool {
        self.inner.committed()
    }

    // The half-written member goes with the discarded output; whatever is
    // written afterwards is sent as is.
    fn discard(&mut self) -> bool {
        if !self.inner.discard() {
            return false;
        }
        self.abandon();
        true
    }
}

// ── Stage ─────────────────────────────────────────────────────────────────────

fn accepts_gzip(req: &Request) -> bool {
    req.headers()
        .get_all(ACCEPT_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains("gzip"))
}

struct Gzip {
    pool: Arc<EncoderPool>,
    next: BoxedHandler,
}

impl Handler for Gzip {
    fn serve<'a>(&'a self, req: &'a mut Request, res: &'a mut dyn ResponseSink) -> BoxFuture<'a> {
        if !accepts_gzip(req) || res.headers().contains_key(CONTENT_ENCODING) {
            return self.next.serve(req, res);
        }

        Box::pin(async move {
            let headers = res.headers_mut();
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
            headers.insert(VARY, HeaderValue::from_static("Accept-Encoding"));
            headers.remove(CONTENT_LENGTH);

            let mut sink = GzipSink::new(res, self.pool.checkout());
            let result = self.next.serve(req, &mut sink).await;
            // Leave the response uncommitted so the failure can still
            // become a 500.
            if result.is_err() && !sink.started {
                sink.abandon();
            }
            let encoder = sink.finish()?;
            self.pool.checkin(encoder);
            result
        })
    }
}

/// gzip at the default level.
pub fn compression() -> Middleware {
    compression_with_level(Compression::default())
}

/// gzip at an explicit level (`Compression::fast()`, `Compression::best()`, …).
pub fn compression_with_level(level: Compression) -> Middleware {
    let pool = Arc::new(EncoderPool::new(level));
    Middleware::new(move |next| Gzip { pool: Arc::clone(&pool), next }.boxed())
}
