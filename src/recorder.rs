//! Status-capturing response decorator.
//!
//! A `ResponseSink` has no getter for "what status went out?", and it should
//! not: the answer depends on whether anything was written yet. Stages that
//! need the answer (logging, metrics) put a [`StatusRecorder`] in front of
//! the next stage and read it back once the next stage returns.

use std::io;

use http::{HeaderMap, StatusCode};

use crate::error::Error;
use crate::response::ResponseSink;

/// Wraps a sink and remembers the status and byte count that passed through.
///
/// - An explicit [`set_status`](ResponseSink::set_status) is recorded and
///   forwarded. Before the first write, a later call overwrites an earlier
///   one.
/// - The first write records `200 OK` if no status was set.
/// - After the first write the recorded status never changes.
///
/// Bytes are forwarded immediately; nothing is buffered here.
pub struct StatusRecorder<'a> {
    inner: &'a mut dyn ResponseSink,
    status: Option<StatusCode>,
    written: bool,
    bytes: u64,
}

impl<'a> StatusRecorder<'a> {
    pub fn new(inner: &'a mut dyn ResponseSink) -> Self {
        Self { inner, status: None, written: false, bytes: 0 }
    }

    /// The captured status, `200 OK` if the handler never chose one.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    /// `true` if a status was set explicitly or a write happened.
    pub fn has_status(&self) -> bool {
        self.status.is_some()
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    /// The status the client ends up seeing once the next stage returned
    /// `result`. An error with nothing committed goes out as a 500.
    pub fn outcome(&self, result: &Result<(), Error>) -> StatusCode {
        if result.is_err() && !self.committed() {
            StatusCode::INTERNAL_SERVER_ERROR
        } else {
            self.status()
        }
    }
}

impl ResponseSink for StatusRecorder<'_> {
    fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    fn set_status(&mut self, status: StatusCode) {
        if !self.written {
            self.status = Some(status);
        }
        self.inner.set_status(status);
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.written {
            self.written = true;
            self.status.get_or_insert(StatusCode::OK);
        }
        let n = self.inner.write(buf)?;
        self.bytes += n as u64;
        Ok(n)
    }

    fn committed(&self) -> bool {
        self.inner.committed()
    }

    fn discard(&mut self) -> bool {
        if !self.inner.discard() {
            return false;
        }
        self.status = None;
        self.written = false;
        self.bytes = 0;
        true
    }
}
