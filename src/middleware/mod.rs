//! Middleware layer.
//!
//! A middleware takes "the next handler" and returns a new handler that runs
//! its own logic around it. Middleware is the right place for cross-cutting
//! concerns; the built-in stages are:
//!
//! | Stage | Constructor | Effect |
//! |---|---|---|
//! | compression | [`compression()`] | gzip body when the client accepts it |
//! | no-cache | [`no_cache()`] | `Cache-Control` / `Pragma` / `Expires` |
//! | XSS | [`xss()`] | `X-XSS-Protection: 1; mode=block` |
//! | CSP | [`Csp::middleware`] | `Content-Security-Policy[-Report-Only]` |
//! | logging | [`logger()`] | one structured line per request |
//! | recovery | [`recovery()`] | panic → `500` |
//! | recovery + report | [`recover_and_log`] | panic → `500` + file / remote report |
//! | metrics | [`Monitor::middleware`](crate::Monitor::middleware) | per-status counters |
//!
//! Writing your own is a struct implementing [`Handler`](crate::Handler)
//! plus a [`Middleware::new`] closure that builds it:
//!
//! ```rust
//! use layercake::middleware::Middleware;
//! use layercake::{BoxFuture, BoxedHandler, Handler, Request, ResponseSink};
//!
//! struct PoweredBy { next: BoxedHandler }
//!
//! impl Handler for PoweredBy {
//!     fn serve<'a>(&'a self, req: &'a mut Request, res: &'a mut dyn ResponseSink) -> BoxFuture<'a> {
//!         res.headers_mut().insert("x-powered-by", http::HeaderValue::from_static("layercake"));
//!         self.next.serve(req, res)
//!     }
//! }
//!
//! let powered_by = Middleware::new(|next| PoweredBy { next }.boxed());
//! ```

use std::fmt;
use std::sync::Arc;

use crate::handler::BoxedHandler;

mod compression;
mod csp;
mod logger;
mod no_cache;
mod recover_log;
mod recovery;
mod xss;

pub use compression::{compression, compression_with_level};
pub use csp::{Csp, CspOptions};
pub use logger::logger;
pub use no_cache::no_cache;
pub use recover_log::recover_and_log;
pub use recovery::recovery;
pub use xss::xss;

pub(crate) use recovery::{panic_message, prepare_fault};

/// A stage constructor: `(next) -> handler`.
///
/// Cloning is cheap (one `Arc`), which is what lets [`Chain::append`]
/// share middlewares between the original chain and the derived one.
///
/// [`Chain::append`]: crate::Chain::append
#[derive(Clone)]
pub struct Middleware(Arc<dyn Fn(BoxedHandler) -> BoxedHandler + Send + Sync>);

impl Middleware {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(BoxedHandler) -> BoxedHandler + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Wraps `next`, returning the composed handler.
    pub fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        (self.0)(next)
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Middleware(..)")
    }
}
