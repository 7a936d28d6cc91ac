//! Handler trait and type erasure.
//!
//! # How handlers are stored
//!
//! A chain is a stack of handlers of *different* concrete types, each one
//! owning the next. Rust can only nest those uniformly through **trait
//! objects**, so every stage and every terminal handler is stored as a
//! [`BoxedHandler`] (`Arc<dyn Handler>`):
//!
//! ```text
//! Chain::new([no_cache(), logger()]).then(app)
//!        ↓
//! NoCache { next: Logger { next: app } }           ← Arc<dyn Handler> each
//!        ↓  handler.serve(&mut req, &mut res)
//! NoCache::serve → Logger::serve → app.serve       ← one vtable call per stage
//! ```
//!
//! `serve` borrows the request and the sink for the lifetime of the returned
//! future. That is what lets a stage wrap the sink in its own decorator,
//! await the next stage, and then read the decorator back.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use http::StatusCode;

use crate::error::Error;
use crate::request::Request;
use crate::response::{ContentType, ResponseSink};

/// A heap-allocated, type-erased future borrowing the request and the sink.
///
/// `Send` lets tokio move the connection task across worker threads.
pub type BoxFuture<'a> = Pin<Box<dyn Future<Output = Result<(), Error>> + Send + 'a>>;

/// A heap-allocated, type-erased handler shared across concurrent requests.
///
/// `Arc` makes composing cheap: wrapping a handler clones a pointer, never
/// the handler.
pub type BoxedHandler = Arc<dyn Handler>;

/// Anything that can answer a request: a terminal application handler or a
/// middleware stage wrapping another handler.
///
/// Implement it on a struct for stages; use [`handler_fn`] for closures.
///
/// ```rust
/// use layercake::{BoxFuture, Handler, Request, ResponseSink, ContentType};
///
/// struct Hello;
///
/// impl Handler for Hello {
///     fn serve<'a>(&'a self, _req: &'a mut Request, res: &'a mut dyn ResponseSink) -> BoxFuture<'a> {
///         Box::pin(async move {
///             res.send(ContentType::Text, b"hello")?;
///             Ok(())
///         })
///     }
/// }
/// ```
pub trait Handler: Send + Sync + 'static {
    fn serve<'a>(&'a self, req: &'a mut Request, res: &'a mut dyn ResponseSink) -> BoxFuture<'a>;

    /// Moves the handler behind an `Arc`.
    fn boxed(self) -> BoxedHandler
    where
        Self: Sized,
    {
        Arc::new(self)
    }
}

// ── Closure handlers ──────────────────────────────────────────────────────────

/// Newtype wrapper that lets a closure act as a [`Handler`].
pub struct HandlerFn<F>(F);

/// Turns a closure into a handler.
///
/// The closure must return a boxed future borrowing its arguments. Spell
/// the error type out in the final `Ok` so `?` knows what to convert into:
///
/// ```rust
/// use layercake::{handler_fn, ContentType, Error, ResponseSink};
///
/// let hello = handler_fn(|_req, res| Box::pin(async move {
///     res.send(ContentType::Text, b"hello")?;
///     Ok::<(), Error>(())
/// }));
/// ```
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: for<'a> Fn(&'a mut Request, &'a mut dyn ResponseSink) -> BoxFuture<'a> + Send + Sync + 'static,
{
    HandlerFn(f)
}

impl<F> Handler for HandlerFn<F>
where
    F: for<'a> Fn(&'a mut Request, &'a mut dyn ResponseSink) -> BoxFuture<'a> + Send + Sync + 'static,
{
    fn serve<'a>(&'a self, req: &'a mut Request, res: &'a mut dyn ResponseSink) -> BoxFuture<'a> {
        (self.0)(req, res)
    }
}

// ── Default terminal ──────────────────────────────────────────────────────────

/// The terminal used when a chain is finished without one.
///
/// There is no router in layercake, so the default behaves like an empty
/// route table: every request gets `404 Not Found`.
pub struct NotFound;

impl Handler for NotFound {
    fn serve<'a>(&'a self, _req: &'a mut Request, res: &'a mut dyn ResponseSink) -> BoxFuture<'a> {
        Box::pin(async move {
            res.set_status(StatusCode::NOT_FOUND);
            res.send(ContentType::Text, b"404 page not found\n")?;
            Ok(())
        })
    }
}

/// A shared [`NotFound`] handler.
pub fn not_found() -> BoxedHandler {
    NotFound.boxed()
}
