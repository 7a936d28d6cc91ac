//! Middleware chains.
//!
//! A [`Chain`] is an ordered list of [`Middleware`]. Finishing it with a
//! terminal handler nests the middlewares so the *first* one listed is the
//! *outermost*: it sees the request first and the response last.
//!
//! ```text
//! Chain::new([a, b]).then(t)
//!
//!   a ──► b ──► t
//!   a ◄── b ◄── t
//! ```
//!
//! Two ways to grow a chain, kept apart on purpose:
//!
//! - [`Chain::append`] derives a *new* chain; the original is untouched.
//! - [`ChainBuilder`] grows *in place*; call [`ChainBuilder::build`] when done.

use std::sync::Arc;

use crate::handler::{handler_fn, not_found, BoxFuture, BoxedHandler, Handler};
use crate::middleware::{self, Middleware};
use crate::request::Request;
use crate::response::ResponseSink;

/// An immutable, ordered sequence of middlewares.
#[derive(Clone, Debug, Default)]
pub struct Chain {
    middlewares: Arc<[Middleware]>,
}

impl Chain {
    /// Builds a chain from an ordered list. The first item ends up outermost.
    ///
    /// ```rust
    /// use layercake::Chain;
    /// use layercake::middleware::{no_cache, recovery, logger};
    ///
    /// let chain = Chain::new([no_cache(), recovery(), logger()]);
    /// assert_eq!(chain.len(), 3);
    /// ```
    pub fn new(middlewares: impl IntoIterator<Item = Middleware>) -> Self {
        Self { middlewares: middlewares.into_iter().collect() }
    }

    /// The default bundle: no-cache headers, panic recovery, request logging.
    pub fn common() -> Self {
        Self::new([middleware::no_cache(), middleware::recovery(), middleware::logger()])
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Composes the chain around `handler`.
    ///
    /// Middlewares are applied last-to-first, so `middlewares[0]` wraps
    /// everything else. An empty chain hands `handler` back as is.
    pub fn then(&self, handler: BoxedHandler) -> BoxedHandler {
        self.middlewares
            .iter()
            .rev()
            .fold(handler, |next, middleware| middleware.wrap(next))
    }

    /// Like [`then`](Self::then), for a closure terminal.
    pub fn then_fn<F>(&self, f: F) -> BoxedHandler
    where
        F: for<'a> Fn(&'a mut Request, &'a mut dyn ResponseSink) -> BoxFuture<'a> + Send + Sync + 'static,
    {
        self.then(handler_fn(f).boxed())
    }

    /// Composes the chain around the default terminal, [`NotFound`].
    ///
    /// [`NotFound`]: crate::handler::NotFound
    pub fn then_default(&self) -> BoxedHandler {
        self.then(not_found())
    }

    /// Returns a new chain: this one followed by `more`.
    ///
    /// `self` is not modified; handlers composed from it later still get the
    /// original sequence.
    pub fn append(&self, more: impl IntoIterator<Item = Middleware>) -> Self {
        Self {
            middlewares: self.middlewares.iter().cloned().chain(more).collect(),
        }
    }

    /// A mutable builder seeded with this chain's middlewares.
    pub fn to_builder(&self) -> ChainBuilder {
        ChainBuilder { middlewares: self.middlewares.to_vec() }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Middleware> {
        self.middlewares.iter()
    }
}

/// Grows a chain in place.
///
/// ```rust
/// use layercake::ChainBuilder;
/// use layercake::middleware::{compression, xss};
///
/// let mut builder = ChainBuilder::new();
/// builder.push(xss());
/// if cfg!(not(debug_assertions)) {
///     builder.push(compression());
/// }
/// let chain = builder.build();
/// ```
#[derive(Clone, Debug, Default)]
pub struct ChainBuilder {
    middlewares: Vec<Middleware>,
}

impl ChainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, middleware: Middleware) -> &mut Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn extend(&mut self, more: impl IntoIterator<Item = Middleware>) -> &mut Self {
        self.middlewares.extend(more);
        self
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    pub fn build(self) -> Chain {
        Chain::new(self.middlewares)
    }
}

impl From<ChainBuilder> for Chain {
    fn from(builder: ChainBuilder) -> Self {
        builder.build()
    }
}
