//! # layercake
//!
//! Composable HTTP middleware for services that sit behind a reverse proxy.
//!
//! A service is one terminal [`Handler`] wrapped in an ordered [`Chain`] of
//! [`Middleware`](middleware::Middleware) stages. Each stage runs its own logic
//! around the next one: it can touch the request on the way in, decorate the
//! response sink, and inspect the outcome on the way out.
//!
//! ## What ships
//!
//! - Chains: [`Chain::new`], [`Chain::append`] (derives, never mutates),
//!   [`ChainBuilder`] (grows in place), [`Chain::common`]
//! - Stages: gzip, no-cache, XSS filter, CSP, access logging, panic recovery
//!   (plain or with file / remote reports), per-status metrics
//! - [`StatusRecorder`]: how a stage learns which status the handler sent
//! - [`Server`]: hyper under tokio, graceful shutdown on SIGTERM / Ctrl-C
//!
//! There is no router. Bring your own, or branch in the terminal handler.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use layercake::middleware::{compression, xss};
//! use layercake::{Chain, ContentType, Error, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let app = Chain::common()
//!         .append([xss(), compression()])
//!         .then_fn(|req, res| Box::pin(async move {
//!             let greeting = format!("hello from {}", req.path());
//!             res.send(ContentType::Text, greeting.as_bytes())?;
//!             Ok::<(), Error>(())
//!         }));
//!
//!     Server::bind(([0, 0, 0, 0], 3000)).serve(app).await
//! }
//! ```

mod chain;
mod config;
mod error;
mod handler;
mod monitor;
mod recorder;
mod report;
mod request;
mod response;
mod server;

pub mod middleware;

pub use chain::{Chain, ChainBuilder};
pub use config::{ReportConfig, SharedConfig, DEFAULT_CONFIG_PATH};
pub use error::{Error, Result};
pub use handler::{handler_fn, not_found, BoxFuture, BoxedHandler, Handler, HandlerFn, NotFound};
pub use monitor::{Monitor, MonitorData};
pub use recorder::StatusRecorder;
pub use report::{daily_log_path, ErrorReport, Reporter, STACK_LIMIT};
pub use request::Request;
pub use response::{ContentType, Response, ResponseSink};
pub use server::Server;
