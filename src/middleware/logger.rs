//! Request logging stage.

use std::time::Instant;

use chrono::{Local, SecondsFormat};
use tracing::info;

use super::Middleware;
use crate::handler::{BoxFuture, BoxedHandler, Handler};
use crate::recorder::StatusRecorder;
use crate::request::Request;
use crate::response::ResponseSink;

struct Logger {
    next: BoxedHandler,
}

impl Handler for Logger {
    fn serve<'a>(&'a self, req: &'a mut Request, res: &'a mut dyn ResponseSink) -> BoxFuture<'a> {
        Box::pin(async move {
            let started_at = Local::now();
            let started = Instant::now();

            let mut recorder = StatusRecorder::new(res);
            let result = self.next.serve(req, &mut recorder).await;

            info!(
                target: "layercake::access",
                start = %started_at.to_rfc3339_opts(SecondsFormat::Secs, false),
                status = recorder.outcome(&result).as_u16(),
                duration = ?started.elapsed(),
                host = req.host(),
                method = %req.method(),
                path = req.path(),
                "request"
            );
            result
        })
    }
}

/// Emits one `tracing` event per request: start time, status, duration,
/// host, method and path.
///
/// Errors from the next stage are returned as they are. If nothing was
/// written before the error, the logged status is 500, which is what the
/// server will send.
pub fn logger() -> Middleware {
    Middleware::new(|next| Logger { next }.boxed())
}
