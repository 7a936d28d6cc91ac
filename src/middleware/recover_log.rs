//! Panic recovery with reporting.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::json;
use tracing::error;

use super::{panic_message, prepare_fault, Middleware};
use crate::handler::{BoxFuture, BoxedHandler, Handler};
use crate::report::Reporter;
use crate::request::Request;
use crate::response::{ContentType, ResponseSink};

struct RecoverAndLog {
    reporter: Arc<Reporter>,
    next: BoxedHandler,
}

impl Handler for RecoverAndLog {
    fn serve<'a>(&'a self, req: &'a mut Request, res: &'a mut dyn ResponseSink) -> BoxFuture<'a> {
        Box::pin(async move {
            let outcome = AssertUnwindSafe(self.next.serve(req, res)).catch_unwind().await;
            let payload = match outcome {
                Ok(result) => return result,
                Err(payload) => payload,
            };

            let message = panic_message(payload.as_ref());
            error!(method = %req.method(), path = req.path(), panic = %message, "handler panicked");

            // Delivery runs on its own task; the client does not wait for it.
            let report = self.reporter.report(req, &message);
            drop(self.reporter.push(report));

            prepare_fault(res, ContentType::Json);
            let body = serde_json::to_vec(&json!({ "error": format!("PANIC deferred: {message}") }))?;
            res.write_all(&body)?;
            Ok(())
        })
    }
}

/// Like [`recovery()`](super::recovery), and also hands an
/// [`ErrorReport`](crate::ErrorReport) of every panic to `reporter`.
///
/// The response is `500` with a JSON body:
///
/// ```text
/// {"error":"PANIC deferred: <message>"}
/// ```
pub fn recover_and_log(reporter: Arc<Reporter>) -> Middleware {
    Middleware::new(move |next| {
        RecoverAndLog {
            reporter: Arc::clone(&reporter),
            next,
        }
        .boxed()
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Local;
    use http::header::{CONTENT_ENCODING, CONTENT_TYPE};
    use http::{HeaderValue, Method, StatusCode};

    use super::*;
    use crate::config::{ReportConfig, SharedConfig};
    use crate::error::Error;
    use crate::handler::handler_fn;
    use crate::report::{daily_log_path, ErrorReport};
    use crate::response::Response;

    #[allow(unreachable_code)]
    fn exploding() -> BoxedHandler {
        handler_fn(|_req, res| {
            Box::pin(async move {
                res.headers_mut().insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
                res.write_all(b"partial")?;
                panic!("Oh No its an error");
                Ok::<(), Error>(())
            })
        })
        .boxed()
    }

    #[tokio::test]
    async fn answers_json_500() {
        let reporter = Reporter::new(SharedConfig::fixed(ReportConfig::default())).unwrap();
        let handler = recover_and_log(reporter).wrap(exploding());
        let mut req = Request::new(Method::GET, "/");
        let mut res = Response::new();
        handler.serve(&mut req, &mut res).await.unwrap();

        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.headers()[CONTENT_TYPE], "application/json");
        assert!(res.headers().get(CONTENT_ENCODING).is_none());
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["error"], "PANIC deferred: Oh No its an error");
    }

    #[tokio::test]
    async fn panic_is_written_to_daily_file() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("panic-").to_string_lossy().into_owned();
        let reporter = Reporter::new(SharedConfig::fixed(ReportConfig {
            is_log_enabled: true,
            log_path: prefix.clone(),
            agent: "checkout".to_owned(),
            ..ReportConfig::default()
        })).unwrap();
        let handler = recover_and_log(reporter).wrap(exploding());
        let mut req = Request::new(Method::POST, "/pay?retry=1").with_body("amount=10");
        let mut res = Response::new();
        handler.serve(&mut req, &mut res).await.unwrap();

        let path = daily_log_path(&prefix, Local::now().date_naive());
        let mut written = String::new();
        for _ in 0..200 {
            written = std::fs::read_to_string(&path).unwrap_or_default();
            if written.ends_with('\n') {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let report: ErrorReport = serde_json::from_str(written.trim_end()).unwrap();
        assert_eq!(report.agent, "checkout");
        assert_eq!(report.api, "/pay?retry=1");
        assert_eq!(report.method, "POST");
        assert_eq!(report.body, "amount=10");
        assert_eq!(report.panic, "Oh No its an error");
    }

    #[tokio::test]
    async fn healthy_requests_pass_through() {
        let reporter = Reporter::new(SharedConfig::fixed(ReportConfig::default())).unwrap();
        let ok = handler_fn(|_req, res| {
            Box::pin(async move {
                res.send(ContentType::Text, b"fine")?;
                Ok::<(), Error>(())
            })
        })
        .boxed();
        let handler = recover_and_log(reporter).wrap(ok);
        let mut req = Request::new(Method::GET, "/");
        let mut res = Response::new();
        handler.serve(&mut req, &mut res).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.body(), b"fine");
    }
}
