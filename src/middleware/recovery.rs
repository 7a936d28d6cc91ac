//! Panic recovery stage.
//!
//! This is the one place in the pipeline where unwinding is caught. Handler
//! failures the handler knows about travel as `Err`; what arrives here is a
//! bug, and the best we can do is answer `500` and keep the task alive.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use http::header::{CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, VARY, X_CONTENT_TYPE_OPTIONS};
use http::{HeaderValue, StatusCode};
use tracing::{error, warn};

use super::Middleware;
use crate::error::Error;
use crate::handler::{BoxFuture, BoxedHandler, Handler};
use crate::request::Request;
use crate::response::{ContentType, ResponseSink};

/// Turns a panic payload into text.
///
/// `panic!("literal")` carries a `&'static str`, `panic!("{x}")` a `String`;
/// `std::panic::panic_any` can carry anything, errors included.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(e) = payload.downcast_ref::<Error>() {
        e.to_string()
    } else if let Some(e) = payload.downcast_ref::<Box<dyn std::error::Error + Send + Sync>>() {
        e.to_string()
    } else {
        "unknown error".to_owned()
    }
}

/// Readies `res` for a fault response after a panic.
///
/// Whatever the failed handler produced is discarded if the sink allows it.
/// When it does, any `Content-Encoding` left behind belonged to that output
/// and goes too. When it does not, the bytes are already on their way and
/// the fault body can only be appended.
pub(crate) fn prepare_fault(res: &mut dyn ResponseSink, content_type: ContentType) {
    let committed = res.committed();
    let discarded = res.discard();
    if committed && !discarded {
        warn!("response already committed, fault body will be appended");
    }

    let headers = res.headers_mut();
    if discarded {
        headers.remove(CONTENT_ENCODING);
        headers.remove(VARY);
    }
    headers.remove(CONTENT_LENGTH);
    headers.insert(CONTENT_TYPE, content_type.header_value());
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    res.set_status(StatusCode::INTERNAL_SERVER_ERROR);
}

struct Recovery {
    next: BoxedHandler,
}

impl Handler for Recovery {
    fn serve<'a>(&'a self, req: &'a mut Request, res: &'a mut dyn ResponseSink) -> BoxFuture<'a> {
        Box::pin(async move {
            let outcome = AssertUnwindSafe(self.next.serve(req, res)).catch_unwind().await;
            let payload = match outcome {
                Ok(result) => return result,
                Err(payload) => payload,
            };

            let message = panic_message(payload.as_ref());
            error!(method = %req.method(), path = req.path(), panic = %message, "handler panicked");

            prepare_fault(res, ContentType::Text);
            res.write_all(format!("{message}\n").as_bytes())?;
            Ok(())
        })
    }
}

/// Catches panics from the rest of the chain and answers
/// `500 Internal Server Error` with the panic message as plain text.
pub fn recovery() -> Middleware {
    Middleware::new(|next| Recovery { next }.boxed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use crate::response::Response;
    use http::Method;

    #[allow(unreachable_code)]
    fn panicking(payload: fn() -> Box<dyn Any + Send>) -> BoxedHandler {
        handler_fn(move |_req, res| {
            Box::pin(async move {
                res.send(ContentType::Html, b"<p>half a page")?;
                std::panic::resume_unwind(payload());
                Ok::<(), Error>(())
            })
        })
        .boxed()
    }

    async fn serve(handler: BoxedHandler) -> Response {
        let mut req = Request::new(Method::GET, "/boom");
        let mut res = Response::new();
        recovery().wrap(handler).serve(&mut req, &mut res).await.unwrap();
        res
    }

    #[tokio::test]
    async fn str_panic_becomes_500() {
        let res = serve(panicking(|| Box::new("Oh No its an error"))).await;
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.body(), b"Oh No its an error\n");
        assert_eq!(res.headers()[CONTENT_TYPE], "text/plain; charset=utf-8");
        assert_eq!(res.headers()[X_CONTENT_TYPE_OPTIONS], "nosniff");
    }

    #[tokio::test]
    async fn error_payload_is_classified() {
        let res = serve(panicking(|| Box::new(Error::handler("typed failure")))).await;
        assert_eq!(res.body(), b"typed failure\n");
    }

    #[tokio::test]
    async fn unknown_payload_falls_back() {
        let res = serve(panicking(|| Box::new(42_u8))).await;
        assert_eq!(res.body(), b"unknown error\n");
    }

    #[test]
    fn string_payload() {
        let payload: Box<dyn Any + Send> = Box::new(format!("index {} out of range", 3));
        assert_eq!(panic_message(payload.as_ref()), "index 3 out of range");
    }
}
