//! `X-XSS-Protection` stage.

use http::header::X_XSS_PROTECTION;
use http::HeaderValue;

use super::Middleware;
use crate::handler::{BoxFuture, BoxedHandler, Handler};
use crate::request::Request;
use crate::response::ResponseSink;

struct Xss {
    next: BoxedHandler,
}

impl Handler for Xss {
    fn serve<'a>(&'a self, req: &'a mut Request, res: &'a mut dyn ResponseSink) -> BoxFuture<'a> {
        res.headers_mut()
            .insert(X_XSS_PROTECTION, HeaderValue::from_static("1; mode=block"));
        self.next.serve(req, res)
    }
}

pub fn xss() -> Middleware {
    Middleware::new(|next| Xss { next }.boxed())
}
