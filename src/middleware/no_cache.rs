//! `Cache-Control: no-cache` stage.

use http::header::{CACHE_CONTROL, EXPIRES, PRAGMA};
use http::HeaderValue;

use super::Middleware;
use crate::handler::{BoxFuture, BoxedHandler, Handler};
use crate::request::Request;
use crate::response::ResponseSink;

struct NoCache {
    next: BoxedHandler,
}

impl Handler for NoCache {
    fn serve<'a>(&'a self, req: &'a mut Request, res: &'a mut dyn ResponseSink) -> BoxFuture<'a> {
        let headers = res.headers_mut();
        headers.insert(
            CACHE_CONTROL,
            HeaderValue::from_static("max-age=0, no-cache, no-store, must-revalidate"),
        );
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        headers.insert(EXPIRES, HeaderValue::from_static("0"));
        self.next.serve(req, res)
    }
}

/// Tells browsers and proxies not to cache the response.
pub fn no_cache() -> Middleware {
    Middleware::new(|next| NoCache { next }.boxed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::not_found;
    use crate::response::Response;
    use http::Method;

    #[tokio::test]
    async fn sets_all_three_headers() {
        let handler = no_cache().wrap(not_found());
        let mut req = Request::new(Method::GET, "/");
        let mut res = Response::new();
        handler.serve(&mut req, &mut res).await.unwrap();

        let headers = res.headers();
        assert_eq!(headers[CACHE_CONTROL], "max-age=0, no-cache, no-store, must-revalidate");
        assert_eq!(headers[PRAGMA], "no-cache");
        assert_eq!(headers[EXPIRES], "0");
    }
}
