//! Minimal layercake example: the common chain, gzip, CSP and metrics.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl -i http://localhost:3000/hello
//!   curl -i --compressed http://localhost:3000/hello
//!   curl http://localhost:3000/boom
//!   curl http://localhost:3000/metrics

use layercake::middleware::{compression, xss, Csp, CspOptions};
use layercake::{BoxFuture, BoxedHandler, Chain, ContentType, Error, Handler, Monitor, Request, ResponseSink, Server};
use tracing_subscriber::EnvFilter;

/// Branches on the path; layercake has no router of its own.
struct App {
    metrics: BoxedHandler,
}

impl Handler for App {
    fn serve<'a>(&'a self, req: &'a mut Request, res: &'a mut dyn ResponseSink) -> BoxFuture<'a> {
        match req.path() {
            "/metrics" => self.metrics.serve(req, res),
            "/boom" => Box::pin(async move { panic!("the /boom handler always panics") }),
            _ => Box::pin(async move {
                let page = format!("<h1>hello from {}</h1>", req.path());
                res.send(ContentType::Html, page.as_bytes())?;
                Ok(())
            }),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let monitor = Monitor::new();
    let csp = Csp::new(CspOptions {
        default_src: vec!["'self'".into()],
        script_src: vec!["'self'".into()],
        ..CspOptions::default()
    });

    let app = Chain::common()
        .append([monitor.middleware(), xss(), csp.middleware(), compression()])
        .then(App { metrics: monitor.handler() }.boxed());

    Server::bind(([0, 0, 0, 0], 3000)).serve(app).await
}
