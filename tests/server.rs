use std::net::SocketAddr;
use std::time::Duration;

use layercake::middleware::{compression, recover_and_log};
use layercake::{
    handler_fn, BoxedHandler, Chain, ContentType, Error, ErrorReport, Handler, ReportConfig, Reporter, Server,
    SharedConfig,
};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

struct Running {
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    task: JoinHandle<Result<(), Error>>,
}

impl Running {
    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    async fn stop(self) {
        self.stop.send(()).unwrap();
        self.task.await.unwrap().unwrap();
    }
}

async fn start(handler: BoxedHandler) -> Running {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(Server::from_listener(listener).serve_with_shutdown(handler, async {
        stopped.await.ok();
    }));
    Running { addr, stop, task }
}

fn app() -> BoxedHandler {
    Chain::common().then_fn(|req, res| {
        Box::pin(async move {
            match req.path() {
                "/panic" => panic!("Oh No its an error"),
                "/fail" => return Err(Error::handler("storage offline")),
                "/echo" => {
                    let body = req.body().to_vec();
                    res.send(ContentType::Text, &body)?;
                }
                _ => res.send(ContentType::Text, b"hello")?,
            }
            Ok::<(), Error>(())
        })
    })
}

#[tokio::test]
async fn round_trip_through_real_server() {
    let server = start(app()).await;
    let client = reqwest::Client::new();

    let res = client.get(server.url("/")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["cache-control"], "max-age=0, no-cache, no-store, must-revalidate");
    assert_eq!(res.text().await.unwrap(), "hello");

    let res = client.post(server.url("/echo")).body("ping").send().await.unwrap();
    assert_eq!(res.text().await.unwrap(), "ping");

    let res = client.get(server.url("/panic")).send().await.unwrap();
    assert_eq!(res.status(), 500);
    assert_eq!(res.text().await.unwrap(), "Oh No its an error\n");

    // Graceful shutdown waits for keep-alive connections to close.
    drop(client);
    server.stop().await;
}

#[tokio::test]
async fn unhandled_error_becomes_500() {
    let server = start(app()).await;
    let res = reqwest::get(server.url("/fail")).await.unwrap();
    assert_eq!(res.status(), 500);
    drop(res);
    server.stop().await;
}

#[tokio::test]
async fn gzip_does_not_hide_handler_errors() {
    let app = Chain::new([compression()]).then_fn(|_req, _res| {
        Box::pin(async move { Err::<(), _>(Error::handler("db down")) })
    });
    let server = start(app).await;
    let res = reqwest::Client::new()
        .get(server.url("/"))
        .header("accept-encoding", "gzip")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 500);
    assert!(res.headers().get("content-encoding").is_none());
    drop(res);
    server.stop().await;
}

#[tokio::test]
async fn panic_reports_are_pushed_to_collector() {
    let (tx, mut rx) = mpsc::unbounded_channel::<(String, Vec<u8>)>();
    let collector = start(
        handler_fn(move |req, _res| {
            let tx = tx.clone();
            Box::pin(async move {
                let content_type = req.header("content-type").unwrap_or_default().to_owned();
                let _ = tx.send((content_type, req.body().to_vec()));
                Ok::<(), Error>(())
            })
        })
        .boxed(),
    )
    .await;

    let reporter = Reporter::new(SharedConfig::fixed(ReportConfig {
        is_log_push_enabled_to_remote: true,
        remote_url: collector.url("/ingest"),
        agent: "payments".to_owned(),
        ..ReportConfig::default()
    })).unwrap();
    let service = start(Chain::new([recover_and_log(reporter)]).then_fn(|_req, _res| {
        Box::pin(async move {
            if true {
                panic!("card processor vanished");
            }
            Ok::<(), Error>(())
        })
    }))
    .await;

    let res = reqwest::Client::new()
        .post(service.url("/charge?id=9"))
        .header("referer", "https://shop.example/checkout")
        .body("amount=10")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 500);
    assert_eq!(res.headers()["content-type"], "application/json");
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "PANIC deferred: card processor vanished");

    let (content_type, pushed) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(content_type, "application/json");
    let report: ErrorReport = serde_json::from_slice(&pushed).unwrap();
    assert_eq!(report.agent, "payments");
    assert_eq!(report.api, "/charge?id=9");
    assert_eq!(report.method, "POST");
    assert_eq!(report.body, "amount=10");
    assert_eq!(report.referer, "https://shop.example/checkout");
    assert_eq!(report.panic, "card processor vanished");
    assert!(report.ip.starts_with("127.0.0.1:"));
}
