//! Panic reports: daily log files and remote push.
//!
//! Both destinations are best-effort. A report that cannot be written or
//! delivered is logged and dropped; it never changes the response the client
//! gets.

use std::backtrace::Backtrace;
use std::future::Future;
use std::io;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use futures_util::FutureExt;
use http::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::config::SharedConfig;
use crate::error::Error;
use crate::middleware::panic_message;
use crate::request::Request;

/// Upper bound on the `STACK` field, in bytes.
pub const STACK_LIMIT: usize = 1024;

/// One panic, as written to the log file and pushed to the collector.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorReport {
    #[serde(rename = "Agent")]
    pub agent: String,
    /// Path and query of the failed request.
    #[serde(rename = "API")]
    pub api: String,
    #[serde(rename = "METHOD")]
    pub method: String,
    #[serde(rename = "BODY")]
    pub body: String,
    #[serde(rename = "PANIC")]
    pub panic: String,
    #[serde(rename = "REFERER")]
    pub referer: String,
    /// Peer address as `ip:port`, empty when unknown.
    #[serde(rename = "IP")]
    pub ip: String,
    #[serde(rename = "STACK")]
    pub stack: String,
}

impl ErrorReport {
    pub fn from_request(req: &Request, agent: &str, panic: &str, stack: String) -> Self {
        Self {
            agent: agent.to_owned(),
            api: req.request_uri().to_owned(),
            method: req.method().to_string(),
            body: String::from_utf8_lossy(req.body()).into_owned(),
            panic: panic.to_owned(),
            referer: req.referer().to_owned(),
            ip: req.remote_addr().map(|a| a.to_string()).unwrap_or_default(),
            stack,
        }
    }
}

/// A backtrace of the calling thread, cut to [`STACK_LIMIT`] bytes.
pub(crate) fn capture_stack() -> String {
    let mut stack = Backtrace::force_capture().to_string();
    if stack.len() > STACK_LIMIT {
        let mut end = STACK_LIMIT;
        while !stack.is_char_boundary(end) {
            end -= 1;
        }
        stack.truncate(end);
    }
    stack
}

/// `<prefix><YYYY-MM-DD>.txt`
pub fn daily_log_path(prefix: &str, date: NaiveDate) -> PathBuf {
    PathBuf::from(format!("{prefix}{}.txt", date.format("%Y-%m-%d")))
}

async fn append_line(path: &Path, line: &[u8]) -> io::Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut entry = Vec::with_capacity(line.len() + 1);
    entry.extend_from_slice(line);
    entry.push(b'\n');

    let mut file = options.open(path).await?;
    file.write_all(&entry).await?;
    file.flush().await
}

/// Sends [`ErrorReport`]s wherever the current [`ReportConfig`] says.
///
/// The config is read per report, so a hot reload takes effect on the next
/// panic without rebuilding anything.
///
/// [`ReportConfig`]: crate::ReportConfig
pub struct Reporter {
    config: SharedConfig,
    client: reqwest::Client,
}

impl Reporter {
    /// Fails only if the HTTP client cannot be set up (no TLS backend).
    pub fn new(config: SharedConfig) -> Result<Arc<Self>, Error> {
        let client = reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Arc::new(Self { config, client }))
    }

    /// Watches the config file at `path`. A missing or invalid file is an
    /// error, so a service cannot start with reporting misconfigured.
    pub fn watching(path: impl AsRef<Path>) -> Result<Arc<Self>, Error> {
        Self::new(SharedConfig::watch(path)?)
    }

    pub fn config(&self) -> &SharedConfig {
        &self.config
    }

    /// Builds a report for a panic with `message` while serving `req`.
    pub fn report(&self, req: &Request, message: &str) -> ErrorReport {
        let agent = self.config.snapshot().agent.clone();
        ErrorReport::from_request(req, &agent, message, capture_stack())
    }

    /// Writes and pushes `report`, returning once both have been attempted.
    pub async fn deliver(&self, report: &ErrorReport) {
        let config = self.config.snapshot();
        if !config.is_log_enabled && !config.is_log_push_enabled_to_remote {
            return;
        }

        let line = match serde_json::to_vec(report) {
            Ok(line) => line,
            Err(e) => {
                warn!("panic report could not be encoded: {e}");
                return;
            }
        };

        if config.is_log_enabled {
            let path = daily_log_path(&config.log_path, Local::now().date_naive());
            if let Err(e) = append_line(&path, &line).await {
                warn!(path = %path.display(), "panic report not written: {e}");
            }
        }

        if config.is_log_push_enabled_to_remote {
            let sent = self
                .client
                .post(&config.remote_url)
                .header(CONTENT_TYPE, "application/json")
                .body(line)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status);
            if let Err(e) = sent {
                debug!(url = %config.remote_url, "panic report not pushed: {e}");
            }
        }
    }

    /// [`deliver`](Self::deliver) on a background task.
    pub fn push(self: &Arc<Self>, report: ErrorReport) -> JoinHandle<()> {
        let reporter = Arc::clone(self);
        tokio::spawn(async move { reporter.deliver(&report).await })
    }

    /// Spawns `fut`, reporting a panic in it against `req` instead of
    /// letting it vanish with the task.
    ///
    /// The handle resolves once the future finished and any report was
    /// delivered.
    ///
    /// ```rust,no_run
    /// # async fn demo(reporter: std::sync::Arc<layercake::Reporter>, req: &layercake::Request) {
    /// let audit = reporter.guard(req.clone(), async move {
    ///     // work that outlives the response
    /// });
    /// # let _ = audit;
    /// # }
    /// ```
    pub fn guard<F>(self: &Arc<Self>, req: Request, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let reporter = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(payload) = AssertUnwindSafe(fut).catch_unwind().await {
                let message = panic_message(payload.as_ref());
                error!(method = %req.method(), path = req.path(), panic = %message, "background task panicked");
                let report = reporter.report(&req, &message);
                reporter.deliver(&report).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use http::Method;

    use super::*;
    use crate::config::ReportConfig;

    fn logging_to(dir: &tempfile::TempDir) -> (Arc<Reporter>, String) {
        let prefix = dir.path().join("panic-").to_string_lossy().into_owned();
        let config = ReportConfig {
            is_log_enabled: true,
            log_path: prefix.clone(),
            agent: "orders".to_owned(),
            ..ReportConfig::default()
        };
        (Reporter::new(SharedConfig::fixed(config)).unwrap(), prefix)
    }

    fn todays_lines(prefix: &str) -> Vec<ErrorReport> {
        let path = daily_log_path(prefix, Local::now().date_naive());
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn serializes_with_collector_keys() {
        let value = serde_json::to_value(ErrorReport::default()).unwrap();
        let mut keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, ["API", "Agent", "BODY", "IP", "METHOD", "PANIC", "REFERER", "STACK"]);
    }

    #[test]
    fn report_carries_request_metadata() {
        let req = Request::new(Method::POST, "/orders?dry=1")
            .with_header("referer", "https://shop.example/cart")
            .with_body(r#"{"id":7}"#)
            .with_remote_addr("10.0.0.9:51234".parse().unwrap());
        let report = ErrorReport::from_request(&req, "orders", "boom", String::new());
        assert_eq!(report.api, "/orders?dry=1");
        assert_eq!(report.method, "POST");
        assert_eq!(report.body, r#"{"id":7}"#);
        assert_eq!(report.referer, "https://shop.example/cart");
        assert_eq!(report.ip, "10.0.0.9:51234");
        assert_eq!(report.agent, "orders");
    }

    #[test]
    fn stack_is_bounded() {
        assert!(capture_stack().len() <= STACK_LIMIT);
    }

    #[test]
    fn daily_path_format() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(daily_log_path("/var/log/x-", date), PathBuf::from("/var/log/x-2024-03-09.txt"));
    }

    #[tokio::test]
    async fn appends_one_json_line_per_report() {
        let dir = tempfile::tempdir().unwrap();
        let (reporter, prefix) = logging_to(&dir);
        let req = Request::new(Method::GET, "/a");

        reporter.deliver(&reporter.report(&req, "first")).await;
        reporter.deliver(&reporter.report(&req, "second")).await;

        let lines = todays_lines(&prefix);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].panic, "first");
        assert_eq!(lines[1].panic, "second");
        assert_eq!(lines[1].agent, "orders");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn log_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let (reporter, prefix) = logging_to(&dir);
        reporter.deliver(&ErrorReport::default()).await;

        let path = daily_log_path(&prefix, Local::now().date_naive());
        let mode = std::fs::metadata(path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn disabled_config_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = Reporter::new(SharedConfig::fixed(ReportConfig {
            log_path: dir.path().join("panic-").to_string_lossy().into_owned(),
            ..ReportConfig::default()
        })).unwrap();
        reporter.deliver(&ErrorReport::default()).await;
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn unreachable_collector_is_ignored() {
        let reporter = Reporter::new(SharedConfig::fixed(ReportConfig {
            is_log_push_enabled_to_remote: true,
            remote_url: "http://127.0.0.1:9/ingest".to_owned(),
            ..ReportConfig::default()
        })).unwrap();
        reporter.deliver(&ErrorReport::default()).await;
    }

    #[tokio::test]
    async fn guard_reports_background_panic() {
        let dir = tempfile::tempdir().unwrap();
        let (reporter, prefix) = logging_to(&dir);
        let req = Request::new(Method::PUT, "/jobs/3");

        reporter
            .guard(req, async {
                panic!("background boom");
            })
            .await
            .unwrap();

        let lines = todays_lines(&prefix);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].panic, "background boom");
        assert_eq!(lines[0].method, "PUT");
        assert_eq!(lines[0].api, "/jobs/3");
    }

    #[tokio::test]
    async fn guard_is_silent_without_panic() {
        let dir = tempfile::tempdir().unwrap();
        let (reporter, _) = logging_to(&dir);
        reporter.guard(Request::new(Method::GET, "/"), async {}).await.unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
