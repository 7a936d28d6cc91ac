//! Request metrics: per-status counters and response-time totals.
//!
//! Two sets of counters are kept per status code:
//!
//! - the **current window**, cleared on a fixed cadence (1 s by default) by
//!   a background task, so it reads as "requests in the last second";
//! - the **cumulative** counts, kept for the lifetime of the monitor.
//!
//! All state sits behind one reader/writer lock. Recording takes the write
//! lock once per request, after the next stage has returned; [`Monitor::get`]
//! takes the read lock once, so a snapshot is consistent at one instant.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Local, SecondsFormat, Utc};
use http::StatusCode;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::handler::{BoxFuture, BoxedHandler, Handler};
use crate::middleware::Middleware;
use crate::recorder::StatusRecorder;
use crate::request::Request;
use crate::response::{ContentType, ResponseSink};

#[derive(Debug, Default)]
struct MonitorState {
    current: BTreeMap<String, u64>,
    total: BTreeMap<String, u64>,
    total_response_time: Duration,
}

/// A point-in-time copy of the monitor's counters.
#[derive(Clone, Debug, Serialize)]
pub struct MonitorData {
    pub pid: u32,
    pub up_time: String,
    pub up_time_sec: f64,
    pub time: String,
    pub time_unix: i64,
    /// Current window, keyed by status code (`"200"`, `"404"`, …).
    pub status_code_count: BTreeMap<String, u64>,
    /// Since the monitor was created.
    pub total_status_code_count: BTreeMap<String, u64>,
    pub count: u64,
    pub total_count: u64,
    pub total_response_time: String,
    pub total_response_time_sec: f64,
    pub average_response_time: String,
    pub average_response_time_sec: f64,
}

/// The metrics aggregator.
///
/// Created once at startup and shared behind an `Arc`. The window-reset task
/// runs until [`shutdown`](Monitor::shutdown) is called or the monitor is
/// dropped.
pub struct Monitor {
    state: Arc<RwLock<MonitorState>>,
    started: Instant,
    pid: u32,
    cancel: CancellationToken,
}

impl Monitor {
    /// A monitor whose current window resets every second.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime (the reset task needs one).
    pub fn new() -> Arc<Self> {
        Self::with_reset_interval(Duration::from_secs(1))
    }

    /// A monitor whose current window resets every `period`.
    ///
    /// A zero `period` is raised to one millisecond.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn with_reset_interval(period: Duration) -> Arc<Self> {
        let period = if period.is_zero() {
            warn!("monitor reset interval of zero raised to 1ms");
            Duration::from_millis(1)
        } else {
            period
        };
        let state = Arc::new(RwLock::new(MonitorState::default()));
        let cancel = CancellationToken::new();
        tokio::spawn(reset_windows(Arc::clone(&state), period, cancel.clone()));
        Arc::new(Self {
            state,
            started: Instant::now(),
            pid: std::process::id(),
            cancel,
        })
    }

    /// Counts one response.
    pub fn record(&self, status: StatusCode, elapsed: Duration) {
        let code = status.as_u16().to_string();
        let mut state = self.state.write();
        *state.current.entry(code.clone()).or_default() += 1;
        *state.total.entry(code).or_default() += 1;
        state.total_response_time += elapsed;
    }

    /// Clears the current window now. The timer does this on its own.
    pub fn reset_current(&self) {
        self.state.write().current.clear();
    }

    /// Stops the reset task. Counters stay readable.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn get(&self) -> MonitorData {
        let (current, total, total_response_time) = {
            let state = self.state.read();
            (state.current.clone(), state.total.clone(), state.total_response_time)
        };

        let count = current.values().sum();
        let total_count: u64 = total.values().sum();
        let average = match u32::try_from(total_count) {
            Ok(0) => Duration::ZERO,
            Ok(n) => total_response_time / n,
            Err(_) => Duration::from_secs_f64(total_response_time.as_secs_f64() / total_count as f64),
        };
        let up_time = self.started.elapsed();

        MonitorData {
            pid: self.pid,
            up_time: format!("{up_time:?}"),
            up_time_sec: up_time.as_secs_f64(),
            time: Local::now().to_rfc3339_opts(SecondsFormat::Millis, false),
            time_unix: Utc::now().timestamp(),
            status_code_count: current,
            total_status_code_count: total,
            count,
            total_count,
            total_response_time: format!("{total_response_time:?}"),
            total_response_time_sec: total_response_time.as_secs_f64(),
            average_response_time: format!("{average:?}"),
            average_response_time_sec: average.as_secs_f64(),
        }
    }

    /// The counting stage.
    pub fn middleware(self: &Arc<Self>) -> Middleware {
        let monitor = Arc::clone(self);
        Middleware::new(move |next| Counted { monitor: Arc::clone(&monitor), next }.boxed())
    }

    /// A terminal handler answering with [`get`](Self::get) as JSON.
    pub fn handler(self: &Arc<Self>) -> BoxedHandler {
        Snapshot { monitor: Arc::clone(self) }.boxed()
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn reset_windows(state: Arc<RwLock<MonitorState>>, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => state.write().current.clear(),
        }
    }
    debug!("monitor reset task stopped");
}

// ── Stages ────────────────────────────────────────────────────────────────────

struct Counted {
    monitor: Arc<Monitor>,
    next: BoxedHandler,
}

impl Handler for Counted {
    fn serve<'a>(&'a self, req: &'a mut Request, res: &'a mut dyn ResponseSink) -> BoxFuture<'a> {
        Box::pin(async move {
            let started = Instant::now();
            let mut recorder = StatusRecorder::new(res);
            let result = self.next.serve(req, &mut recorder).await;
            self.monitor.record(recorder.outcome(&result), started.elapsed());
            result
        })
    }
}

struct Snapshot {
    monitor: Arc<Monitor>,
}

impl Handler for Snapshot {
    fn serve<'a>(&'a self, _req: &'a mut Request, res: &'a mut dyn ResponseSink) -> BoxFuture<'a> {
        Box::pin(async move {
            let body = serde_json::to_vec(&self.monitor.get())?;
            res.send(ContentType::Json, &body)?;
            Ok(())
        })
    }
}
