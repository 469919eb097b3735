// crates/server/src/routes/logs.rs
//! Server-Sent-Events log streaming, one stream per observer.
//!
//! - `GET /deployments/:id/logs` -- `text/event-stream`
//!
//! Events: `status` (emitted on connect and on every status change), `log`
//! (one masked output line), `done` (terminal status + exit code, closes the
//! stream), plus comment-only heartbeats to defeat idle-connection timeouts
//! in intermediate proxies.
//!
//! Each connection replays the hub's buffered lines, then follows live
//! publishes on a timed select; when the hub has nothing (jobs from a
//! previous process, hub-miss edges) it falls back to tailing the job's log
//! file. Terminal status starts a short grace window that keeps draining
//! trailing output before `done`.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::{header, HeaderName, HeaderValue},
    response::sse::{Event, Sse},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::time::{Instant, MissedTickBehavior};

use runhub_core::fsutil::utc_now;
use runhub_core::lines::LineSplitter;
use runhub_core::secrets::mask_secrets;
use runhub_core::tail::LogTail;
use runhub_core::types::JobMeta;

use crate::error::ApiResult;
use crate::jobs::LogHub;
use crate::state::AppState;

/// Cadence of the fallback/status poll.
const POLL_INTERVAL: Duration = Duration::from_millis(200);
/// Idle time after which a comment heartbeat is emitted.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
/// How long trailing output keeps a finished job's stream open.
const TERMINAL_GRACE: Duration = Duration::from_millis(500);

/// Build the log streaming sub-router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/deployments/{id}/logs", get(stream_logs))
}

/// RAII guard that drops the hub subscription on every exit path, including
/// early client disconnects that cancel the stream mid-yield.
struct HubGuard {
    hub: Arc<LogHub>,
    job_id: String,
    token: u64,
}

impl Drop for HubGuard {
    fn drop(&mut self) {
        self.hub.unsubscribe(&self.job_id, self.token);
    }
}

fn status_payload(meta: &JobMeta) -> String {
    serde_json::json!({
        "job_id": meta.job_id,
        "status": meta.status,
        "started_at": meta.started_at,
        "finished_at": meta.finished_at,
        "exit_code": meta.exit_code,
        "timestamp": utc_now(),
    })
    .to_string()
}

fn done_payload(meta: &JobMeta) -> String {
    serde_json::json!({
        "job_id": meta.job_id,
        "status": meta.status,
        "finished_at": meta.finished_at,
        "exit_code": meta.exit_code,
        "timestamp": utc_now(),
    })
    .to_string()
}

fn status_event(meta: &JobMeta) -> Event {
    Event::default().event("status").data(status_payload(meta))
}

fn done_event(meta: &JobMeta) -> Event {
    Event::default().event("done").data(done_payload(meta))
}

fn log_event(line: &str) -> Event {
    Event::default().event("log").data(line)
}

/// GET /deployments/:id/logs -- SSE stream of one job's masked output.
async fn stream_logs(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Response> {
    let controller = state.controller.clone();

    // 404 before the stream starts.
    controller.get(&job_id)?;

    // Subscribe before reading the status snapshot: a line published
    // between the two lands in the queue instead of vanishing.
    let subscription = controller.hub().subscribe(&job_id);
    let initial_meta = controller.load_meta(&job_id)?;
    let hub = controller.hub().clone();
    let paths = controller.paths(&job_id);

    let stream = async_stream::stream! {
        let controller = controller;
        let job_id = job_id;
        let mut meta = initial_meta;
        let mut rx = subscription.rx;
        let replay = subscription.replay;
        let _guard = HubGuard {
            hub,
            job_id: job_id.clone(),
            token: subscription.token,
        };

        // INIT: one status event from the subscribe-time snapshot.
        yield Ok::<Event, Infallible>(status_event(&meta));
        let mut last_status = meta.status;
        let mut last_event_at = Instant::now();

        // REPLAY: buffered lines are already masked.
        let replayed_from_hub = !replay.is_empty();
        for line in &replay {
            yield Ok(log_event(line));
            last_event_at = Instant::now();
        }

        // Fallback tail, used only while the hub has never delivered for
        // this job (created before this process, hub-miss edges): replay the
        // whole file when the hub had nothing, otherwise only follow bytes
        // appended from here on.
        let mut hub_seen = replayed_from_hub;
        let mut tail = LogTail::new(&paths.log_path);
        if replayed_from_hub {
            tail.skip_to_end().await;
        }
        let mut tail_splitter = LineSplitter::new();

        let mut hub_closed = false;
        let mut grace_deadline: Option<Instant> = None;
        let mut interval = tokio::time::interval(POLL_INTERVAL);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // LIVE/DRAINING: timed select over "new queue data" and the poll tick.
        loop {
            let mut emitted_data = false;

            tokio::select! {
                line = rx.recv(), if !hub_closed => {
                    match line {
                        Some(line) => {
                            yield Ok(log_event(&line));
                            while let Ok(more) = rx.try_recv() {
                                yield Ok(log_event(&more));
                            }
                            hub_seen = true;
                            emitted_data = true;
                            last_event_at = Instant::now();
                        }
                        None => {
                            hub_closed = true;
                        }
                    }
                }
                _ = interval.tick() => {
                    if !hub_seen {
                        match tail.read_new().await {
                            Ok(bytes) if !bytes.is_empty() => {
                                let secrets = controller.secret_store().get(&job_id);
                                for line in tail_splitter.push(&bytes) {
                                    yield Ok(log_event(&mask_secrets(&line, &secrets)));
                                    emitted_data = true;
                                }
                                if emitted_data {
                                    last_event_at = Instant::now();
                                }
                            }
                            Ok(_) => {}
                            Err(e) => {
                                tracing::debug!(job_id = %job_id, error = %e, "log tail read failed");
                            }
                        }
                    }

                    match controller.load_meta(&job_id) {
                        Ok(current) => {
                            meta = current;
                            if meta.status != last_status {
                                yield Ok(status_event(&meta));
                                last_status = meta.status;
                                last_event_at = Instant::now();
                            }
                        }
                        Err(e) => {
                            tracing::debug!(job_id = %job_id, error = %e, "status re-read failed");
                        }
                    }

                    if last_event_at.elapsed() >= HEARTBEAT_INTERVAL {
                        yield Ok(Event::default().comment("keep-alive"));
                        last_event_at = Instant::now();
                    }
                }
            }

            if meta.status.is_terminal() {
                match grace_deadline {
                    None => {
                        grace_deadline = Some(Instant::now() + TERMINAL_GRACE);
                    }
                    Some(deadline) => {
                        if emitted_data {
                            // Still draining: push the deadline out.
                            grace_deadline = Some(Instant::now() + TERMINAL_GRACE);
                        } else if Instant::now() >= deadline {
                            if let Some(rest) = tail_splitter.flush() {
                                let secrets = controller.secret_store().get(&job_id);
                                yield Ok(log_event(&mask_secrets(&rest, &secrets)));
                            }
                            yield Ok(done_event(&meta));
                            break;
                        }
                    }
                }
            }
        }
    };

    let mut response = Sse::new(stream).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    Ok(response)
}
