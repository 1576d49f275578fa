//! Per-connection WebSocket session loop.
//!
//! Each accepted socket gets its own [`RunSession`] and one loop that
//! serializes inbound submissions and outbound run frames through it, so
//! the at-most-one-active-run invariant holds on the server side too. A
//! writer task forwards frames and sends periodic Ping frames; the child
//! process of an in-flight run is killed when the client disconnects.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use runlet_core::protocol::{RunStatus, ServerFrame};
use runlet_core::session::{Applied, RunSession};

use crate::server::AppState;

/// Interval between server-initiated Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for any sign of life before dropping the client.
const PONG_TIMEOUT: Duration = Duration::from_secs(90);

/// Outbound frame queue per connection.
const SEND_QUEUE: usize = 256;

/// Unique connection identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl Default for ConnectionId {
    fn default() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }
}

impl ConnectionId {
    /// A fresh unique ID.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Liveness tracking shared between the reader loop and the writer task.
struct Liveness {
    last_seen: Mutex<Instant>,
}

impl Liveness {
    fn new() -> Self {
        Self {
            last_seen: Mutex::new(Instant::now()),
        }
    }

    fn mark_alive(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    fn silent_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }
}

/// Drive one accepted WebSocket until it disconnects.
///
/// 1. Splits the socket; a writer task forwards frames and pings
/// 2. Treats every inbound text or binary frame as a submission
/// 3. Gates submissions through the connection's `RunSession`
/// 4. Kills any in-flight run when the client goes away
pub async fn run_connection(ws: WebSocket, state: AppState) {
    let id = ConnectionId::new();
    let started = Instant::now();
    let _ = state.active.fetch_add(1, Ordering::Relaxed);
    counter!("runlet_connections_total").increment(1);
    gauge!("runlet_connections_active").increment(1.0);
    tracing::info!(connection_id = %id, "client connected");

    let (mut ws_tx, mut ws_rx) = ws.split();
    let (frame_tx, mut frame_rx) = mpsc::channel::<ServerFrame>(SEND_QUEUE);
    let liveness = Arc::new(Liveness::new());

    // Writer task: outbound frames plus heartbeat.
    let writer_liveness = Arc::clone(&liveness);
    let writer_id = id.clone();
    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(PING_INTERVAL);
        let _ = ping_interval.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                frame = frame_rx.recv() => match frame {
                    Some(frame) => {
                        counter!("runlet_frames_sent_total", "kind" => frame.kind()).increment(1);
                        if ws_tx.send(Message::Text(frame.encode().into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = ping_interval.tick() => {
                    if writer_liveness.silent_for() > PONG_TIMEOUT {
                        tracing::warn!(connection_id = %writer_id, "client unresponsive, disconnecting");
                        break;
                    }
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut session = RunSession::new();
    let mut run_rx: Option<mpsc::Receiver<ServerFrame>> = None;
    let mut run_task: Option<JoinHandle<()>> = None;

    loop {
        tokio::select! {
            inbound = ws_rx.next() => {
                let Some(Ok(message)) = inbound else { break };
                let source = match message {
                    Message::Text(text) => Some(text.to_string()),
                    Message::Binary(data) => match std::str::from_utf8(&data) {
                        Ok(text) => Some(text.to_owned()),
                        Err(_) => {
                            tracing::warn!(connection_id = %id, len = data.len(), "ignoring non-UTF8 binary frame");
                            None
                        }
                    },
                    Message::Ping(_) | Message::Pong(_) => {
                        // axum answers pings itself; both directions count
                        // as liveness.
                        liveness.mark_alive();
                        None
                    }
                    Message::Close(_) => break,
                };
                let Some(source) = source else { continue };
                liveness.mark_alive();

                if source.len() > state.config.max_source_bytes {
                    tracing::warn!(
                        connection_id = %id,
                        source_bytes = source.len(),
                        "rejecting oversized submission"
                    );
                    let _ = frame_tx
                        .send(ServerFrame::error(format!(
                            "source too large ({} bytes, limit {})",
                            source.len(),
                            state.config.max_source_bytes
                        )))
                        .await;
                    continue;
                }

                match session.begin_run() {
                    Ok(()) => {
                        counter!("runlet_runs_total").increment(1);
                        tracing::info!(connection_id = %id, source_bytes = source.len(), "run started");
                        let (tx, rx) = mpsc::channel(SEND_QUEUE);
                        run_rx = Some(rx);
                        let executor = Arc::clone(&state.executor);
                        run_task = Some(tokio::spawn(async move {
                            executor.run(&source, tx).await;
                        }));
                    }
                    Err(err) => {
                        tracing::debug!(connection_id = %id, code = err.code(), "submission rejected");
                        counter!("runlet_runs_rejected_total").increment(1);
                        let _ = frame_tx.send(ServerFrame::error(err.to_string())).await;
                    }
                }
            },
            frame = recv_run_frame(&mut run_rx) => match frame {
                Some(frame) => {
                    let applied = session.apply(&frame);
                    if frame_tx.send(frame).await.is_err() {
                        break;
                    }
                    if let Applied::Finished(status) = applied {
                        tracing::info!(connection_id = %id, status = %status, "run finished");
                        counter!("runlet_runs_finished_total").increment(1);
                        run_rx = None;
                        run_task = None;
                        // Bound per-connection memory between runs.
                        session.reset_output();
                    }
                }
                None => {
                    run_rx = None;
                    run_task = None;
                    if session.is_running() {
                        // The executor went away without a terminal frame;
                        // synthesize one so the client is not stuck running.
                        tracing::error!(connection_id = %id, "run ended without a terminal frame");
                        let frame = ServerFrame::done(&RunStatus::Other("backend failure".into()));
                        let _ = session.apply(&frame);
                        let _ = frame_tx.send(frame).await;
                        session.reset_output();
                    }
                }
            },
        }
    }

    if let Some(task) = run_task.take() {
        // Dropping the run future kills the child (kill-on-drop).
        task.abort();
        tracing::info!(connection_id = %id, "aborted in-flight run on disconnect");
    }
    writer.abort();
    let _ = state.active.fetch_sub(1, Ordering::Relaxed);
    counter!("runlet_disconnections_total").increment(1);
    gauge!("runlet_connections_active").decrement(1.0);
    tracing::info!(
        connection_id = %id,
        duration_secs = started.elapsed().as_secs(),
        "client disconnected"
    );
}

/// Next frame from the in-flight run, or pending forever when there is none.
async fn recv_run_frame(rx: &mut Option<mpsc::Receiver<ServerFrame>>) -> Option<ServerFrame> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_ids_are_unique() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("conn_"));
    }

    #[test]
    fn liveness_marks_and_measures() {
        let liveness = Liveness::new();
        std::thread::sleep(Duration::from_millis(10));
        assert!(liveness.silent_for() >= Duration::from_millis(10));
        liveness.mark_alive();
        assert!(liveness.silent_for() < Duration::from_millis(10));
    }
}
