//! Client driver: owns one channel and one run session.
//!
//! The driver runs a single event loop task that owns both the channel and
//! the [`RunSession`]. Local calls (`submit`, `clear`) and inbound frames
//! are serialized through that loop in the order they occur, so the rendered
//! output always reflects the state machine's view and never raw
//! unsynchronized message delivery.
//!
//! Rendering happens through a stream of [`ScreenEvent`]s handed back from
//! [`Driver::connect`]; a snapshot of the accumulated text is also available
//! from [`Driver::output`].

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};

use runlet_core::errors::SubmitError;
use runlet_core::protocol::{self, RunStatus};
use runlet_core::session::{Applied, RunSession};

use crate::channel::{Channel, ChannelState};

/// Capacity of the screen event stream handed to the caller.
const EVENT_BUFFER: usize = 256;

/// What the caller's sink receives, in session order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScreenEvent {
    /// Append this text to the displayed output.
    Append(String),
    /// The displayed output was reset to empty.
    Cleared,
    /// The active run finished; the session is idle again.
    Finished(RunStatus),
    /// The connection dropped. The driver is dead; construct a new one to
    /// retry. Emitted at most once.
    ConnectionLost(String),
}

enum Command {
    Submit {
        source: String,
        reply: oneshot::Sender<Result<(), SubmitError>>,
    },
    Clear,
    Close,
}

/// Handle to a connected driver.
///
/// Dropping the handle stops the event loop and releases the channel.
pub struct Driver {
    cmd_tx: mpsc::Sender<Command>,
    snapshot: Arc<RwLock<String>>,
}

impl Driver {
    /// Connect to a backend and spawn the event loop.
    ///
    /// Returns the driver handle and the screen event stream the caller
    /// renders from.
    pub async fn connect(
        url: &str,
    ) -> Result<(Self, mpsc::Receiver<ScreenEvent>), runlet_core::errors::TransportError> {
        let channel = Channel::connect(url).await?;
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (evt_tx, evt_rx) = mpsc::channel(EVENT_BUFFER);
        let snapshot = Arc::new(RwLock::new(String::new()));

        let _ = tokio::spawn(run_loop(channel, cmd_rx, evt_tx, Arc::clone(&snapshot)));

        Ok((Self { cmd_tx, snapshot }, evt_rx))
    }

    /// Submit source text for execution.
    ///
    /// Rejected with [`SubmitError::AlreadyRunning`] while a run is in
    /// flight and with [`SubmitError::NotConnected`] when the channel is not
    /// open; a rejected submit produces no wire traffic. Empty source is
    /// legal and executes as empty input.
    pub async fn submit(&self, source: impl Into<String>) -> Result<(), SubmitError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Submit {
                source: source.into(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| SubmitError::NotConnected)?;
        reply_rx.await.map_err(|_| SubmitError::NotConnected)?
    }

    /// Reset the displayed output. Local, immediate, always succeeds.
    pub async fn clear(&self) {
        let _ = self.cmd_tx.send(Command::Clear).await;
    }

    /// Close the channel and stop the event loop.
    pub async fn close(&self) {
        let _ = self.cmd_tx.send(Command::Close).await;
    }

    /// Snapshot of the accumulated output text.
    #[must_use]
    pub fn output(&self) -> String {
        self.snapshot.read().clone()
    }
}

async fn run_loop(
    mut channel: Channel,
    mut cmd_rx: mpsc::Receiver<Command>,
    evt_tx: mpsc::Sender<ScreenEvent>,
    snapshot: Arc<RwLock<String>>,
) {
    let mut session = RunSession::new();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Submit { source, reply }) => {
                    let result = handle_submit(&mut channel, &mut session, &source, &evt_tx).await;
                    let _ = reply.send(result);
                }
                Some(Command::Clear) => {
                    session.clear();
                    snapshot.write().clear();
                    let _ = evt_tx.send(ScreenEvent::Cleared).await;
                }
                Some(Command::Close) | None => {
                    channel.close().await;
                    // Deliberate local close: no connectivity error to surface.
                    let _ = session.channel_closed();
                    break;
                }
            },
            inbound = channel.recv() => match inbound {
                Some(text) => match protocol::decode(&text) {
                    Ok(frame) => match session.apply(&frame) {
                        Applied::Appended(rendered) => {
                            snapshot.write().push_str(&rendered);
                            let _ = evt_tx.send(ScreenEvent::Append(rendered)).await;
                        }
                        Applied::Cleared => {
                            snapshot.write().clear();
                            let _ = evt_tx.send(ScreenEvent::Cleared).await;
                        }
                        Applied::Finished(status) => {
                            tracing::debug!(status = %status, "run finished");
                            let _ = evt_tx.send(ScreenEvent::Finished(status)).await;
                        }
                        Applied::Ignored => {}
                    },
                    Err(err) => {
                        tracing::warn!(code = err.code(), error = %err, "dropping undecodable frame");
                    }
                },
                None => {
                    if session.channel_closed() {
                        let reason = match channel.state() {
                            ChannelState::Failed => "connection failed",
                            _ => "connection closed",
                        };
                        let _ = evt_tx.send(ScreenEvent::ConnectionLost(reason.to_owned())).await;
                    }
                    break;
                }
            },
        }
    }

    tracing::debug!("driver event loop stopped");
}

/// Gate and send one submission. A failed send closes the session along
/// with the channel; the caller gets `NotConnected` either way.
async fn handle_submit(
    channel: &mut Channel,
    session: &mut RunSession,
    source: &str,
    evt_tx: &mpsc::Sender<ScreenEvent>,
) -> Result<(), SubmitError> {
    if !channel.is_open() {
        return Err(SubmitError::NotConnected);
    }
    session.begin_run()?;

    match channel.send(source).await {
        Ok(()) => Ok(()),
        Err(err) => {
            tracing::warn!(error = %err, "submit send failed");
            if session.channel_closed() {
                let _ = evt_tx
                    .send(ScreenEvent::ConnectionLost(err.to_string()))
                    .await;
            }
            Err(SubmitError::NotConnected)
        }
    }
}
