use super::RelayConfig;
use crate::Result;
use crate::relay::Sentinels;
use crate::store::SharedStore;
use crate::task::TaskLease;
use bytes::Bytes;
use core::time::Duration;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a stream completed normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The producer appended a termination sentinel.
    Sentinel,
    /// The metadata record disappeared and the output list was empty.
    Vanished,
}

/// How a relay ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Completed(Completion),
    /// No line was forwarded within the idle limit.
    TimedOut,
    /// The client went away.
    Disconnected,
    /// The server is shutting down.
    Cancelled,
}

impl RelayOutcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed(Completion::Sentinel) => "completed",
            Self::Completed(Completion::Vanished) => "vanished",
            Self::TimedOut => "timed_out",
            Self::Disconnected => "disconnected",
            Self::Cancelled => "cancelled",
        }
    }
}

impl core::fmt::Display for RelayOutcome {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of a finished relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayReport {
    pub outcome: RelayOutcome,
    pub lines_forwarded: u64,
    pub elapsed: Duration,
}

enum State {
    Polling,
    Draining { remaining: usize },
    Finished(RelayOutcome),
}

enum Popped {
    Noise,
    Sentinel,
    Line(Bytes),
}

/// Turns a task's output list into an NDJSON byte stream.
///
/// The relay owns the task's [`TaskLease`] for its whole life and releases it
/// on every exit path, so the task's keys are gone once [`StreamRelay::run`]
/// returns.
pub struct StreamRelay {
    lease: TaskLease,
    store: Arc<dyn SharedStore>,
    config: Arc<RelayConfig>,
    shutdown: CancellationToken,
}

impl core::fmt::Debug for StreamRelay {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StreamRelay")
            .field("lease", &self.lease)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl StreamRelay {
    pub fn new(
        lease: TaskLease,
        store: Arc<dyn SharedStore>,
        config: Arc<RelayConfig>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            lease,
            store,
            config,
            shutdown,
        }
    }

    pub fn lease(&self) -> &TaskLease {
        &self.lease
    }

    /// Polls the task's output list and forwards each line to `tx` until the
    /// stream ends.
    ///
    /// # Arguments
    ///
    /// - `tx`: Channel feeding the HTTP response body. Each item is one
    ///   complete NDJSON line including its trailing `\n`.
    ///
    /// # Behavior
    ///
    /// - While the list is empty, checks liveness every `poll_interval`.
    /// - When items are queued, drains the backlog counted at the start of
    ///   the tick, pausing `line_pause` after each forwarded line, then
    ///   re-checks liveness without waiting.
    /// - Blank values are skipped. A sentinel ends the stream and is never
    ///   forwarded.
    /// - Lines still queued after the metadata record vanished are drained
    ///   before completing.
    /// - After `max_idle_time` without a forwarded line, sends the timeout
    ///   message once (if configured) and stops.
    /// - Stops early when `tx` is closed or the shutdown token fires.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Store`] if the store fails mid-stream. The
    /// task's keys are released before the error is returned.
    pub async fn run(self, tx: mpsc::Sender<Bytes>) -> Result<RelayReport> {
        let Self {
            lease,
            store,
            config,
            shutdown,
        } = self;
        let started = Instant::now();
        let mut driver = Driver {
            lease: &lease,
            store: store.as_ref(),
            config: &config,
            shutdown: &shutdown,
            tx: &tx,
            lines_forwarded: 0,
            last_activity: started,
        };

        let outcome = driver.drive().await;
        let lines_forwarded = driver.lines_forwarded;
        let released = lease.release().await;

        let outcome = outcome?;
        if let Err(e) = released {
            tracing::warn!("failed to release task keys: {e}");
            return Err(e);
        }

        Ok(RelayReport {
            outcome,
            lines_forwarded,
            elapsed: started.elapsed(),
        })
    }
}

struct Driver<'a> {
    lease: &'a TaskLease,
    store: &'a dyn SharedStore,
    config: &'a RelayConfig,
    shutdown: &'a CancellationToken,
    tx: &'a mpsc::Sender<Bytes>,
    lines_forwarded: u64,
    last_activity: Instant,
}

impl Driver<'_> {
    async fn drive(&mut self) -> Result<RelayOutcome> {
        let mut state = State::Polling;
        loop {
            state = match state {
                State::Polling => self.poll().await?,
                State::Draining { remaining: 0 } => State::Polling,
                State::Draining { remaining } => self.drain_one(remaining).await?,
                State::Finished(outcome) => return Ok(outcome),
            };
        }
    }

    async fn poll(&mut self) -> Result<State> {
        if self.shutdown.is_cancelled() {
            return Ok(State::Finished(RelayOutcome::Cancelled));
        }
        if self.tx.is_closed() {
            return Ok(State::Finished(RelayOutcome::Disconnected));
        }

        let live = self.lease.is_live().await?;
        let queued = self.store.list_len(self.lease.output_key()).await?;

        if queued > 0 {
            tracing::trace!(queued, "draining backlog");
            return Ok(State::Draining { remaining: queued });
        }
        if !live {
            tracing::debug!("task record gone and output drained");
            return Ok(State::Finished(RelayOutcome::Completed(Completion::Vanished)));
        }
        if self.last_activity.elapsed() > self.config.max_idle_time {
            let outcome = self
                .send_timeout_message()
                .await
                .unwrap_or(RelayOutcome::TimedOut);
            return Ok(State::Finished(outcome));
        }

        Ok(match self.pause(self.config.poll_interval).await {
            Some(outcome) => State::Finished(outcome),
            None => State::Polling,
        })
    }

    async fn drain_one(&mut self, remaining: usize) -> Result<State> {
        let Some(raw) = self.store.pop_front(self.lease.output_key()).await? else {
            return Ok(State::Polling);
        };

        match classify(&raw, &self.config.sentinels) {
            Popped::Noise => {
                tracing::debug!("skipping blank output value");
                Ok(State::Draining {
                    remaining: remaining - 1,
                })
            }
            Popped::Sentinel => {
                tracing::debug!(sentinel = %raw.trim(), "end of output");
                Ok(State::Finished(RelayOutcome::Completed(Completion::Sentinel)))
            }
            Popped::Line(frame) => {
                if let Some(outcome) = self.forward(frame).await {
                    return Ok(State::Finished(outcome));
                }
                self.lines_forwarded += 1;
                self.last_activity = Instant::now();

                Ok(match self.pause(self.config.line_pause).await {
                    Some(outcome) => State::Finished(outcome),
                    None => State::Draining {
                        remaining: remaining - 1,
                    },
                })
            }
        }
    }

    /// Sends the timeout message, if one is configured. Returns an outcome
    /// only when shutdown interrupted the send.
    async fn send_timeout_message(&self) -> Option<RelayOutcome> {
        let message = self.config.timeout_message.trim();
        if message.is_empty() {
            return None;
        }
        match self.forward(frame_line(message)).await {
            Some(RelayOutcome::Disconnected) => {
                tracing::debug!("client gone before timeout message");
                None
            }
            outcome => outcome,
        }
    }

    /// Hands `frame` to the response body. A client that stops reading
    /// fills the channel, so the wait for capacity also yields to shutdown.
    async fn forward(&self, frame: Bytes) -> Option<RelayOutcome> {
        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => Some(RelayOutcome::Cancelled),
            sent = self.tx.send(frame) => match sent {
                Ok(()) => None,
                Err(_) => Some(RelayOutcome::Disconnected),
            },
        }
    }

    /// Waits `duration`, or returns early with the outcome if the client
    /// disconnects or the service shuts down meanwhile.
    async fn pause(&self, duration: Duration) -> Option<RelayOutcome> {
        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => Some(RelayOutcome::Cancelled),
            () = self.tx.closed() => Some(RelayOutcome::Disconnected),
            () = tokio::time::sleep(duration) => None,
        }
    }
}

fn classify(raw: &str, sentinels: &Sentinels) -> Popped {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        Popped::Noise
    } else if sentinels.contains(trimmed) {
        Popped::Sentinel
    } else {
        Popped::Line(frame_line(trimmed))
    }
}

/// Frames `line` as exactly one NDJSON record: embedded carriage returns and
/// line feeds are removed and a single `\n` is appended.
pub fn frame_line(line: &str) -> Bytes {
    let mut framed = String::with_capacity(line.len() + 1);
    framed.extend(line.chars().filter(|c| !matches!(c, '\r' | '\n')));
    framed.push('\n');
    Bytes::from(framed)
}
