//! Joint reconnect scheduling for the channel pair.
//!
//! One attempt counter covers both channels. A close event from either
//! channel either schedules a single timer that reopens the whole pair, is
//! folded into a timer that is already pending, or, once `max_attempts` is
//! reached, ends automatic recovery until the counter is reset.

use std::time::Duration;

use tokio::select;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::backoff::BackoffPolicy;
use crate::service::Event;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    Scheduled { attempt: u32, delay: Duration },
    AlreadyPending { attempt: u32 },
    Exhausted { attempts: u32 },
}

#[derive(Debug)]
struct PendingReconnect {
    id: TimerId,
    token: CancellationToken,
}

#[derive(Debug)]
pub struct ReconnectCoordinator {
    policy: BackoffPolicy,
    max_attempts: u32,
    attempts: u32,
    pending: Option<PendingReconnect>,
    next_timer: u64,
    tx: flume::Sender<Event>,
}

impl ReconnectCoordinator {
    pub(crate) const fn new(
        policy: BackoffPolicy,
        max_attempts: u32,
        tx: flume::Sender<Event>,
    ) -> Self {
        Self {
            policy,
            max_attempts,
            attempts: 0,
            pending: None,
            next_timer: 0,
            tx,
        }
    }

    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Called for every unexpected close of either channel.
    #[allow(clippy::redundant_pub_crate)]
    pub fn on_close(&mut self) -> ReconnectDecision {
        if self.pending.is_some() {
            log::debug!(
                "on_close: Reconnect attempt {} already pending",
                self.attempts
            );
            return ReconnectDecision::AlreadyPending {
                attempt: self.attempts,
            };
        }

        if self.attempts >= self.max_attempts {
            log::error!(
                "on_close: Giving up after {} reconnect attempts",
                self.attempts
            );
            return ReconnectDecision::Exhausted {
                attempts: self.attempts,
            };
        }

        self.attempts += 1;
        let attempt = self.attempts;
        let delay = self.policy.delay(attempt);
        let id = TimerId(self.next_timer);
        self.next_timer += 1;
        let token = CancellationToken::new();

        log::info!(
            "on_close: Reconnecting in {}ms (attempt {attempt}/{})",
            delay.as_millis(),
            self.max_attempts
        );

        tokio::spawn({
            let tx = self.tx.clone();
            let token = token.clone();

            async move {
                select!(
                    () = sleep(delay) => {
                        if tx.send(Event::ReconnectDue(id)).is_err() {
                            log::trace!("reconnect timer: service stopped");
                        }
                    }
                    () = token.cancelled() => {
                        log::debug!("reconnect timer: Cancelled attempt {attempt}");
                    }
                );
            }
        });

        self.pending = Some(PendingReconnect { id, token });

        ReconnectDecision::Scheduled { attempt, delay }
    }

    /// Consumes a timer firing. Returns `true` only for the currently pending
    /// timer; firings of cancelled timers are ignored.
    pub fn fire(&mut self, id: TimerId) -> bool {
        match &self.pending {
            Some(pending) if pending.id == id => {
                self.pending = None;
                true
            }
            _ => {
                log::debug!("fire: Ignoring stale reconnect timer {id:?}");
                false
            }
        }
    }

    /// Cancels the pending timer, if any.
    pub fn cancel(&mut self) -> bool {
        self.pending.take().is_some_and(|pending| {
            log::debug!("cancel: Cancelling pending reconnect {:?}", pending.id);
            pending.token.cancel();
            true
        })
    }

    pub fn reset(&mut self) {
        if self.attempts > 0 {
            log::debug!("reset: Resetting reconnect attempts from {}", self.attempts);
        }
        self.attempts = 0;
    }
}
