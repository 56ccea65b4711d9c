//! Outgoing pipeline: delivers locally generated commands in order.
//!
//! ```text
//!            push                      post ok
//!  local ──────────► queue ──► Idle ──────────► Sending ──┐
//!                               ▲ ▲                │      │ ok
//!                               │ └────────────────┼──────┘
//!                               │        failure   ▼
//!                               └── retry same ── Failed
//! ```
//!
//! At most one command is in flight. A failed command is resent until it
//! succeeds, so a stuck command holds back everything queued behind it.
//! Each command carries its position in the stream as `ClientSequence`, so
//! a retry after a lost acknowledgement is not appended twice.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use we3graph_core::Command;

use crate::session::{Shared, SyncEvent};
use crate::stats::{bump, FailureStreak};
use crate::transport::Transport;

/// State of the sender, per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Idle,
    Sending,
    Failed,
}

/// A command waiting for delivery with its stream position.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Queued {
    pub command: Command,
    pub client_sequence: u64,
}

#[derive(Debug)]
struct OutboxState {
    queue: VecDeque<Queued>,
    in_flight: Option<Queued>,
    send_state: SendState,
    next_sequence: u64,
}

/// FIFO of commands not yet acknowledged by the service.
pub(crate) struct Outbox {
    state: Mutex<OutboxState>,
    wakeup: Notify,
    pending: watch::Sender<usize>,
}

impl Outbox {
    pub fn new() -> Self {
        let (pending, _) = watch::channel(0);
        Self {
            state: Mutex::new(OutboxState {
                queue: VecDeque::new(),
                in_flight: None,
                send_state: SendState::Idle,
                next_sequence: 1,
            }),
            wakeup: Notify::new(),
            pending,
        }
    }

    fn lock(&self) -> MutexGuard<'_, OutboxState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, state: &OutboxState) {
        let count = state.queue.len() + usize::from(state.in_flight.is_some());
        self.pending.send_replace(count);
    }

    pub fn push(&self, command: Command) {
        let mut state = self.lock();
        let client_sequence = state.next_sequence;
        state.next_sequence += 1;
        state.queue.push_back(Queued {
            command,
            client_sequence,
        });
        self.publish(&state);
        drop(state);
        self.wakeup.notify_one();
    }

    /// The command to send next: the unacknowledged one if there is one,
    /// otherwise the head of the queue.
    pub fn next(&self) -> Option<Queued> {
        let mut state = self.lock();
        if state.in_flight.is_none() {
            state.in_flight = state.queue.pop_front();
        }
        let next = state.in_flight.clone()?;
        state.send_state = SendState::Sending;
        Some(next)
    }

    /// The in-flight command is done with; move on.
    pub fn complete(&self) {
        let mut state = self.lock();
        state.in_flight = None;
        state.send_state = SendState::Idle;
        self.publish(&state);
    }

    /// The in-flight command stays in place to be resent.
    pub fn fail(&self) {
        self.lock().send_state = SendState::Failed;
    }

    pub fn send_state(&self) -> SendState {
        self.lock().send_state
    }

    /// Queued plus in-flight commands.
    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    pub async fn wait_for_push(&self) {
        self.wakeup.notified().await;
    }

    /// Waits until nothing is pending. False if `timeout` ran out first.
    pub async fn wait_drained(&self, timeout: Duration) -> bool {
        let mut pending = self.pending.subscribe();
        let drained = tokio::time::timeout(timeout, pending.wait_for(|count| *count == 0))
            .await
            .is_ok();
        drained
    }
}

/// Sends queued commands one at a time until shutdown.
pub(crate) async fn run_sender<T: Transport>(
    shared: Arc<Shared<T>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut streak = FailureStreak::default();
    loop {
        let Some(queued) = shared.outbox.next() else {
            tokio::select! {
                _ = shared.outbox.wait_for_push() => {}
                _ = shutdown.changed() => break,
            }
            continue;
        };

        let result = tokio::select! {
            result = shared.client.post_command(
                shared.client_id,
                &shared.token,
                &queued.command,
                Some(queued.client_sequence),
            ) => result,
            _ = shutdown.changed() => break,
        };

        match result {
            Ok(ack) => {
                streak.succeeded();
                shared.outbox.complete();
                bump(&shared.stats.commands_sent);
                shared.report_reachable();
                if ack.appended {
                    log::trace!("{} accepted as #{}", queued.command.kind, ack.id);
                } else {
                    log::debug!(
                        "{} (client seq {}) was already in the log",
                        queued.command.kind,
                        queued.client_sequence
                    );
                }
            }
            Err(e) if e.is_retryable() => {
                shared.outbox.fail();
                bump(&shared.stats.send_failures);
                shared.report_unreachable();
                log::log!(
                    streak.failed(),
                    "Send of {} failed, retrying in {:?}: {e}",
                    queued.command.kind,
                    shared.config.send_retry_interval
                );
                tokio::select! {
                    _ = tokio::time::sleep(shared.config.send_retry_interval) => {}
                    _ = shutdown.changed() => break,
                }
            }
            Err(e) => {
                log::error!("Service refused {}: {e}", queued.command.kind);
                bump(&shared.stats.send_failures);
                shared.outbox.complete();
                shared.emit(SyncEvent::CommandRejected {
                    command: queued.command,
                    error: e,
                });
            }
        }
    }
    log::debug!("Sender for client {} stopped", shared.client_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use we3graph_core::CommandKind;

    fn cmd(n: u32) -> Command {
        Command::new(CommandKind::CustomCommand, [format!("c{n}")])
    }

    #[test]
    fn test_outbox_is_fifo_with_sequences() {
        let outbox = Outbox::new();
        for n in 1..=3 {
            outbox.push(cmd(n));
        }
        assert_eq!(outbox.pending(), 3);

        let first = outbox.next().unwrap();
        assert_eq!(first.command, cmd(1));
        assert_eq!(first.client_sequence, 1);
        assert_eq!(outbox.send_state(), SendState::Sending);
        outbox.complete();
        assert_eq!(outbox.send_state(), SendState::Idle);

        let second = outbox.next().unwrap();
        assert_eq!(second.client_sequence, 2);
        assert_eq!(outbox.pending(), 2);
    }

    #[test]
    fn test_failed_command_is_retried_before_queue_advances() {
        let outbox = Outbox::new();
        outbox.push(cmd(1));
        outbox.push(cmd(2));

        let first = outbox.next().unwrap();
        outbox.fail();
        assert_eq!(outbox.send_state(), SendState::Failed);
        assert_eq!(outbox.next().unwrap(), first);
        assert_eq!(outbox.next().unwrap(), first);

        outbox.complete();
        assert_eq!(outbox.next().unwrap().command, cmd(2));
    }

    #[test]
    fn test_empty_outbox_has_nothing_next() {
        let outbox = Outbox::new();
        assert!(outbox.next().is_none());
        assert_eq!(outbox.send_state(), SendState::Idle);
        assert_eq!(outbox.pending(), 0);
    }

    #[tokio::test]
    async fn test_wait_drained() {
        let outbox = Arc::new(Outbox::new());
        outbox.push(cmd(1));
        assert!(!outbox.wait_drained(Duration::from_millis(10)).await);

        let worker = outbox.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            worker.next();
            worker.complete();
        });
        assert!(outbox.wait_drained(Duration::from_secs(2)).await);
    }
}
