//! Incoming pipeline: polls the log and replays what other clients did.
//!
//! One request per tick, and the next tick waits for it, so polls never
//! overlap. Ticks missed while a slow request was outstanding are skipped
//! rather than bunched up. Failures are retried on the next tick; the first
//! failure after a successful poll is logged at `warn`, repeats at `debug`.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use we3graph_core::{ApplyContext, Command, Mutation};

use crate::error::SyncError;
use crate::session::{Shared, SyncEvent};
use crate::stats::{bump, FailureStreak};
use crate::transport::Transport;

/// Polls on `poll_interval` until shutdown.
pub(crate) async fn run_poller<T: Transport>(
    shared: Arc<Shared<T>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(shared.config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut streak = FailureStreak::default();
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        let result = tokio::select! {
            result = poll_once(&*shared) => result,
            _ = shutdown.changed() => break,
        };
        match result {
            Ok(_) => streak.succeeded(),
            Err(e) => log::log!(
                streak.failed(),
                "Poll for graph {} failed: {e}",
                shared.config.graph_id
            ),
        }
    }
    log::debug!("Poller for client {} stopped", shared.client_id);
}

/// One poll: fetch the page after `last_seen` and replay it. Returns the
/// number of commands read.
pub(crate) async fn poll_once<T: Transport>(shared: &Shared<T>) -> Result<usize, SyncError> {
    let loading = shared.loading.load(Ordering::Acquire);
    if shared.silent.load(Ordering::Relaxed) && !loading {
        return Ok(0);
    }

    bump(&shared.stats.polls);
    let after = shared.last_seen.load(Ordering::Acquire);
    let records = match shared
        .client
        .get_commands(&shared.token, after, shared.config.history)
        .await
    {
        Ok(records) => records,
        Err(e) => return Err(poll_failed(shared, e)),
    };

    // Validate the whole page before touching the store
    let commands = match records
        .iter()
        .filter(|record| record.id > after)
        .map(|record| record.to_command())
        .collect::<Result<Vec<Command>, _>>()
    {
        Ok(commands) => commands,
        Err(e) => {
            let e = SyncError::MalformedResponse(e.to_string());
            return Err(poll_failed(shared, e));
        }
    };
    shared.report_reachable();

    if commands.is_empty() {
        if loading && shared.finish_loading() {
            log::info!(
                "Graph {} loaded up to #{after}",
                shared.config.graph_id
            );
            shared.emit(SyncEvent::GraphLoaded);
        }
        return Ok(0);
    }

    let ctx = ApplyContext {
        loading,
        receive_camera: shared.receive_camera.load(Ordering::Relaxed),
    };
    let mut events = Vec::new();
    {
        let mut replica = shared.lock_replica();
        for command in &commands {
            let sequence = command.sequence.unwrap_or(after);
            // Own commands were applied when they were issued
            if command.client_id == Some(shared.client_id) {
                observe_own_insert(shared, command);
                bump(&shared.stats.echoes_skipped);
                shared.last_seen.store(sequence, Ordering::Release);
                continue;
            }
            match replica.apply(command.clone(), &ctx) {
                Ok(applied) => {
                    bump(&shared.stats.commands_applied);
                    events.extend(applied);
                }
                Err(e) => log::warn!("Skipping command #{sequence}: {e}"),
            }
            shared.last_seen.store(sequence, Ordering::Release);
        }
    }

    if !events.is_empty() {
        shared.emit(SyncEvent::GraphChanged(events));
    }
    Ok(commands.len())
}

/// Counts a failed poll. Retryable failures, malformed pages included,
/// mean the service is unreachable.
fn poll_failed<T>(shared: &Shared<T>, e: SyncError) -> SyncError {
    bump(&shared.stats.poll_failures);
    if e.is_retryable() {
        shared.report_unreachable();
    }
    e
}

/// Keeps the allocator ahead of ids this client already minted.
fn observe_own_insert<T>(shared: &Shared<T>, command: &Command) {
    match command.decode() {
        Ok(Mutation::InsertVertex { id, .. }) | Ok(Mutation::InsertEdge { id, .. })
            if id.owner == shared.client_id =>
        {
            shared.allocator.observe(id.sequence);
        }
        _ => {}
    }
}
