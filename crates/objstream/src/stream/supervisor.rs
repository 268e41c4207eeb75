//! Single-flight reconnection.
//!
//! Readers, writers and the heartbeat report connection failures through a
//! [`ReconnectTrigger`]. The trigger flips an in-flight flag with a
//! compare-and-set before it signals the supervisor task over a channel of
//! capacity 1, so any number of concurrent failure reports collapse into one
//! reconnect attempt.
//!
//! ```text
//!   Idle --(report, flag false→true)--> Reconnecting
//!   Reconnecting --(dial ok: swap, retire old)--> Idle
//!   Reconnecting --(dial attempts exhausted: log)--> Idle
//! ```
//!
//! Reports carry the generation of the failed connection. A report for a
//! connection that has already been replaced is dropped.

use super::shared::{Counters, Shared};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Failure reporting side of the supervisor.
#[derive(Debug)]
pub(crate) struct ReconnectTrigger {
    tx: mpsc::Sender<u64>,
    in_flight: AtomicBool,
}

impl ReconnectTrigger {
    /// Create a trigger and the receiver the supervisor loop listens on.
    pub fn new() -> (Self, mpsc::Receiver<u64>) {
        let (tx, rx) = mpsc::channel(1);
        (
            Self {
                tx,
                in_flight: AtomicBool::new(false),
            },
            rx,
        )
    }

    /// Request a reconnect of connection `generation`.
    ///
    /// Returns `true` if this report started a reconnect and `false` if it
    /// was coalesced into one already in flight.
    pub fn report(&self, generation: u64) -> bool {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Reconnect already in flight, ignoring failure of #{}", generation);
            return false;
        }

        if self.tx.try_send(generation).is_err() {
            // Supervisor has stopped; nothing will clear the flag for us.
            self.in_flight.store(false, Ordering::Release);
            return false;
        }
        true
    }

    pub fn is_reconnecting(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn finish(&self) {
        self.in_flight.store(false, Ordering::Release);
    }
}

/// Supervisor loop: waits for failure reports until the stream terminates.
pub(crate) async fn run(shared: Arc<Shared>, mut failures: mpsc::Receiver<u64>) {
    loop {
        let failed = tokio::select! {
            _ = shared.termination.wait() => break,
            report = failures.recv() => match report {
                Some(generation) => generation,
                None => break,
            },
        };

        tokio::select! {
            _ = shared.termination.wait() => break,
            _ = reconnect(&shared, failed) => {}
        }
        shared.trigger.finish();
    }
    debug!("Reconnect supervisor for {} stopped", shared.connector.address());
}

async fn reconnect(shared: &Shared, failed: u64) {
    let current = shared.current();
    if current.generation() != failed {
        debug!(
            "Connection #{} already replaced by #{}",
            failed,
            current.generation()
        );
        return;
    }

    info!(
        "Connection #{} to {} lost, reconnecting",
        failed,
        shared.connector.address()
    );

    let (result, stats) = shared.connector.dial(failed + 1).await;
    shared
        .counters
        .reconnect_dial_attempts
        .fetch_add(u64::from(stats.attempts), Ordering::Relaxed);

    let conn = match result {
        Ok(conn) => conn,
        Err(e) => {
            Counters::bump(&shared.counters.failed_reconnects);
            match std::error::Error::source(&e) {
                Some(cause) => warn!("Reconnect failed: {}: {}", e, cause),
                None => warn!("Reconnect failed: {}", e),
            }
            return;
        }
    };

    match shared.swap(conn) {
        Ok(old) => {
            Counters::bump(&shared.counters.reconnects);
            old.shutdown().await;
            info!(
                "Reconnected to {} as connection #{}",
                shared.connector.address(),
                failed + 1
            );
        }
        Err(unused) => {
            debug!("Stream closed during reconnect, dropping new connection");
            unused.shutdown().await;
        }
    }
}
