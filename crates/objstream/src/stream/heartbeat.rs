//! Periodic liveness traffic.
//!
//! Every tick writes the pre-encoded liveness frame through the normal
//! locked write path. A failed write is reported to the supervisor by that
//! path like any other connection failure; the heartbeat never reconnects on
//! its own.

use super::shared::{Counters, Shared};
use crate::StreamError;
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, warn};

/// Build the heartbeat task. The first beat is due one period after this
/// call, not after the task is first polled.
pub(crate) fn run(
    shared: Arc<Shared>,
    period: Duration,
    frame: Bytes,
) -> impl Future<Output = ()> + Send + 'static {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    async move {
        beat(&shared, &mut ticker, &frame).await;
        debug!("Heartbeat for {} stopped", shared.connector.address());
    }
}

async fn beat(shared: &Shared, ticker: &mut Interval, frame: &[u8]) {
    loop {
        tokio::select! {
            _ = shared.termination.wait() => break,
            _ = ticker.tick() => {}
        }

        match shared.send_frame(frame).await {
            Ok(()) => {
                Counters::bump(&shared.counters.heartbeats_sent);
                debug!("Heartbeat sent to {}", shared.connector.address());
            }
            Err(StreamError::Closed) => break,
            Err(e) => {
                Counters::bump(&shared.counters.heartbeat_failures);
                warn!("Heartbeat to {} failed: {}", shared.connector.address(), e);
            }
        }
    }
}
