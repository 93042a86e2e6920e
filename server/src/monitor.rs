use crate::state::ServerState;
use shared::logger;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

/// Sweeps the heartbeat table every `interval`, evicting connections silent for longer
/// than `timeout`. Runs until its task is aborted.
pub async fn run(state: Arc<ServerState>, interval: Duration, timeout: Duration) {
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if !state.is_running() {
            break;
        }
        let evicted = state.evict_stale(Instant::now(), timeout).await;
        if evicted > 0 {
            logger::log_info(&format!("Evicted {} silent connection(s)", evicted));
        }
    }
}
