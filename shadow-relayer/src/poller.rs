//! Periodic promotion of due withdrawals to the executor.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::watch,
    task::JoinSet,
    time::{self, MissedTickBehavior},
};

use crate::{
    executor::Executor,
    queue::{now_millis, WithdrawalStore},
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct Poller {
    store: WithdrawalStore,
    executor: Arc<Executor>,
}

impl Poller {
    pub fn new(store: WithdrawalStore, executor: Arc<Executor>) -> Self {
        Self { store, executor }
    }

    /// Claims every due withdrawal, then executes them one after another.
    /// Returns how many were claimed.
    pub async fn tick(&self, now_ms: u64) -> usize {
        let claimed = self.store.claim_due(now_ms);
        let count = claimed.len();
        if count > 0 {
            tracing::debug!("poller claimed {} withdrawal(s)", count);
        }
        for withdrawal in claimed {
            // Failures are recorded on the withdrawal itself.
            let _ = self.executor.execute(withdrawal).await;
        }
        count
    }

    /// Ticks every `interval` until `shutdown` flips to `true` or its sender
    /// is dropped. Each tick runs as its own task so scans keep their cadence
    /// while a hop chain is in flight. Returns only after every started tick
    /// has finished, so no claimed withdrawal is left in `processing`.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut in_flight = JoinSet::new();
        tracing::info!("poller started, interval {:?}", interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let poller = self.clone();
                    in_flight.spawn(async move {
                        poller.tick(now_millis()).await;
                    });
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(err) = joined {
                        tracing::error!("poller tick panicked: {}", err);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if !in_flight.is_empty() {
            tracing::info!("poller draining {} in-flight tick(s)", in_flight.len());
        }
        while let Some(joined) = in_flight.join_next().await {
            if let Err(err) = joined {
                tracing::error!("poller tick panicked: {}", err);
            }
        }
        tracing::info!("poller stopped");
    }
}
