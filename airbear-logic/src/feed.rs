use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::Duration,
};

use log::warn;
use tokio::{
    sync::mpsc,
    time::{Instant, MissedTickBehavior, interval, sleep_until, timeout},
};
use tokio_util::sync::CancellationToken;

use crate::{
    prelude::*,
    vehicle::{RawVehicleRow, VehicleRecord},
};

/// How the feed is currently sourcing updates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    /// Nothing confirmed yet, the initial snapshot and channel are in flight
    Connecting,
    /// Updates are flowing over the push channel
    Live,
    /// Push channel is down, updates come from interval polling while the
    /// channel is silently re-established
    Degraded,
    /// The consumer released interest, nothing will be delivered again
    Unsubscribed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedConfig {
    /// Fixed polling cadence while degraded
    pub poll_interval: Duration,
    /// Bound on snapshot fetches so a hung read can't block the consumer
    pub snapshot_timeout: Duration,
    /// First reconnect delay, doubled per failed attempt
    pub reconnect_backoff: Duration,
    /// Ceiling for the doubling
    pub reconnect_backoff_cap: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            snapshot_timeout: Duration::from_secs(10),
            reconnect_backoff: Duration::from_secs(1),
            reconnect_backoff_cap: Duration::from_secs(30),
        }
    }
}

/// Where a row entered the feed. Re-reads of the whole collection must not
/// churn records a push update already delivered, so snapshot rows only win
/// on a strictly newer timestamp while push rows also win ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpdateSource {
    Snapshot,
    Push,
}

pub trait FeedBackend: Send + Sync + 'static {
    /// Bulk read of every vehicle row currently known upstream
    fn fetch_snapshot(&self) -> impl Future<Output = Result<Vec<RawVehicleRow>>> + Send;
    /// Open the push channel. The receiver yields rows until the channel
    /// drops; dropping the receiver releases the channel on the backend side.
    fn open_channel(&self) -> impl Future<Output = Result<mpsc::Receiver<RawVehicleRow>>> + Send;
}

/// Consumer-side delivery. Updates for one vehicle id arrive in
/// non-decreasing timestamp order; no ordering holds across ids.
pub trait UpdateSink: Send + Sync + 'static {
    fn vehicle_update(&self, record: &VehicleRecord);
    fn status_change(&self, _status: FeedStatus) {}
}

/// A live, deduplicated-by-id collection of vehicle records, sourced from a
/// push channel with a polling fallback. Each subscription owns its own
/// collection and underlying channel; nothing here is process-wide.
pub struct FleetFeed<B: FeedBackend, S: UpdateSink> {
    backend: Arc<B>,
    sink: S,
    config: FeedConfig,
    vehicles: RwLock<HashMap<String, VehicleRecord>>,
    status: RwLock<FeedStatus>,
    cancel: CancellationToken,
}

impl<B: FeedBackend, S: UpdateSink> FleetFeed<B, S> {
    /// Open one feed. Spawns the feed loop, so this must be called from
    /// within a tokio runtime.
    pub fn subscribe(backend: Arc<B>, sink: S, config: FeedConfig) -> Arc<Self> {
        let feed = Arc::new(Self {
            backend,
            sink,
            config,
            vehicles: RwLock::new(HashMap::new()),
            status: RwLock::new(FeedStatus::Connecting),
            cancel: CancellationToken::new(),
        });

        tokio::spawn({
            let feed = feed.clone();
            async move {
                feed.main_loop().await;
            }
        });

        feed
    }

    /// Release the subscription. Idempotent, safe to call at any time
    /// including from inside an update callback; any update arriving after
    /// this returns is a no-op.
    pub fn unsubscribe(&self) {
        self.cancel.cancel();
        let mut status = self.status.write().unwrap();
        if *status != FeedStatus::Unsubscribed {
            *status = FeedStatus::Unsubscribed;
            drop(status);
            self.sink.status_change(FeedStatus::Unsubscribed);
        }
    }

    pub fn status(&self) -> FeedStatus {
        *self.status.read().unwrap()
    }

    /// Snapshot of the current collection
    pub fn current(&self) -> Vec<VehicleRecord> {
        self.vehicles.read().unwrap().values().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<VehicleRecord> {
        self.vehicles.read().unwrap().get(id).cloned()
    }

    fn set_status(&self, status: FeedStatus) {
        let mut current = self.status.write().unwrap();
        if *current == FeedStatus::Unsubscribed || *current == status {
            return;
        }
        *current = status;
        drop(current);
        self.sink.status_change(status);
    }

    /// Merge one row into the collection and notify the sink if it was
    /// accepted. Stale and malformed rows are dropped without touching the
    /// rest of the collection.
    fn apply(&self, raw: RawVehicleRow, source: UpdateSource) {
        if self.cancel.is_cancelled() {
            return;
        }

        let record = match raw.normalize() {
            Ok(record) => record,
            Err(why) => {
                warn!("Dropping malformed vehicle row: {why}");
                return;
            }
        };

        {
            let mut vehicles = self.vehicles.write().unwrap();
            let accept = match vehicles.get(&record.id) {
                None => true,
                Some(existing) => match source {
                    UpdateSource::Push => record.supersedes(existing),
                    UpdateSource::Snapshot => record.updated_at > existing.updated_at,
                },
            };
            if !accept {
                return;
            }
            vehicles.insert(record.id.clone(), record.clone());
        }

        if self.cancel.is_cancelled() {
            return;
        }
        self.sink.vehicle_update(&record);
    }

    async fn main_loop(&self) {
        self.initial_snapshot().await;

        let mut backoff = self.config.reconnect_backoff;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let connect = tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                connect = self.backend.open_channel() => connect,
            };

            match connect {
                Ok(rx) => {
                    backoff = self.config.reconnect_backoff;
                    self.set_status(FeedStatus::Live);
                    if self.live_phase(rx).await {
                        break;
                    }
                }
                Err(why) => {
                    warn!("Vehicle push channel unavailable: {why:?}");
                }
            }

            if self.cancel.is_cancelled() {
                break;
            }

            self.set_status(FeedStatus::Degraded);
            if self.degraded_phase(backoff).await {
                break;
            }
            backoff = (backoff * 2).min(self.config.reconnect_backoff_cap);
        }
    }

    /// One bounded bulk read before anything else so consumers aren't staring
    /// at an empty map while the channel opens. Failure is non-fatal, the
    /// degraded poll pass will retry.
    async fn initial_snapshot(&self) {
        let fetch = timeout(self.config.snapshot_timeout, self.backend.fetch_snapshot());
        let result = tokio::select! {
            biased;

            _ = self.cancel.cancelled() => return,

            result = fetch => result,
        };

        match result {
            Ok(Ok(rows)) => {
                for row in rows {
                    self.apply(row, UpdateSource::Snapshot);
                }
                self.set_status(FeedStatus::Live);
            }
            Ok(Err(why)) => warn!("Initial vehicle snapshot failed: {why:?}"),
            Err(_) => warn!("Initial vehicle snapshot timed out"),
        }
    }

    /// Consume the push channel until it drops. Returns true when cancelled.
    async fn live_phase(&self, mut rx: mpsc::Receiver<RawVehicleRow>) -> bool {
        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => return true,

                row = rx.recv() => match row {
                    Some(row) => self.apply(row, UpdateSource::Push),
                    None => return false,
                },
            }
        }
    }

    /// Poll on the fixed interval until it's time to re-attempt the push
    /// channel. Returns true when cancelled.
    async fn degraded_phase(&self, reconnect_after: Duration) -> bool {
        let deadline = Instant::now() + reconnect_after;
        let mut poll = interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => return true,

                _ = sleep_until(deadline) => return false,

                _ = poll.tick() => self.poll_once().await,
            }
        }
    }

    async fn poll_once(&self) {
        match timeout(self.config.snapshot_timeout, self.backend.fetch_snapshot()).await {
            Ok(Ok(rows)) => {
                for row in rows {
                    self.apply(row, UpdateSource::Snapshot);
                }
            }
            Ok(Err(why)) => warn!("Vehicle poll failed, keeping last known data: {why:?}"),
            Err(_) => warn!("Vehicle poll timed out, keeping last known data"),
        }
    }
}
