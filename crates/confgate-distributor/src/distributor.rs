//! The change distributor control loop.
//!
//! All mutable state lives inside one task fed by a bounded mailbox; no
//! lock guards the version allocator, the current snapshot, or the waiter
//! registry. The loop publishes every new snapshot through a watch
//! channel so immediate readers never round-trip through the mailbox, and
//! dispatches readiness recomputation to its own task (bounded to one in
//! flight) so storage latency never stalls event intake.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use confgate_core::{Configuration, ReadySet, Version};
use confgate_state::{ConfigStore, StoreError};

/// Debounce tuning for the change distributor.
#[derive(Debug, Clone)]
pub struct DistributorConfig {
    /// Quiet period after the most recent change event before the batch
    /// settles.
    pub debounce_window: Duration,
    /// Upper bound on how long a batch may keep absorbing events before
    /// it settles regardless of ongoing churn.
    pub debounce_cap: Duration,
    /// Mailbox depth for control messages.
    pub mailbox_capacity: usize,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            debounce_window: Duration::from_millis(300),
            debounce_cap: Duration::from_secs(2),
            mailbox_capacity: 64,
        }
    }
}

/// Error delivered to parked waiters when their settle failed to
/// recompute.
#[derive(Debug, Clone, Error)]
#[error("readiness recomputation failed: {0}")]
pub struct RecomputeError(pub String);

/// What a parked waiter receives: the fresh snapshot, or the error of the
/// settle that failed while it was parked.
pub type Delivery = Result<Arc<ReadySet>, RecomputeError>;

/// The change distributor is no longer running.
#[derive(Debug, Error)]
#[error("change distributor is not running")]
pub struct DistributorClosed;

pub type WaiterId = u64;

/// One parked long-poll request. Exactly one of delivery or caller-side
/// timeout (followed by [`DistributorHandle::unsubscribe`]) ends it.
#[derive(Debug)]
pub struct Waiter {
    pub id: WaiterId,
    pub delivery: oneshot::Receiver<Delivery>,
}

enum Msg {
    Event,
    Subscribe {
        reply: oneshot::Sender<Waiter>,
    },
    Unsubscribe {
        id: WaiterId,
    },
    RecomputeDone {
        version: Version,
        result: Result<Vec<Configuration>, StoreError>,
    },
}

/// Cloneable handle for talking to a running [`ChangeDistributor`].
#[derive(Clone)]
pub struct DistributorHandle {
    tx: mpsc::Sender<Msg>,
    current: watch::Receiver<Arc<ReadySet>>,
}

impl DistributorHandle {
    /// The latest readiness snapshot. Never blocks; the loop publishes on
    /// every successful settle.
    pub fn current_snapshot(&self) -> Arc<ReadySet> {
        self.current.borrow().clone()
    }

    /// Signal that a blob became available. Coalesced by the debounce
    /// logic; returns once the event is enqueued, never waiting for the
    /// recomputation itself.
    pub async fn record_event(&self) {
        if self.tx.send(Msg::Event).await.is_err() {
            debug!("change event dropped, distributor not running");
        }
    }

    /// Park a waiter until the next settle delivers to it.
    pub async fn subscribe(&self) -> Result<Waiter, DistributorClosed> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Msg::Subscribe { reply: reply_tx })
            .await
            .map_err(|_| DistributorClosed)?;
        reply_rx.await.map_err(|_| DistributorClosed)
    }

    /// Remove a parked waiter without delivery. A no-op when a delivery
    /// already consumed it, so timed-out callers can call this
    /// unconditionally.
    pub async fn unsubscribe(&self, id: WaiterId) {
        let _ = self.tx.send(Msg::Unsubscribe { id }).await;
    }
}

/// Single control loop owning readiness state. Built with [`new`](Self::new),
/// driven by [`run`](Self::run) on its own task.
pub struct ChangeDistributor {
    store: Arc<dyn ConfigStore>,
    cfg: DistributorConfig,
    mailbox: mpsc::Receiver<Msg>,
    /// Completions of spawned recomputations come back through the mailbox.
    self_tx: mpsc::Sender<Msg>,
    published: watch::Sender<Arc<ReadySet>>,

    next_version: Version,
    current: Arc<ReadySet>,
    waiters: HashMap<WaiterId, oneshot::Sender<Delivery>>,
    next_waiter_id: WaiterId,

    first_event_at: Option<Instant>,
    settle_at: Option<Instant>,
    recompute_inflight: bool,
}

impl ChangeDistributor {
    /// Seed the initial snapshot from the store and build the loop plus a
    /// handle to it. The version allocator starts from the persisted
    /// sequence token when it parses as an integer.
    pub fn new(store: Arc<dyn ConfigStore>, cfg: DistributorConfig) -> (Self, DistributorHandle) {
        let boot_version = bootstrap_version(store.as_ref());
        let initial = match store.ready_configurations(None) {
            Ok(configurations) => ReadySet {
                version: boot_version,
                configurations,
            },
            Err(e) => {
                warn!(error = %e, "initial readiness resolve failed, starting empty");
                ReadySet::empty(boot_version)
            }
        };
        info!(
            version = initial.version,
            ready = initial.configurations.len(),
            "readiness seeded"
        );

        let current = Arc::new(initial);
        let (tx, mailbox) = mpsc::channel(cfg.mailbox_capacity);
        let (published, watch_rx) = watch::channel(current.clone());

        let distributor = Self {
            store,
            cfg,
            mailbox,
            self_tx: tx.clone(),
            published,
            next_version: current.version,
            current,
            waiters: HashMap::new(),
            next_waiter_id: 0,
            first_event_at: None,
            settle_at: None,
            recompute_inflight: false,
        };
        let handle = DistributorHandle {
            tx,
            current: watch_rx,
        };
        (distributor, handle)
    }

    /// Run the control loop until the shutdown signal flips.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            window_ms = self.cfg.debounce_window.as_millis() as u64,
            cap_ms = self.cfg.debounce_cap.as_millis() as u64,
            "change distributor started"
        );
        loop {
            // A settle that fires while a recomputation is in flight stays
            // parked; RecomputeDone re-arms it for the loop's next turn.
            let armed = self.settle_at.is_some() && !self.recompute_inflight;
            let settle_at = self.settle_at.unwrap_or_else(Instant::now);
            tokio::select! {
                maybe = self.mailbox.recv() => match maybe {
                    Some(msg) => self.handle(msg),
                    None => break,
                },
                _ = sleep_until(settle_at), if armed => self.begin_recompute(),
                _ = shutdown.changed() => {
                    info!("change distributor shutting down");
                    break;
                }
            }
        }
        // Dropping the loop drops parked waiters' senders; blocked callers
        // observe the closed channel rather than hanging.
    }

    fn handle(&mut self, msg: Msg) {
        match msg {
            Msg::Event => self.on_event(),
            Msg::Subscribe { reply } => self.on_subscribe(reply),
            Msg::Unsubscribe { id } => {
                if self.waiters.remove(&id).is_some() {
                    debug!(waiter = id, "waiter unsubscribed");
                }
            }
            Msg::RecomputeDone { version, result } => self.on_recompute_done(version, result),
        }
    }

    fn on_event(&mut self) {
        let now = Instant::now();
        let first = *self.first_event_at.get_or_insert(now);
        // Each event pushes the settle out by one quiet window; the batch
        // never outlives the hard cap measured from its first event.
        self.settle_at =
            Some((now + self.cfg.debounce_window).min(first + self.cfg.debounce_cap));
    }

    fn on_subscribe(&mut self, reply: oneshot::Sender<Waiter>) {
        let id = self.next_waiter_id;
        self.next_waiter_id += 1;
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(id, tx);
        debug!(waiter = id, parked = self.waiters.len(), "waiter subscribed");
        if reply.send(Waiter { id, delivery: rx }).is_err() {
            // Requester vanished between asking and receiving.
            self.waiters.remove(&id);
        }
    }

    fn begin_recompute(&mut self) {
        self.first_event_at = None;
        self.settle_at = None;
        self.recompute_inflight = true;
        self.next_version += 1;
        let version = self.next_version;

        let store = self.store.clone();
        let tx = self.self_tx.clone();
        debug!(version, "batch settled, recomputing readiness");
        tokio::spawn(async move {
            let result = store.ready_configurations(None);
            let _ = tx.send(Msg::RecomputeDone { version, result }).await;
        });
    }

    fn on_recompute_done(
        &mut self,
        version: Version,
        result: Result<Vec<Configuration>, StoreError>,
    ) {
        self.recompute_inflight = false;
        let waiters = std::mem::take(&mut self.waiters);
        match result {
            Ok(configurations) => {
                let snapshot = Arc::new(ReadySet {
                    version,
                    configurations,
                });
                self.current = snapshot.clone();
                let _ = self.published.send(snapshot.clone());
                let delivered = waiters.len();
                for (_, waiter) in waiters {
                    let _ = waiter.send(Ok(snapshot.clone()));
                }
                debug!(
                    version,
                    ready = self.current.configurations.len(),
                    delivered,
                    "readiness snapshot distributed"
                );
            }
            Err(e) => {
                // The previous snapshot stays current; the failed batch's
                // version is spent and never attached to a snapshot.
                warn!(error = %e, version, "readiness recomputation failed");
                let message = e.to_string();
                for (_, waiter) in waiters {
                    let _ = waiter.send(Err(RecomputeError(message.clone())));
                }
            }
        }
    }
}

fn bootstrap_version(store: &dyn ConfigStore) -> Version {
    match store.last_sequence_token() {
        Ok(Some(token)) => token.parse().unwrap_or(0),
        Ok(None) => 0,
        Err(e) => {
            warn!(error = %e, "could not read last sequence token, starting at version 0");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confgate_state::{RedbStore, StoreResult};
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::time::{sleep, timeout};

    fn bundle(id: &str, bean: &str, resource: &str) -> Configuration {
        Configuration {
            id: id.to_string(),
            org_id: "org-1".to_string(),
            env_id: "test".to_string(),
            bean_blob_id: bean.to_string(),
            resource_blob_id: resource.to_string(),
            config_type: "CONFIGURATION".to_string(),
            name: format!("bundle-{id}"),
            revision: "1".to_string(),
            path: format!("/organizations/org-1/{id}"),
            created: "2017-06-22 16:41:02.334".to_string(),
            created_by: "sync@local".to_string(),
            updated: "2017-06-22 16:41:02.334".to_string(),
            updated_by: "sync@local".to_string(),
        }
    }

    fn fast_config() -> DistributorConfig {
        DistributorConfig {
            debounce_window: Duration::from_millis(40),
            debounce_cap: Duration::from_millis(200),
            mailbox_capacity: 16,
        }
    }

    fn spawn_over(store: Arc<dyn ConfigStore>) -> (DistributorHandle, watch::Sender<bool>) {
        let (distributor, handle) = ChangeDistributor::new(store, fast_config());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(distributor.run(shutdown_rx));
        (handle, shutdown_tx)
    }

    /// Store double whose readiness query can be toggled to fail.
    struct FlakyStore {
        inner: RedbStore,
        fail: AtomicBool,
    }

    impl FlakyStore {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                inner: RedbStore::open_in_memory().unwrap(),
                fail: AtomicBool::new(false),
            })
        }
    }

    impl ConfigStore for FlakyStore {
        fn ready_configurations(
            &self,
            type_filter: Option<&str>,
        ) -> StoreResult<Vec<Configuration>> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StoreError::Read("simulated outage".to_string()));
            }
            self.inner.ready_configurations(type_filter)
        }

        fn unready_blob_ids(&self) -> StoreResult<BTreeSet<String>> {
            self.inner.unready_blob_ids()
        }

        fn configuration_by_id(&self, id: &str) -> StoreResult<Option<Configuration>> {
            self.inner.configuration_by_id(id)
        }

        fn record_blob_local_path(&self, blob_id: &str, local_path: &str) -> StoreResult<bool> {
            self.inner.record_blob_local_path(blob_id, local_path)
        }

        fn blob_local_path(&self, blob_id: &str) -> StoreResult<Option<String>> {
            self.inner.blob_local_path(blob_id)
        }

        fn last_sequence_token(&self) -> StoreResult<Option<String>> {
            self.inner.last_sequence_token()
        }
    }

    #[tokio::test]
    async fn event_settles_after_quiet_window() {
        let store = Arc::new(RedbStore::open_in_memory().unwrap());
        let (handle, _shutdown) = spawn_over(store.clone());
        assert_eq!(handle.current_snapshot().version, 0);

        store.put_configuration(&bundle("c1", "b1", "")).unwrap();
        store.record_blob_local_path("b1", "/blobs/b1").unwrap();
        handle.record_event().await;

        sleep(Duration::from_millis(120)).await;
        let snapshot = handle.current_snapshot();
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.configurations.len(), 1);
        assert_eq!(snapshot.configurations[0].id, "c1");
    }

    #[tokio::test]
    async fn burst_coalesces_into_one_settle() {
        let store = Arc::new(RedbStore::open_in_memory().unwrap());
        let (handle, _shutdown) = spawn_over(store.clone());

        for _ in 0..5 {
            handle.record_event().await;
            sleep(Duration::from_millis(5)).await;
        }
        sleep(Duration::from_millis(150)).await;

        // One version step for the whole burst.
        assert_eq!(handle.current_snapshot().version, 1);
    }

    #[tokio::test]
    async fn sustained_churn_settles_at_cap() {
        let store = Arc::new(RedbStore::open_in_memory().unwrap());
        let (handle, _shutdown) = spawn_over(store.clone());

        // Events every 20ms never leave a 40ms quiet window, so only the
        // 200ms cap can settle the batch.
        let churn = handle.clone();
        let feeder = tokio::spawn(async move {
            for _ in 0..16 {
                churn.record_event().await;
                sleep(Duration::from_millis(20)).await;
            }
        });

        sleep(Duration::from_millis(280)).await;
        assert!(
            handle.current_snapshot().version >= 1,
            "cap did not force a settle under churn"
        );
        feeder.await.unwrap();
    }

    #[tokio::test]
    async fn waiter_receives_next_snapshot() {
        let store = Arc::new(RedbStore::open_in_memory().unwrap());
        let (handle, _shutdown) = spawn_over(store.clone());

        let waiter = handle.subscribe().await.unwrap();
        store.put_configuration(&bundle("c1", "b1", "")).unwrap();
        store.record_blob_local_path("b1", "/blobs/b1").unwrap();
        handle.record_event().await;

        let delivery = timeout(Duration::from_secs(1), waiter.delivery)
            .await
            .expect("delivery before timeout")
            .expect("distributor alive")
            .expect("recompute ok");
        assert_eq!(delivery.version, 1);
        assert_eq!(delivery.configurations.len(), 1);
    }

    #[tokio::test]
    async fn ten_waiters_all_delivered_same_version() {
        let store = Arc::new(RedbStore::open_in_memory().unwrap());
        let (handle, _shutdown) = spawn_over(store.clone());

        let mut waiters = Vec::new();
        for _ in 0..10 {
            waiters.push(handle.subscribe().await.unwrap());
        }

        handle.record_event().await;

        for waiter in waiters {
            let delivery = timeout(Duration::from_secs(1), waiter.delivery)
                .await
                .expect("delivery before timeout")
                .expect("distributor alive")
                .expect("recompute ok");
            assert_eq!(delivery.version, 1);
        }
    }

    #[tokio::test]
    async fn unsubscribed_waiter_gets_no_delivery() {
        let store = Arc::new(RedbStore::open_in_memory().unwrap());
        let (handle, _shutdown) = spawn_over(store.clone());

        let waiter = handle.subscribe().await.unwrap();
        handle.unsubscribe(waiter.id).await;
        // Unsubscribing twice is a no-op, not an error.
        handle.unsubscribe(waiter.id).await;

        handle.record_event().await;
        sleep(Duration::from_millis(120)).await;

        // The settle happened without the waiter.
        assert_eq!(handle.current_snapshot().version, 1);
        assert!(waiter.delivery.await.is_err());
    }

    #[tokio::test]
    async fn failed_recompute_delivers_error_and_keeps_snapshot() {
        let store = FlakyStore::new();
        store.inner.put_configuration(&bundle("c1", "b1", "")).unwrap();
        store.inner.record_blob_local_path("b1", "/blobs/b1").unwrap();

        let (handle, _shutdown) = spawn_over(store.clone());
        assert_eq!(handle.current_snapshot().configurations.len(), 1);

        store.fail.store(true, Ordering::SeqCst);
        let waiter = handle.subscribe().await.unwrap();
        handle.record_event().await;

        let delivery = timeout(Duration::from_secs(1), waiter.delivery)
            .await
            .expect("delivery before timeout")
            .expect("distributor alive");
        assert!(delivery.is_err());

        // The previous snapshot is still current.
        let snapshot = handle.current_snapshot();
        assert_eq!(snapshot.version, 0);
        assert_eq!(snapshot.configurations.len(), 1);

        // The loop survives: the next settle succeeds and skips the spent
        // version.
        store.fail.store(false, Ordering::SeqCst);
        let waiter = handle.subscribe().await.unwrap();
        handle.record_event().await;

        let delivery = timeout(Duration::from_secs(1), waiter.delivery)
            .await
            .expect("delivery before timeout")
            .expect("distributor alive")
            .expect("recompute ok");
        assert_eq!(delivery.version, 2);
    }

    #[tokio::test]
    async fn bootstrap_version_from_sequence_token() {
        let store = Arc::new(RedbStore::open_in_memory().unwrap());
        store.set_last_sequence_token("41").unwrap();

        let (handle, _shutdown) = spawn_over(store.clone());
        assert_eq!(handle.current_snapshot().version, 41);

        handle.record_event().await;
        sleep(Duration::from_millis(120)).await;
        assert_eq!(handle.current_snapshot().version, 42);
    }

    #[tokio::test]
    async fn unparseable_sequence_token_starts_at_zero() {
        let store = Arc::new(RedbStore::open_in_memory().unwrap());
        store.set_last_sequence_token("snapshot-9f2c").unwrap();

        let (handle, _shutdown) = spawn_over(store);
        assert_eq!(handle.current_snapshot().version, 0);
    }

    #[tokio::test]
    async fn shutdown_fails_new_subscriptions() {
        let store = Arc::new(RedbStore::open_in_memory().unwrap());
        let (handle, shutdown) = spawn_over(store);

        shutdown.send(true).unwrap();
        sleep(Duration::from_millis(50)).await;

        assert!(handle.subscribe().await.is_err());
    }
}
