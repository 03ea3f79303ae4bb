//! Publishing routing tables as fragments change.
//!
//! # Responsibilities
//! - Hold the currently published table behind an `ArcSwap`
//! - Re-list the store, merge, and swap in the result
//! - Debounce bursts of fragment events into a single reload
//!
//! # Design Decisions
//! - Readers never block: `current()` is a single atomic load
//! - A failed pass leaves the previous table in place
//! - Reload passes are serialized so published versions only move forward

use std::sync::Arc;
use std::time::Duration;
use arc_swap::ArcSwap;
use tokio::sync::{broadcast, Mutex};
use tokio::time::Instant;

use crate::fragments::{FragmentStore, FragmentSubscription};
use crate::observability::metrics;
use crate::routing::aggregator::{AggregationError, ConfigAggregator, MergeOutcome};
use crate::routing::table::RoutingTable;

/// Keeps the published routing table in sync with a fragment store.
pub struct Reloader {
    store: Arc<dyn FragmentStore>,
    aggregator: ConfigAggregator,
    table: ArcSwap<RoutingTable>,
    debounce: Duration,
    pass: Mutex<()>,
}

impl Reloader {
    /// Starts out publishing the empty version-0 table.
    pub fn new(store: Arc<dyn FragmentStore>, aggregator: ConfigAggregator, debounce: Duration) -> Self {
        Self {
            store,
            aggregator,
            table: ArcSwap::from_pointee(RoutingTable::empty()),
            debounce,
            pass: Mutex::new(()),
        }
    }

    /// The published table. Hold on to the `Arc` for the whole request.
    pub fn current(&self) -> Arc<RoutingTable> {
        self.table.load_full()
    }

    pub fn aggregator(&self) -> &ConfigAggregator {
        &self.aggregator
    }

    /// Open an event stream on the underlying store.
    pub fn subscribe(&self) -> Result<FragmentSubscription, crate::fragments::StoreError> {
        self.store.subscribe()
    }

    /// Run one list-merge-publish pass.
    ///
    /// On error the previously published table stays current.
    pub async fn reload(&self) -> Result<Arc<RoutingTable>, AggregationError> {
        let _pass = self.pass.lock().await;
        let started = Instant::now();

        match self.build().await {
            Ok(outcome) => {
                outcome.report().log();
                let table = Arc::new(outcome.table);
                let previous = self.table.swap(Arc::clone(&table));

                metrics::record_reload("success", started.elapsed());
                metrics::record_table(&table);
                tracing::info!(
                    version = table.version(),
                    previous_version = previous.version(),
                    routes = table.route_count(),
                    aggregates = table.aggregate_count(),
                    issues = table.report().issues.len(),
                    "Routing table published"
                );
                Ok(table)
            }
            Err(e) => {
                if let AggregationError::NoValidFragments { report } = &e {
                    report.log();
                }
                metrics::record_reload("failure", started.elapsed());
                tracing::error!(
                    current_version = self.table.load().version(),
                    error = %e,
                    "Reload failed, keeping current routing table"
                );
                Err(e)
            }
        }
    }

    async fn build(&self) -> Result<MergeOutcome, AggregationError> {
        let store = Arc::clone(&self.store);
        let fragments = tokio::task::spawn_blocking(move || store.list())
            .await
            .map_err(|e| AggregationError::Listing(e.to_string()))??;
        self.aggregator.merge(&fragments)
    }

    /// Reload whenever `events` reports a change, until shutdown or the
    /// stream ends.
    ///
    /// The first event opens a debounce window; everything arriving before it
    /// closes is folded into one reload.
    pub async fn run(self: Arc<Self>, mut events: FragmentSubscription, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(debounce_ms = self.debounce.as_millis() as u64, "Fragment reloader started");

        loop {
            let first = tokio::select! {
                _ = shutdown.recv() => break,
                event = events.next() => event,
            };
            let Some(first) = first else {
                tracing::warn!("Fragment event stream ended");
                break;
            };

            let window = Instant::now() + self.debounce;
            let mut coalesced = 1usize;
            let mut stream_ended = false;
            tracing::debug!(event = ?first, "Fragment change detected");

            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        tracing::info!("Fragment reloader stopped");
                        return;
                    }
                    _ = tokio::time::sleep_until(window) => break,
                    event = events.next() => match event {
                        Some(event) => {
                            coalesced += 1;
                            tracing::trace!(?event, "Fragment change coalesced");
                        }
                        None => {
                            stream_ended = true;
                            break;
                        }
                    },
                }
            }

            tracing::debug!(events = coalesced, "Debounce window closed, reloading");
            // Errors are logged by reload; the old table keeps serving.
            let _ = self.reload().await;

            if stream_ended {
                tracing::warn!("Fragment event stream ended");
                break;
            }
        }

        tracing::info!("Fragment reloader stopped");
    }
}

impl std::fmt::Debug for Reloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reloader")
            .field("version", &self.table.load().version())
            .field("debounce", &self.debounce)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::strategy::StrategyRegistry;
    use crate::config::loader::FragmentFormat;
    use crate::config::schema::RouteDefaults;
    use crate::fragments::{FragmentId, MemoryFragmentStore};
    use crate::lifecycle::Shutdown;

    const USERS: &str = r#"
        [[routes]]
        key = "users"
        upstream_path = "/users"
        downstream_path = "/users"
        downstream_hosts = ["svc-users:8080"]
    "#;

    const ORDERS: &str = r#"
        [[routes]]
        key = "orders"
        upstream_path = "/orders"
        downstream_path = "/orders"
        downstream_hosts = ["svc-orders:8080"]
    "#;

    fn reloader(store: Arc<MemoryFragmentStore>, debounce: Duration) -> Arc<Reloader> {
        let aggregator = ConfigAggregator::new(RouteDefaults::default(), Arc::new(StrategyRegistry::default()));
        Arc::new(Reloader::new(store, aggregator, debounce))
    }

    async fn wait_for_version(reloader: &Reloader, version: u64) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while reloader.current().version() < version {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("table version never reached");
    }

    #[tokio::test]
    async fn test_starts_with_empty_table() {
        let r = reloader(Arc::new(MemoryFragmentStore::new()), Duration::from_millis(10));
        assert_eq!(r.current().version(), 0);
        assert_eq!(r.current().route_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_previous_table() {
        let store = Arc::new(MemoryFragmentStore::new());
        store.put("users.toml", FragmentFormat::Toml, USERS);
        let r = reloader(Arc::clone(&store), Duration::from_millis(10));

        let published = r.reload().await.unwrap();
        assert_eq!(published.version(), 1);

        store.remove(&FragmentId::from("users.toml"));
        store.put("broken.toml", FragmentFormat::Toml, "[[routes]\n");
        let err = r.reload().await.unwrap_err();
        assert!(matches!(err, AggregationError::NoValidFragments { .. }));

        let current = r.current();
        assert_eq!(current.version(), 1);
        assert_eq!(current.route_count(), 1);
        assert!(Arc::ptr_eq(&current, &published));
    }

    #[tokio::test]
    async fn test_empty_store_is_not_published() {
        let r = reloader(Arc::new(MemoryFragmentStore::new()), Duration::from_millis(10));
        assert!(r.reload().await.is_err());
        assert_eq!(r.current().version(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_reloads_publish_increasing_versions() {
        let store = Arc::new(MemoryFragmentStore::new());
        store.put("users.toml", FragmentFormat::Toml, USERS);
        let r = reloader(store, Duration::from_millis(10));

        let (a, b) = tokio::join!(r.reload(), r.reload());
        let mut versions = vec![a.unwrap().version(), b.unwrap().version()];
        versions.sort_unstable();

        assert_eq!(versions, vec![1, 2]);
        assert_eq!(r.current().version(), 2);
    }

    #[tokio::test]
    async fn test_held_snapshot_survives_swap() {
        let store = Arc::new(MemoryFragmentStore::new());
        store.put("users.toml", FragmentFormat::Toml, USERS);
        let r = reloader(Arc::clone(&store), Duration::from_millis(10));
        r.reload().await.unwrap();

        let held = r.current();
        store.put("orders.toml", FragmentFormat::Toml, ORDERS);
        r.reload().await.unwrap();

        assert_eq!(held.route_count(), 1);
        assert_eq!(r.current().route_count(), 2);
    }

    #[tokio::test]
    async fn test_burst_of_changes_coalesced_into_one_reload() {
        let store = Arc::new(MemoryFragmentStore::new());
        store.put("users.toml", FragmentFormat::Toml, USERS);
        let r = reloader(Arc::clone(&store), Duration::from_millis(100));
        let shutdown = Shutdown::new();

        let events = r.subscribe().unwrap();
        r.reload().await.unwrap();
        let task = tokio::spawn(Arc::clone(&r).run(events, shutdown.subscribe()));

        store.put("orders.toml", FragmentFormat::Toml, ORDERS);
        store.put("users.toml", FragmentFormat::Toml, format!("precedence = 1\n{USERS}"));
        store.put("orders.toml", FragmentFormat::Toml, format!("precedence = 2\n{ORDERS}"));

        wait_for_version(&r, 2).await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(r.current().version(), 2);
        assert_eq!(r.current().route_count(), 2);

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unchanged_put_triggers_nothing() {
        let store = Arc::new(MemoryFragmentStore::new());
        store.put("users.toml", FragmentFormat::Toml, USERS);
        let r = reloader(Arc::clone(&store), Duration::from_millis(20));
        let shutdown = Shutdown::new();

        let events = r.subscribe().unwrap();
        r.reload().await.unwrap();
        let task = tokio::spawn(Arc::clone(&r).run(events, shutdown.subscribe()));

        assert!(!store.put("users.toml", FragmentFormat::Toml, USERS));
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(r.current().version(), 1);

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }
}
