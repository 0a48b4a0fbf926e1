//! In-process cache of the fulfillment locations.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use common::LocationId;
use domain::OrderLocation;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::services::{DirectoryError, LocationDirectory};

/// Immutable view of the location list at one refresh.
#[derive(Debug, Default)]
pub struct LocationSnapshot {
    locations: Vec<OrderLocation>,
    index: HashMap<LocationId, usize>,
}

impl LocationSnapshot {
    pub fn new(locations: Vec<OrderLocation>) -> Self {
        let index = locations
            .iter()
            .enumerate()
            .map(|(i, location)| (location.id, i))
            .collect();
        Self { locations, index }
    }

    pub fn locations(&self) -> &[OrderLocation] {
        &self.locations
    }

    pub fn get(&self, id: LocationId) -> Option<&OrderLocation> {
        self.index.get(&id).map(|&i| &self.locations[i])
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}

struct RefreshTask {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

/// Process-wide location registry.
///
/// Reads go against an `Arc` snapshot that a refresh replaces wholesale,
/// so readers never see a half-applied update and never wait on the
/// directory. A failed refresh keeps the previous snapshot.
pub struct LocationRegistry {
    directory: Arc<dyn LocationDirectory>,
    refresh_interval: Duration,
    snapshot: RwLock<Arc<LocationSnapshot>>,
    task: Mutex<Option<RefreshTask>>,
}

impl LocationRegistry {
    /// Creates an empty registry. Nothing is fetched until [`refresh`] or
    /// [`start`] is called.
    ///
    /// [`refresh`]: LocationRegistry::refresh
    /// [`start`]: LocationRegistry::start
    pub fn new(directory: Arc<dyn LocationDirectory>, refresh_interval: Duration) -> Self {
        Self {
            directory,
            refresh_interval,
            snapshot: RwLock::new(Arc::new(LocationSnapshot::default())),
            task: Mutex::new(None),
        }
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<LocationSnapshot> {
        let guard = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&*guard)
    }

    /// All known locations.
    pub fn locations(&self) -> Vec<OrderLocation> {
        self.snapshot().locations().to_vec()
    }

    /// Looks up a location by id.
    pub fn by_id(&self, id: LocationId) -> Option<OrderLocation> {
        self.snapshot().get(id).cloned()
    }

    /// Fetches the directory and swaps in a new snapshot.
    ///
    /// Returns the number of locations now known.
    #[tracing::instrument(skip(self))]
    pub async fn refresh(&self) -> Result<usize, DirectoryError> {
        match self.directory.fetch_locations().await {
            Ok(locations) => {
                let snapshot = Arc::new(LocationSnapshot::new(locations));
                let count = snapshot.len();
                *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
                tracing::debug!(count, "location registry refreshed");
                Ok(count)
            }
            Err(e) => {
                metrics::counter!("location_registry_refresh_failures_total").increment(1);
                tracing::warn!(error = %e, "location refresh failed, keeping previous snapshot");
                Err(e)
            }
        }
    }

    /// Spawns the refresh loop. The first refresh runs immediately.
    ///
    /// Calling `start` on a running registry does nothing.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            return;
        }

        let shutdown = CancellationToken::new();
        let registry = Arc::clone(self);
        let token = shutdown.clone();
        let handle = tokio::spawn(async move { registry.refresh_loop(token).await });

        *task = Some(RefreshTask { shutdown, handle });
        tracing::info!(interval_secs = self.refresh_interval.as_secs(), "location registry started");
    }

    /// Stops the refresh loop and waits for it to exit.
    pub async fn stop(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.shutdown.cancel();
            if let Err(e) = task.handle.await {
                tracing::warn!(error = %e, "location refresh task ended abnormally");
            }
            tracing::info!("location registry stopped");
        }
    }

    /// Returns true while the refresh loop is running.
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    async fn refresh_loop(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.refresh_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    // Failures are logged inside refresh.
                    let _ = self.refresh().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::InMemoryLocationDirectory;
    use domain::{Address, GridPoint};

    fn location(id: i64) -> OrderLocation {
        OrderLocation::new(
            LocationId::new(id),
            format!("L{id}"),
            Address::new("PT", "Coimbra", GridPoint::new(id, id)),
            format!("http://l{id}.local"),
        )
    }

    #[tokio::test]
    async fn test_registry_is_empty_before_refresh() {
        let directory = InMemoryLocationDirectory::with_locations(vec![location(1)]);
        let registry = LocationRegistry::new(Arc::new(directory), Duration::from_secs(60));

        assert!(registry.locations().is_empty());
        assert!(registry.by_id(LocationId::new(1)).is_none());
    }

    #[tokio::test]
    async fn test_refresh_swaps_snapshot() {
        let directory = InMemoryLocationDirectory::with_locations(vec![location(1), location(2)]);
        let registry = LocationRegistry::new(Arc::new(directory.clone()), Duration::from_secs(60));

        assert_eq!(registry.refresh().await.unwrap(), 2);
        let before = registry.snapshot();

        directory.set_locations(vec![location(3)]);
        registry.refresh().await.unwrap();

        // Old snapshots stay intact for readers still holding them.
        assert_eq!(before.len(), 2);
        assert_eq!(registry.locations().len(), 1);
        assert!(registry.by_id(LocationId::new(3)).is_some());
        assert!(registry.by_id(LocationId::new(1)).is_none());
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_snapshot() {
        let directory = InMemoryLocationDirectory::with_locations(vec![location(1)]);
        let registry = LocationRegistry::new(Arc::new(directory.clone()), Duration::from_secs(60));
        registry.refresh().await.unwrap();

        directory.set_fail_on_fetch(true);
        assert!(registry.refresh().await.is_err());
        assert_eq!(registry.locations(), vec![location(1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_refreshes_on_interval_until_stopped() {
        let directory = InMemoryLocationDirectory::with_locations(vec![location(1)]);
        let registry = Arc::new(LocationRegistry::new(
            Arc::new(directory.clone()),
            Duration::from_secs(10),
        ));

        registry.start();
        registry.start();
        assert!(registry.is_running());

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(directory.fetch_count(), 1);
        assert_eq!(registry.locations().len(), 1);

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(directory.fetch_count(), 3);

        registry.stop().await;
        assert!(!registry.is_running());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(directory.fetch_count(), 3);
    }
}
