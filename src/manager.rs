//! Connection orchestration: resolve, fetch, load, connect, register.
//!
//! One manager owns the whole acquisition pipeline. Each `connect` request
//! walks a fresh entry through `Resolving → Downloading → Loading →
//! Connecting → Connected`, publishing lifecycle events along the way. The
//! registry only learns a name once its entry reaches `Connecting`, so
//! earlier-stage failures never occupy the name as active — they are still
//! recorded as terminal `Failed` entries so nothing fails silently.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_lock::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::catalog::{DriverCatalog, DriverReference, DriverResolver, DriverTarget};
use crate::connectors::ConnectParams;
use crate::error::{ConnectError, Error, FetchError, reason_chain};
use crate::events::{LifecycleEvent, LifecycleNotifier};
use crate::fetch::{CachedArtifact, DriverFetcher};
use crate::loader::{DriverLoader, LoadedDriver};
use crate::paths::StorageRoot;
use crate::registry::{ConnectionEntry, ConnectionRegistry, ConnectionStatus};

/// Tunables for the orchestration pipeline.
///
/// The manager is the retry boundary: only network failures during fetch are
/// retried. Load failures and authentication rejections never are — a bad
/// artifact or a bad password does not get better by asking again.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub connect_timeout: Duration,
    /// Additional fetch attempts after a network failure.
    pub fetch_retries: u32,
    /// Backoff before retry `n` is `retry_backoff * n`.
    pub retry_backoff: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            fetch_retries: 2,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

/// Outcome of [`ConnectionManager::disconnect_all`].
#[derive(Debug, Clone, Default)]
pub struct DisconnectReport {
    pub closed: Vec<String>,
    /// Connections that failed to close, with the rendered failure reason.
    pub failed: Vec<(String, String)>,
}

impl DisconnectReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Orchestrates driver acquisition and tracks named connections.
pub struct ConnectionManager {
    resolver: DriverResolver,
    fetcher: DriverFetcher,
    loader: DriverLoader,
    registry: ConnectionRegistry,
    notifier: LifecycleNotifier,
    /// Names with a connect attempt currently running.
    in_flight: Mutex<HashSet<String>>,
    config: ManagerConfig,
}

impl ConnectionManager {
    /// Manager with default wiring: catalog-backed resolver, HTTP fetcher
    /// caching under the storage root, built-in connector table.
    pub fn new(catalog: DriverCatalog, root: &StorageRoot) -> Self {
        let notifier = LifecycleNotifier::new();
        let fetcher = DriverFetcher::new(root.drivers_dir(), notifier.clone());
        let loader = DriverLoader::new(notifier.clone());
        Self::with_parts(
            DriverResolver::new(catalog),
            fetcher,
            loader,
            notifier,
            ManagerConfig::default(),
        )
    }

    /// Manager from explicitly constructed parts.
    pub fn with_parts(
        resolver: DriverResolver,
        fetcher: DriverFetcher,
        loader: DriverLoader,
        notifier: LifecycleNotifier,
        config: ManagerConfig,
    ) -> Self {
        Self {
            resolver,
            fetcher,
            loader,
            registry: ConnectionRegistry::new(),
            notifier,
            in_flight: Mutex::new(HashSet::new()),
            config,
        }
    }

    pub fn notifier(&self) -> &LifecycleNotifier {
        &self.notifier
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> async_channel::Receiver<LifecycleEvent> {
        self.notifier.subscribe()
    }

    pub fn resolver(&self) -> &DriverResolver {
        &self.resolver
    }

    pub fn loader(&self) -> &DriverLoader {
        &self.loader
    }

    /// Establish a named connection, acquiring the driver on demand.
    ///
    /// Fails fast with [`Error::InFlight`] while another attempt for the
    /// same name is running, and with [`Error::DuplicateName`] while an
    /// active entry owns the name. Any stage failure is recorded as a
    /// terminal `Failed` entry and surfaced through exactly one
    /// [`LifecycleEvent::ConnectionFailed`].
    pub async fn connect(
        &self,
        name: &str,
        target: DriverTarget,
        params: ConnectParams,
    ) -> Result<ConnectionEntry, Error> {
        self.begin(name).await?;

        let mut draft = ConnectionEntry::new(name);
        let result = self.drive(&mut draft, &target, &params).await;
        let outcome = match result {
            Ok(entry) => Ok(entry),
            Err(err) => {
                let reason = reason_chain(&err);
                warn!(name, %reason, "connection attempt failed");
                self.record_failure(draft, &reason).await;
                self.notifier.publish(LifecycleEvent::ConnectionFailed {
                    name: name.to_string(),
                    reason,
                });
                Err(err)
            }
        };

        self.finish(name).await;
        outcome
    }

    /// Like [`connect`](Self::connect), with a generated connection name.
    pub async fn connect_unnamed(
        &self,
        target: DriverTarget,
        params: ConnectParams,
    ) -> Result<ConnectionEntry, Error> {
        let name = Self::generate_name();
        self.connect(&name, target, params).await
    }

    /// Resolve, fetch, and load a driver without opening a connection.
    ///
    /// Lets a host warm a driver before first use; `connect` performs the
    /// same steps internally.
    pub async fn ensure_driver_ready(
        &self,
        target: &DriverTarget,
    ) -> Result<Arc<LoadedDriver>, Error> {
        let reference = self.resolver.resolve(target).await?;
        let artifact = self.fetch_with_retry(&reference).await?;
        let driver = self.loader.load(&reference, &artifact).await?;
        Ok(driver)
    }

    /// Close a connected entry and release its underlying handle.
    pub async fn close(&self, name: &str) -> Result<(), Error> {
        let entry = self.registry.get(name).await.ok_or_else(|| Error::NotFound {
            name: name.to_string(),
        })?;
        let handle = entry.handle();
        let mut guard = handle.lock().await;

        // Re-check under the handle lock: a concurrent close may have won.
        let current = self.registry.get(name).await.ok_or_else(|| Error::NotFound {
            name: name.to_string(),
        })?;
        if current.status != ConnectionStatus::Connected {
            return Err(Error::InvalidState {
                name: name.to_string(),
                status: current.status,
                expected: "Connected",
            });
        }

        if let Some(connection) = guard.as_mut() {
            connection.close().await.map_err(Error::Connect)?;
        }
        *guard = None;
        self.registry
            .update_status(name, ConnectionStatus::Closed)
            .await?;
        drop(guard);

        self.notifier.publish(LifecycleEvent::ConnectionClosed {
            name: name.to_string(),
        });
        info!(name, "connection closed");
        Ok(())
    }

    /// Close every connected entry, best-effort.
    ///
    /// Failures are collected into the report instead of aborting the sweep.
    pub async fn disconnect_all(&self) -> DisconnectReport {
        let connected: Vec<String> = self
            .registry
            .list()
            .await
            .into_iter()
            .filter(|entry| entry.status == ConnectionStatus::Connected)
            .map(|entry| entry.name)
            .collect();

        let results = futures::future::join_all(connected.into_iter().map(|name| async move {
            let outcome = self.close(&name).await;
            (name, outcome)
        }))
        .await;

        let mut report = DisconnectReport::default();
        for (name, outcome) in results {
            match outcome {
                Ok(()) => report.closed.push(name),
                Err(err) => report.failed.push((name, reason_chain(&err))),
            }
        }
        if !report.is_clean() {
            warn!(failed = report.failed.len(), "disconnect_all left failures behind");
        }
        report
    }

    /// Snapshot of all tracked connections.
    pub async fn list(&self) -> Vec<ConnectionEntry> {
        self.registry.list().await
    }

    /// Snapshot of one tracked connection.
    pub async fn get(&self, name: &str) -> Option<ConnectionEntry> {
        self.registry.get(name).await
    }

    /// Current status of a tracked connection.
    pub async fn status(&self, name: &str) -> Option<ConnectionStatus> {
        self.registry.get(name).await.map(|entry| entry.status)
    }

    /// Remove a terminal entry, reclaiming its name for a fresh attempt.
    pub async fn remove(&self, name: &str) -> Result<Option<ConnectionEntry>, Error> {
        self.registry.remove(name).await
    }

    /// Generate a connection name for callers that do not care.
    pub fn generate_name() -> String {
        let id = Uuid::new_v4().simple().to_string();
        format!("conn-{}", &id[..8])
    }

    async fn begin(&self, name: &str) -> Result<(), Error> {
        let mut in_flight = self.in_flight.lock().await;
        if in_flight.contains(name) {
            return Err(Error::InFlight {
                name: name.to_string(),
            });
        }
        if let Some(existing) = self.registry.get(name).await {
            if existing.is_active() {
                return Err(Error::DuplicateName {
                    name: name.to_string(),
                });
            }
        }
        in_flight.insert(name.to_string());
        Ok(())
    }

    async fn finish(&self, name: &str) {
        self.in_flight.lock().await.remove(name);
    }

    async fn drive(
        &self,
        draft: &mut ConnectionEntry,
        target: &DriverTarget,
        params: &ConnectParams,
    ) -> Result<ConnectionEntry, Error> {
        debug!(name = %draft.name, "resolving driver");
        let reference = self.resolver.resolve(target).await?;
        draft.reference = Some(reference.clone());

        draft.status = ConnectionStatus::Downloading;
        let artifact = self.fetch_with_retry(&reference).await?;

        draft.status = ConnectionStatus::Loading;
        let driver = self.loader.load(&reference, &artifact).await?;

        // The name becomes occupied only now; earlier failures never block
        // a retry under the same name.
        draft.status = ConnectionStatus::Connecting;
        self.registry.insert(draft.clone()).await?;

        let connector = driver.connector();
        let open = async { connector.open(&reference, params).await };
        let deadline = async {
            smol::Timer::after(self.config.connect_timeout).await;
            Err(ConnectError::Timeout {
                database: reference.database_name.clone(),
                seconds: self.config.connect_timeout.as_secs(),
            })
        };
        let connection = smol::future::or(open, deadline).await?;

        *draft.handle().lock().await = Some(connection);
        self.registry
            .update_status(&draft.name, ConnectionStatus::Connected)
            .await?;
        self.notifier.publish(LifecycleEvent::ConnectionAdded {
            name: draft.name.clone(),
        });
        info!(
            name = %draft.name,
            database = %reference.database_name,
            "connection established"
        );

        self.registry
            .get(&draft.name)
            .await
            .ok_or_else(|| Error::NotFound {
                name: draft.name.clone(),
            })
    }

    async fn fetch_with_retry(&self, reference: &DriverReference) -> Result<CachedArtifact, Error> {
        let mut attempt: u32 = 0;
        loop {
            match self.fetcher.ensure(reference).await {
                Ok(artifact) => return Ok(artifact),
                Err(FetchError::Network { url, source }) if attempt < self.config.fetch_retries => {
                    attempt += 1;
                    warn!(
                        %url,
                        attempt,
                        max = self.config.fetch_retries,
                        error = %source,
                        "network failure fetching driver, backing off before retry"
                    );
                    smol::Timer::after(self.config.retry_backoff * attempt).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Record a failed attempt so it stays visible in `list()`.
    async fn record_failure(&self, mut draft: ConnectionEntry, reason: &str) {
        let failed = ConnectionStatus::Failed {
            reason: reason.to_string(),
        };
        let occupied = matches!(
            self.registry.get(&draft.name).await,
            Some(existing) if existing.is_active()
        );
        if occupied {
            // Our own entry, inserted at the Connecting stage.
            if let Err(err) = self.registry.update_status(&draft.name, failed).await {
                error!(name = %draft.name, %err, "failed to record connection failure");
            }
        } else {
            draft.last_error = Some(reason.to_string());
            draft.status = failed;
            if let Err(err) = self.registry.insert(draft).await {
                error!(%err, "failed to record connection failure");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::connectors::SqliteConnector;
    use crate::fetch::Transport;

    struct CountingTransport {
        downloads: AtomicUsize,
        failures_left: AtomicUsize,
        delay: Duration,
    }

    impl CountingTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                downloads: AtomicUsize::new(0),
                failures_left: AtomicUsize::new(0),
                delay: Duration::ZERO,
            })
        }

        fn failing_first(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                downloads: AtomicUsize::new(0),
                failures_left: AtomicUsize::new(failures),
                delay: Duration::ZERO,
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                downloads: AtomicUsize::new(0),
                failures_left: AtomicUsize::new(0),
                delay,
            })
        }

        fn count(&self) -> usize {
            self.downloads.load(Ordering::SeqCst)
        }
    }

    impl Transport for CountingTransport {
        fn download(&self, url: &str) -> anyhow::Result<Vec<u8>> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            let failures = self.failures_left.load(Ordering::SeqCst);
            if failures > 0 {
                self.failures_left.store(failures - 1, Ordering::SeqCst);
                anyhow::bail!("connection reset while fetching {url}");
            }
            Ok(b"driver artifact bytes".to_vec())
        }
    }

    const CATALOG: &str = r#"[
        {
            "databaseName": "SQLite",
            "downloadLink": "https://drivers.example.com/sqlite-connector.bin",
            "jarFileName": "sqlite-connector.bin",
            "driverClass": "dbdock::connectors::SqliteConnector"
        },
        {
            "databaseName": "Broken",
            "downloadLink": "https://drivers.example.com/broken-connector.bin",
            "jarFileName": "broken-connector.bin",
            "driverClass": "no.such.Class"
        }
    ]"#;

    fn manager(dir: &std::path::Path, transport: Arc<CountingTransport>) -> ConnectionManager {
        let notifier = LifecycleNotifier::new();
        let fetcher = DriverFetcher::new(dir, notifier.clone())
            .with_transport(transport)
            .with_timeout(Duration::from_secs(5));
        let loader = DriverLoader::new(notifier.clone());
        let catalog = DriverCatalog::parse(CATALOG).unwrap();
        ConnectionManager::with_parts(
            DriverResolver::new(catalog),
            fetcher,
            loader,
            notifier,
            ManagerConfig {
                connect_timeout: Duration::from_secs(5),
                fetch_retries: 2,
                retry_backoff: Duration::from_millis(1),
            },
        )
    }

    fn drain(rx: &async_channel::Receiver<LifecycleEvent>) -> Vec<LifecycleEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_connect_walks_pipeline_and_registers() {
        smol::block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let manager = manager(dir.path(), CountingTransport::new());
            let rx = manager.subscribe();

            let entry = manager
                .connect("db1", "sqlite".into(), ConnectParams::default())
                .await
                .unwrap();
            assert_eq!(entry.status, ConnectionStatus::Connected);
            assert_eq!(
                entry.reference.as_ref().unwrap().driver_class,
                SqliteConnector::CLASS
            );

            let listed = manager.list().await;
            assert_eq!(listed.len(), 1);
            assert_eq!(listed[0].name, "db1");
            assert_eq!(listed[0].status, ConnectionStatus::Connected);

            let events = drain(&rx);
            assert!(matches!(events[0], LifecycleEvent::DriverDownloadStarted { .. }));
            assert!(matches!(events[1], LifecycleEvent::DriverDownloadCompleted { .. }));
            assert!(matches!(events[2], LifecycleEvent::DriverLoaded { .. }));
            assert!(matches!(events[3], LifecycleEvent::ConnectionAdded { .. }));
        });
    }

    #[test]
    fn test_close_releases_and_notifies_exactly_once() {
        smol::block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let manager = manager(dir.path(), CountingTransport::new());

            manager
                .connect("db1", "sqlite".into(), ConnectParams::default())
                .await
                .unwrap();
            let rx = manager.subscribe();

            manager.close("db1").await.unwrap();
            assert_eq!(
                manager.status("db1").await,
                Some(ConnectionStatus::Closed)
            );

            let closed_events = drain(&rx)
                .into_iter()
                .filter(|event| matches!(event, LifecycleEvent::ConnectionClosed { .. }))
                .count();
            assert_eq!(closed_events, 1);

            // Closing again is an invalid state transition.
            let err = manager.close("db1").await.unwrap_err();
            assert!(matches!(err, Error::InvalidState { .. }));
        });
    }

    #[test]
    fn test_duplicate_active_name_fails_fast() {
        smol::block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let transport = CountingTransport::new();
            let manager = manager(dir.path(), transport.clone());

            manager
                .connect("db1", "sqlite".into(), ConnectParams::default())
                .await
                .unwrap();
            let downloads = transport.count();

            let err = manager
                .connect("db1", "sqlite".into(), ConnectParams::default())
                .await
                .unwrap_err();
            assert!(matches!(err, Error::DuplicateName { .. }));
            // Rejected before any driver work.
            assert_eq!(transport.count(), downloads);
        });
    }

    #[test]
    fn test_concurrent_same_name_connect_fails_in_flight() {
        smol::block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let manager = manager(
                dir.path(),
                CountingTransport::slow(Duration::from_millis(100)),
            );

            let (first, second) = futures::join!(
                manager.connect("db1", "sqlite".into(), ConnectParams::default()),
                manager.connect("db1", "sqlite".into(), ConnectParams::default()),
            );

            assert!(first.is_ok());
            assert!(matches!(second.unwrap_err(), Error::InFlight { .. }));

            let entries = manager.list().await;
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].status, ConnectionStatus::Connected);
        });
    }

    #[test]
    fn test_unknown_driver_class_recorded_as_failed() {
        smol::block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let manager = manager(dir.path(), CountingTransport::new());
            let rx = manager.subscribe();

            let err = manager
                .connect("db1", "broken".into(), ConnectParams::default())
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                Error::Load(crate::error::LoadError::ClassNotFound { .. })
            ));

            // The failure stays visible, does not occupy the name, and the
            // name is reclaimable.
            let entry = manager.get("db1").await.unwrap();
            assert!(matches!(entry.status, ConnectionStatus::Failed { .. }));
            assert!(entry.last_error.is_some());

            let failed_events = drain(&rx)
                .into_iter()
                .filter(|event| matches!(event, LifecycleEvent::ConnectionFailed { .. }))
                .count();
            assert_eq!(failed_events, 1);

            manager.remove("db1").await.unwrap();
            manager
                .connect("db1", "sqlite".into(), ConnectParams::default())
                .await
                .unwrap();
        });
    }

    #[test]
    fn test_failed_entry_name_reusable_without_remove() {
        smol::block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let manager = manager(dir.path(), CountingTransport::new());

            manager
                .connect("db1", "broken".into(), ConnectParams::default())
                .await
                .unwrap_err();

            // A terminal entry does not block the name; the retry replaces it.
            let entry = manager
                .connect("db1", "sqlite".into(), ConnectParams::default())
                .await
                .unwrap();
            assert_eq!(entry.status, ConnectionStatus::Connected);
            assert_eq!(manager.list().await.len(), 1);
        });
    }

    #[test]
    fn test_network_failures_retried_with_backoff() {
        smol::block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let transport = CountingTransport::failing_first(2);
            let manager = manager(dir.path(), transport.clone());

            let entry = manager
                .connect("db1", "sqlite".into(), ConnectParams::default())
                .await
                .unwrap();
            assert_eq!(entry.status, ConnectionStatus::Connected);
            assert_eq!(transport.count(), 3);
        });
    }

    #[test]
    fn test_retry_budget_exhaustion_surfaces_fetch_error() {
        smol::block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let transport = CountingTransport::failing_first(10);
            let manager = manager(dir.path(), transport.clone());

            let err = manager
                .connect("db1", "sqlite".into(), ConnectParams::default())
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Fetch(FetchError::Network { .. })));
            // Initial attempt plus two retries.
            assert_eq!(transport.count(), 3);
            assert!(matches!(
                manager.status("db1").await,
                Some(ConnectionStatus::Failed { .. })
            ));
        });
    }

    #[test]
    fn test_disconnect_all_closes_everything() {
        smol::block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let manager = manager(dir.path(), CountingTransport::new());

            manager
                .connect("db1", "sqlite".into(), ConnectParams::default())
                .await
                .unwrap();
            manager
                .connect("db2", "sqlite".into(), ConnectParams::default())
                .await
                .unwrap();

            let report = manager.disconnect_all().await;
            assert!(report.is_clean());
            assert_eq!(report.closed.len(), 2);
            assert_eq!(
                manager.status("db1").await,
                Some(ConnectionStatus::Closed)
            );
            assert_eq!(
                manager.status("db2").await,
                Some(ConnectionStatus::Closed)
            );
        });
    }

    #[test]
    fn test_ensure_driver_ready_without_connection() {
        smol::block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let manager = manager(dir.path(), CountingTransport::new());

            let driver = manager
                .ensure_driver_ready(&"sqlite".into())
                .await
                .unwrap();
            assert_eq!(driver.driver_class, SqliteConnector::CLASS);
            assert!(manager.list().await.is_empty());

            // The warmed driver is reused by connect.
            let entry = manager
                .connect("db1", "sqlite".into(), ConnectParams::default())
                .await
                .unwrap();
            assert_eq!(entry.status, ConnectionStatus::Connected);
        });
    }

    #[test]
    fn test_close_unknown_name() {
        smol::block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let manager = manager(dir.path(), CountingTransport::new());
            let err = manager.close("ghost").await.unwrap_err();
            assert!(matches!(err, Error::NotFound { .. }));
        });
    }

    #[test]
    fn test_generated_names_are_distinct() {
        let a = ConnectionManager::generate_name();
        let b = ConnectionManager::generate_name();
        assert!(a.starts_with("conn-"));
        assert_ne!(a, b);
    }
}
