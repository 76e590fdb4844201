//! Isolated driver loading keyed by driver class identity.
//!
//! There is no dynamic library loading here: drivers are instantiated from a
//! connector table the loader owns — a registration map from driver class
//! identifier to builder, populated with the built-in connectors and
//! extensible by the host. The table is scoped to the loader instance, so a
//! bad artifact cannot disturb state outside it. Loading still requires the
//! verified artifact to be present in the cache, exactly as a true dynamic
//! load would.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_lock::RwLock;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::catalog::DriverReference;
use crate::connectors::{Connector, MySqlConnector, PostgresConnector, SqliteConnector};
use crate::error::LoadError;
use crate::events::{LifecycleEvent, LifecycleNotifier};
use crate::fetch::{CachedArtifact, VerificationStatus};

/// Instantiates a connector for a driver reference.
pub type ConnectorBuilder =
    Arc<dyn Fn(&DriverReference) -> anyhow::Result<Arc<dyn Connector>> + Send + Sync>;

/// A driver class successfully instantiated from a cached artifact.
pub struct LoadedDriver {
    pub driver_class: String,
    pub artifact_path: PathBuf,
    pub loaded_at: DateTime<Utc>,
    connector: Arc<dyn Connector>,
}

impl LoadedDriver {
    pub fn connector(&self) -> Arc<dyn Connector> {
        self.connector.clone()
    }
}

impl std::fmt::Debug for LoadedDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedDriver")
            .field("driver_class", &self.driver_class)
            .field("artifact_path", &self.artifact_path)
            .field("loaded_at", &self.loaded_at)
            .finish()
    }
}

/// Loads connectors from verified artifacts, at most once per driver class
/// per process.
pub struct DriverLoader {
    builders: RwLock<HashMap<String, ConnectorBuilder>>,
    loaded: RwLock<HashMap<String, Arc<LoadedDriver>>>,
    notifier: LifecycleNotifier,
}

impl DriverLoader {
    /// A loader preloaded with the built-in connector table.
    pub fn new(notifier: LifecycleNotifier) -> Self {
        Self {
            builders: RwLock::new(builtin_builders()),
            loaded: RwLock::new(HashMap::new()),
            notifier,
        }
    }

    /// Register an additional connector builder under a driver class
    /// identifier, replacing any previous registration for it.
    pub async fn register_connector(&self, driver_class: impl Into<String>, builder: ConnectorBuilder) {
        self.builders.write().await.insert(driver_class.into(), builder);
    }

    /// Load the driver class named by `reference` from `artifact`.
    ///
    /// Idempotent per driver class identifier: a second call returns the
    /// cached instance without re-running the builder, even when a different
    /// artifact path is supplied (logged, not an error). Failures are fatal
    /// for the artifact — retrying without re-fetching cannot succeed.
    pub async fn load(
        &self,
        reference: &DriverReference,
        artifact: &CachedArtifact,
    ) -> Result<Arc<LoadedDriver>, LoadError> {
        if let Some(existing) = self.loaded.read().await.get(&reference.driver_class) {
            return Ok(Self::reuse(existing, artifact));
        }

        let mut loaded = self.loaded.write().await;
        // A concurrent load may have won the race for the write lock.
        if let Some(existing) = loaded.get(&reference.driver_class) {
            return Ok(Self::reuse(existing, artifact));
        }

        if artifact.status != VerificationStatus::Verified {
            return Err(LoadError::Instantiation {
                class: reference.driver_class.clone(),
                source: anyhow::anyhow!(
                    "artifact {} is {:?}, refusing to load",
                    artifact.path.display(),
                    artifact.status
                ),
            });
        }

        let builder = self
            .builders
            .read()
            .await
            .get(&reference.driver_class)
            .cloned()
            .ok_or_else(|| LoadError::ClassNotFound {
                class: reference.driver_class.clone(),
                artifact: reference.artifact_name.clone(),
            })?;

        let connector = builder(reference).map_err(|source| LoadError::Instantiation {
            class: reference.driver_class.clone(),
            source,
        })?;

        if connector.driver_class() != reference.driver_class {
            return Err(LoadError::IncompatibleInterface {
                class: reference.driver_class.clone(),
                detail: format!("connector reports class {}", connector.driver_class()),
            });
        }

        let driver = Arc::new(LoadedDriver {
            driver_class: reference.driver_class.clone(),
            artifact_path: artifact.path.clone(),
            loaded_at: Utc::now(),
            connector,
        });
        loaded.insert(reference.driver_class.clone(), driver.clone());

        info!(
            class = %reference.driver_class,
            artifact = %artifact.path.display(),
            "driver loaded"
        );
        self.notifier.publish(LifecycleEvent::DriverLoaded {
            database_type: reference.database_name.clone(),
        });

        Ok(driver)
    }

    fn reuse(existing: &Arc<LoadedDriver>, artifact: &CachedArtifact) -> Arc<LoadedDriver> {
        if existing.artifact_path != artifact.path {
            warn!(
                class = %existing.driver_class,
                loaded_from = %existing.artifact_path.display(),
                requested = %artifact.path.display(),
                "driver class already loaded from a different artifact, returning loaded instance"
            );
        }
        existing.clone()
    }

    pub async fn is_loaded(&self, driver_class: &str) -> bool {
        self.loaded.read().await.contains_key(driver_class)
    }

    /// Driver classes currently loaded, in no particular order.
    pub async fn loaded_classes(&self) -> Vec<String> {
        self.loaded.read().await.keys().cloned().collect()
    }
}

fn builtin_builders() -> HashMap<String, ConnectorBuilder> {
    let mut table: HashMap<String, ConnectorBuilder> = HashMap::new();
    table.insert(
        SqliteConnector::CLASS.to_string(),
        Arc::new(|_| Ok(Arc::new(SqliteConnector) as Arc<dyn Connector>)),
    );
    table.insert(
        PostgresConnector::CLASS.to_string(),
        Arc::new(|_| Ok(Arc::new(PostgresConnector) as Arc<dyn Connector>)),
    );
    table.insert(
        MySqlConnector::CLASS.to_string(),
        Arc::new(|_| Ok(Arc::new(MySqlConnector) as Arc<dyn Connector>)),
    );
    table
}
