//! dbdock — dynamic database driver acquisition and connection lifecycle.
//!
//! The crate lets a host application connect to databases whose drivers are
//! unknown at build time. A driver identifier is resolved against a
//! [`catalog`](crate::catalog::DriverCatalog), the driver artifact is
//! [fetched](crate::fetch::DriverFetcher) on demand with integrity checking,
//! [loaded](crate::loader::DriverLoader) into an isolated per-process
//! connector registry, and a named connection is established and tracked in
//! the [`ConnectionRegistry`](crate::registry::ConnectionRegistry). Every
//! externally meaningful transition is published as a
//! [`LifecycleEvent`](crate::events::LifecycleEvent) that subscribers drain
//! on an executor of their choosing.
//!
//! # Example
//!
//! ```no_run
//! use dbdock::{ConnectParams, ConnectionManager, DriverCatalog, StorageRoot};
//!
//! # fn main() -> anyhow::Result<()> {
//! smol::block_on(async {
//!     let root = StorageRoot::resolve()?;
//!     let catalog = DriverCatalog::bundled()?;
//!     let manager = ConnectionManager::new(catalog, &root);
//!
//!     let events = manager.subscribe();
//!     let entry = manager
//!         .connect("main", "sqlite".into(), ConnectParams::default())
//!         .await?;
//!     println!("{} is {}", entry.name, entry.status);
//!
//!     manager.close("main").await?;
//!     while let Ok(event) = events.try_recv() {
//!         println!("{event:?}");
//!     }
//!     Ok::<_, anyhow::Error>(())
//! })?;
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod connectors;
pub mod error;
pub mod events;
pub mod fetch;
pub mod loader;
pub mod logging;
pub mod manager;
pub mod paths;
pub mod registry;

pub use catalog::{CatalogEntry, DriverCatalog, DriverReference, DriverResolver, DriverTarget};
pub use connectors::{ConnectParams, Connector, DriverConnection};
pub use error::{CatalogError, ConnectError, Error, FetchError, LoadError};
pub use events::{LifecycleEvent, LifecycleNotifier};
pub use fetch::{CachedArtifact, DriverFetcher, HttpTransport, Transport, VerificationStatus};
pub use loader::{ConnectorBuilder, DriverLoader, LoadedDriver};
pub use manager::{ConnectionManager, DisconnectReport, ManagerConfig};
pub use paths::StorageRoot;
pub use registry::{ConnectionEntry, ConnectionRegistry, ConnectionStatus};
