//! Mapping requested database types to concrete driver references.

use std::sync::Arc;

use async_lock::RwLock;

use super::{DriverCatalog, DriverReference};
use crate::error::Error;

/// What the caller wants a driver for: a catalog type name, or an explicit
/// reference bypassing the catalog (user-provided custom drivers).
#[derive(Debug, Clone)]
pub enum DriverTarget {
    Type(String),
    Reference(DriverReference),
}

impl From<&str> for DriverTarget {
    fn from(database_type: &str) -> Self {
        Self::Type(database_type.to_string())
    }
}

impl From<DriverReference> for DriverTarget {
    fn from(reference: DriverReference) -> Self {
        Self::Reference(reference)
    }
}

/// Resolves driver targets against a shared catalog.
///
/// The catalog itself is immutable; [`DriverResolver::reload`] swaps the
/// whole index atomically, so concurrent readers see either the old or the
/// new catalog, never a partial update.
#[derive(Debug, Clone)]
pub struct DriverResolver {
    catalog: Arc<RwLock<Arc<DriverCatalog>>>,
}

impl DriverResolver {
    pub fn new(catalog: DriverCatalog) -> Self {
        Self {
            catalog: Arc::new(RwLock::new(Arc::new(catalog))),
        }
    }

    /// Resolve a target to a validated reference.
    ///
    /// Type lookups match catalog entries case-insensitively. Absent types
    /// and entries unusable for loading both fail with
    /// [`Error::DriverNotFound`].
    pub async fn resolve(&self, target: &DriverTarget) -> Result<DriverReference, Error> {
        match target {
            DriverTarget::Type(name) => {
                let catalog = self.catalog.read().await.clone();
                match catalog.lookup(name) {
                    Some(entry) => entry.to_reference(),
                    None => Err(Error::DriverNotFound {
                        requested: name.clone(),
                        reason: "not present in the driver catalog".to_string(),
                    }),
                }
            }
            DriverTarget::Reference(reference) => {
                if reference.artifact_name.is_empty() || reference.driver_class.is_empty() {
                    return Err(Error::DriverNotFound {
                        requested: reference.database_name.clone(),
                        reason: "explicit reference is missing its artifact name or driver class"
                            .to_string(),
                    });
                }
                Ok(reference.clone())
            }
        }
    }

    /// Replace the entire catalog index atomically.
    pub async fn reload(&self, catalog: DriverCatalog) {
        *self.catalog.write().await = Arc::new(catalog);
    }

    /// Snapshot of the current catalog.
    pub async fn catalog(&self) -> Arc<DriverCatalog> {
        self.catalog.read().await.clone()
    }
}
