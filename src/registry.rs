//! Concurrency-safe registry of live named connections.
//!
//! The registry is the single source of truth for "what is connected right
//! now". Entries are mutated only through
//! [`ConnectionManager`](crate::manager::ConnectionManager) operations.

use std::collections::HashMap;
use std::sync::Arc;

use async_lock::{Mutex, RwLock};
use chrono::{DateTime, Utc};

use crate::catalog::DriverReference;
use crate::connectors::DriverConnection;
use crate::error::Error;

/// Lifecycle status of a named connection.
///
/// `Closed` and `Failed` are terminal; a name whose entry is terminal can be
/// reclaimed by a new connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Resolving,
    Downloading,
    Loading,
    Connecting,
    Connected,
    Closed,
    Failed { reason: String },
}

impl ConnectionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed { .. })
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resolving => write!(f, "Resolving"),
            Self::Downloading => write!(f, "Downloading"),
            Self::Loading => write!(f, "Loading"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Closed => write!(f, "Closed"),
            Self::Failed { reason } => write!(f, "Failed ({reason})"),
        }
    }
}

/// Shared handle to the underlying driver connection.
///
/// `None` before the connection is opened and after it is closed.
pub type SharedConnection = Arc<Mutex<Option<Box<dyn DriverConnection>>>>;

/// One named, tracked connection.
#[derive(Clone)]
pub struct ConnectionEntry {
    pub name: String,
    /// Absent only when the attempt failed before driver resolution.
    pub reference: Option<DriverReference>,
    pub status: ConnectionStatus,
    pub created_at: DateTime<Utc>,
    pub last_error: Option<String>,
    handle: SharedConnection,
}

impl ConnectionEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reference: None,
            status: ConnectionStatus::Resolving,
            created_at: Utc::now(),
            last_error: None,
            handle: Arc::new(Mutex::new(None)),
        }
    }

    /// The shared handle; clones refer to the same underlying connection.
    pub fn handle(&self) -> SharedConnection {
        self.handle.clone()
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

impl std::fmt::Debug for ConnectionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionEntry")
            .field("name", &self.name)
            .field("status", &self.status)
            .field("created_at", &self.created_at)
            .field("last_error", &self.last_error)
            .finish()
    }
}

/// Name → entry map; reads are concurrent, writes exclusive.
#[derive(Default)]
pub struct ConnectionRegistry {
    entries: RwLock<HashMap<String, ConnectionEntry>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry under its name.
    ///
    /// Fails with [`Error::DuplicateName`] while an active entry owns the
    /// name; a terminal entry is silently replaced.
    pub async fn insert(&self, entry: ConnectionEntry) -> Result<(), Error> {
        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.get(&entry.name) {
            if existing.is_active() {
                return Err(Error::DuplicateName {
                    name: entry.name.clone(),
                });
            }
        }
        entries.insert(entry.name.clone(), entry);
        Ok(())
    }

    /// Update an entry's status; a `Failed` status is mirrored into
    /// `last_error`.
    pub async fn update_status(&self, name: &str, status: ConnectionStatus) -> Result<(), Error> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(name).ok_or_else(|| Error::NotFound {
            name: name.to_string(),
        })?;
        if let ConnectionStatus::Failed { reason } = &status {
            entry.last_error = Some(reason.clone());
        }
        entry.status = status;
        Ok(())
    }

    /// Snapshot of one entry.
    pub async fn get(&self, name: &str) -> Option<ConnectionEntry> {
        self.entries.read().await.get(name).cloned()
    }

    /// Point-in-time snapshot of all entries, in creation order.
    pub async fn list(&self) -> Vec<ConnectionEntry> {
        let entries = self.entries.read().await;
        let mut snapshot: Vec<ConnectionEntry> = entries.values().cloned().collect();
        snapshot.sort_by(|a, b| (a.created_at, &a.name).cmp(&(b.created_at, &b.name)));
        snapshot
    }

    /// Remove a terminal entry, reclaiming its name.
    ///
    /// Removing an active entry is an [`Error::InvalidState`]; removing an
    /// absent name is a no-op.
    pub async fn remove(&self, name: &str) -> Result<Option<ConnectionEntry>, Error> {
        let mut entries = self.entries.write().await;
        match entries.get(name) {
            None => Ok(None),
            Some(existing) if existing.is_active() => Err(Error::InvalidState {
                name: name.to_string(),
                status: existing.status.clone(),
                expected: "Closed or Failed",
            }),
            Some(_) => Ok(entries.remove(name)),
        }
    }
}
