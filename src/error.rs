//! Error types for driver acquisition and connection lifecycle.
//!
//! Each stage of the pipeline has its own error enum; the umbrella [`Error`]
//! wraps them for manager-level operations. Failures originating in foreign
//! code (HTTP transport, database drivers) are carried as `anyhow::Error`
//! sources so the full cause chain survives up to the caller.

use std::path::PathBuf;

use thiserror::Error;

use crate::registry::ConnectionStatus;

/// Errors raised while loading or indexing the driver catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("driver catalog not found at {path}")]
    Missing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed driver catalog: {reason}")]
    Parse { reason: String },
}

/// Errors raised while fetching a driver artifact into the local cache.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("download of {url} timed out after {seconds}s")]
    Timeout { url: String, seconds: u64 },

    #[error("network failure downloading {url}")]
    Network {
        url: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("checksum mismatch for {artifact}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        artifact: String,
        expected: String,
        actual: String,
    },

    #[error("cache storage failure for {artifact}")]
    Storage {
        artifact: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while instantiating a connector from a cached artifact.
///
/// These are fatal for the artifact in question: retrying a load will not
/// succeed without re-fetching.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("driver class {class} not found in {artifact}")]
    ClassNotFound { class: String, artifact: String },

    #[error("driver class {class} does not expose the connector interface: {detail}")]
    IncompatibleInterface { class: String, detail: String },

    #[error("driver class {class} failed to instantiate")]
    Instantiation {
        class: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Errors raised while opening or closing a database connection.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("authentication rejected for {database}")]
    Auth {
        database: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("network failure connecting to {database}")]
    Network {
        database: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("connection to {database} timed out after {seconds}s")]
    Timeout { database: String, seconds: u64 },

    #[error("driver rejected the connection request: {reason}")]
    DriverRejected { reason: String },
}

/// Umbrella error for manager and registry operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("no usable driver for {requested}: {reason}")]
    DriverNotFound { requested: String, reason: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("an active connection named {name} already exists")]
    DuplicateName { name: String },

    #[error("a connection attempt for {name} is already in flight")]
    InFlight { name: String },

    #[error("connection {name} is {status}, operation requires {expected}")]
    InvalidState {
        name: String,
        status: ConnectionStatus,
        expected: &'static str,
    },

    #[error("connection {name} not found")]
    NotFound { name: String },
}

/// Render an error together with its source chain, outermost first.
///
/// Used when a failure is flattened into a `Failed { reason }` status or a
/// lifecycle event, where only a string survives.
pub fn reason_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut current = err.source();
    while let Some(source) = current {
        out.push_str(": ");
        out.push_str(&source.to_string());
        current = source.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_chain_includes_sources() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused");
        let err = FetchError::Network {
            url: "https://example.com/driver.bin".to_string(),
            source: anyhow::Error::new(io),
        };

        let reason = reason_chain(&err);
        assert!(reason.contains("network failure"));
        assert!(reason.contains("connection refused"));
    }

    #[test]
    fn test_umbrella_wraps_component_errors() {
        let err: Error = FetchError::Timeout {
            url: "https://example.com/driver.bin".to_string(),
            seconds: 30,
        }
        .into();
        assert!(matches!(err, Error::Fetch(FetchError::Timeout { .. })));
    }
}
