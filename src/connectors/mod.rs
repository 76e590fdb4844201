//! Connector capability surface and built-in driver implementations.
//!
//! A [`Connector`] is the loaded, callable capability produced from a driver
//! artifact; it opens [`DriverConnection`]s. The built-in connectors cover
//! SQLite, PostgreSQL, and MySQL over SQLx pools.

mod mysql;
mod postgres;
mod sqlite;

pub use mysql::MySqlConnector;
pub use postgres::PostgresConnector;
pub use sqlite::SqliteConnector;

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::catalog::DriverReference;
use crate::error::ConnectError;

/// Caller-supplied parameters for opening a connection.
///
/// Server-based drivers read `host`/`port`/`database` and the credentials;
/// file-based drivers read `file_path` and fall back to an in-memory
/// database when it is absent. `options` carries driver-specific extras.
#[derive(Debug, Clone, Default)]
pub struct ConnectParams {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub file_path: Option<PathBuf>,
    pub options: HashMap<String, String>,
}

impl ConnectParams {
    /// Parameters for a server-based database.
    pub fn server(
        host: impl Into<String>,
        port: Option<u16>,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: Some(host.into()),
            port,
            database: Some(database.into()),
            username: Some(username.into()),
            password: Some(password.into()),
            ..Default::default()
        }
    }

    /// Parameters for a file-based database.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: Some(path.into()),
            ..Default::default()
        }
    }
}

/// A loaded driver capability able to open connections.
#[async_trait]
pub trait Connector: Send + Sync {
    /// The fully-qualified driver class identifier this connector serves.
    fn driver_class(&self) -> &str;

    /// Database type name, matching the catalog's key.
    fn database_type(&self) -> &str;

    /// Open a connection to the database described by the reference and
    /// parameters.
    async fn open(
        &self,
        reference: &DriverReference,
        params: &ConnectParams,
    ) -> Result<Box<dyn DriverConnection>, ConnectError>;
}

/// An open connection produced by a [`Connector`].
#[async_trait]
pub trait DriverConnection: Send + Sync {
    /// Human-readable target description, e.g. `user@host:port/db`.
    fn describe(&self) -> String;

    /// Lightweight liveness check.
    async fn ping(&self) -> bool;

    /// Close the connection and release the underlying handle.
    async fn close(&mut self) -> Result<(), ConnectError>;
}

/// Map a SQLx failure onto the connect taxonomy.
///
/// Auth failures are recognized by SQLSTATE (28xxx class, plus MySQL's 1045)
/// so the manager can refuse to retry them.
pub(crate) fn classify_sqlx_error(database: &str, err: sqlx::Error) -> ConnectError {
    match err {
        sqlx::Error::Database(db) => {
            let code = db.code().map(|code| code.to_string());
            let is_auth = matches!(code.as_deref(), Some("28000") | Some("28P01") | Some("1045"));
            if is_auth {
                ConnectError::Auth {
                    database: database.to_string(),
                    source: anyhow::anyhow!("{} ({})", db.message(), code.unwrap_or_default()),
                }
            } else {
                ConnectError::DriverRejected {
                    reason: db.message().to_string(),
                }
            }
        }
        sqlx::Error::Io(source) => ConnectError::Network {
            database: database.to_string(),
            source: source.into(),
        },
        sqlx::Error::Tls(source) => ConnectError::Network {
            database: database.to_string(),
            source: anyhow::anyhow!(source),
        },
        other => ConnectError::DriverRejected {
            reason: other.to_string(),
        },
    }
}
