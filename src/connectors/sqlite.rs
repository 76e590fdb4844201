//! SQLite connector over SQLx.
//!
//! File-based: `ConnectParams::file_path` names the database file, absent
//! means in-memory. The pool is capped at one connection so an in-memory
//! database is not silently duplicated per pool slot.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use super::{ConnectParams, Connector, DriverConnection, classify_sqlx_error};
use crate::catalog::DriverReference;
use crate::error::ConnectError;

pub struct SqliteConnector;

impl SqliteConnector {
    pub const CLASS: &'static str = "dbdock::connectors::SqliteConnector";
}

#[async_trait]
impl Connector for SqliteConnector {
    fn driver_class(&self) -> &str {
        Self::CLASS
    }

    fn database_type(&self) -> &str {
        "sqlite"
    }

    async fn open(
        &self,
        _reference: &DriverReference,
        params: &ConnectParams,
    ) -> Result<Box<dyn DriverConnection>, ConnectError> {
        let (options, target) = match &params.file_path {
            Some(path) => (
                SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
                    .foreign_keys(true),
                path.display().to_string(),
            ),
            None => (
                SqliteConnectOptions::from_str("sqlite::memory:")
                    .map_err(|err| classify_sqlx_error(":memory:", err))?,
                ":memory:".to_string(),
            ),
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|err| classify_sqlx_error(&target, err))?;

        Ok(Box::new(SqliteConnection { pool, target }))
    }
}

struct SqliteConnection {
    pool: SqlitePool,
    target: String,
}

#[async_trait]
impl DriverConnection for SqliteConnection {
    fn describe(&self) -> String {
        self.target.clone()
    }

    async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    async fn close(&mut self) -> Result<(), ConnectError> {
        self.pool.close().await;
        Ok(())
    }
}
