//! PostgreSQL connector over SQLx.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

use super::{ConnectParams, Connector, DriverConnection, classify_sqlx_error};
use crate::catalog::DriverReference;
use crate::error::ConnectError;

const FALLBACK_PORT: u16 = 5432;

pub struct PostgresConnector;

impl PostgresConnector {
    pub const CLASS: &'static str = "dbdock::connectors::PostgresConnector";
}

/// Resolve the endpoint from parameters, falling back to the reference's
/// default port and the driver's conventional defaults.
fn resolve_endpoint(reference: &DriverReference, params: &ConnectParams) -> (String, u16, String) {
    let host = params
        .host
        .clone()
        .unwrap_or_else(|| "localhost".to_string());
    let port = params
        .port
        .or(reference.default_port)
        .unwrap_or(FALLBACK_PORT);
    let database = params
        .database
        .clone()
        .unwrap_or_else(|| "postgres".to_string());
    (host, port, database)
}

#[async_trait]
impl Connector for PostgresConnector {
    fn driver_class(&self) -> &str {
        Self::CLASS
    }

    fn database_type(&self) -> &str {
        "postgresql"
    }

    async fn open(
        &self,
        reference: &DriverReference,
        params: &ConnectParams,
    ) -> Result<Box<dyn DriverConnection>, ConnectError> {
        let (host, port, database) = resolve_endpoint(reference, params);
        let target = format!("{host}:{port}/{database}");

        // Prefer the catalog's URL template when the reference carries one.
        let mut options = match reference.connection_url(&host, port, &database) {
            Some(url) => PgConnectOptions::from_str(&url)
                .map_err(|err| classify_sqlx_error(&target, err))?,
            None => PgConnectOptions::new()
                .host(&host)
                .port(port)
                .database(&database),
        };
        if let Some(username) = &params.username {
            options = options.username(username);
        }
        if let Some(password) = &params.password {
            options = options.password(password);
        }

        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .map_err(|err| classify_sqlx_error(&target, err))?;

        let described = match &params.username {
            Some(username) => format!("{username}@{target}"),
            None => target,
        };
        Ok(Box::new(PostgresConnection {
            pool,
            target: described,
        }))
    }
}

struct PostgresConnection {
    pool: PgPool,
    target: String,
}

#[async_trait]
impl DriverConnection for PostgresConnection {
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
