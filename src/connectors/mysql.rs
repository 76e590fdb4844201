//! MySQL / MariaDB connector over SQLx.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::MySqlPool;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};

use super::{ConnectParams, Connector, DriverConnection, classify_sqlx_error};
use crate::catalog::DriverReference;
use crate::error::ConnectError;

const FALLBACK_PORT: u16 = 3306;

pub struct MySqlConnector;

impl MySqlConnector {
    pub const CLASS: &'static str = "dbdock::connectors::MySqlConnector";
}

fn resolve_endpoint(reference: &DriverReference, params: &ConnectParams) -> (String, u16, String) {
    let host = params
        .host
        .clone()
        .unwrap_or_else(|| "localhost".to_string());
    let port = params
        .port
        .or(reference.default_port)
        .unwrap_or(FALLBACK_PORT);
    let database = params.database.clone().unwrap_or_else(|| "mysql".to_string());
    (host, port, database)
}

#[async_trait]
impl Connector for MySqlConnector {
    fn driver_class(&self) -> &str {
        Self::CLASS
    }

    fn database_type(&self) -> &str {
        "mysql"
    }

    async fn open(
        &self,
        reference: &DriverReference,
        params: &ConnectParams,
    ) -> Result<Box<dyn DriverConnection>, ConnectError> {
        let (host, port, database) = resolve_endpoint(reference, params);
        let target = format!("{host}:{port}/{database}");

        let mut options = match reference.connection_url(&host, port, &database) {
            Some(url) => MySqlConnectOptions::from_str(&url)
                .map_err(|err| classify_sqlx_error(&target, err))?,
            None => MySqlConnectOptions::new()
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

        let pool = MySqlPoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .map_err(|err| classify_sqlx_error(&target, err))?;

        let described = match &params.username {
            Some(username) => format!("{username}@{target}"),
            None => target,
        };
        Ok(Box::new(MySqlConnection {
            pool,
            target: described,
        }))
    }
}

struct MySqlConnection {
    pool: MySqlPool,
    target: String,
}

#[async_trait]
impl DriverConnection for MySqlConnection {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_defaults() {
        let reference = DriverReference {
            database_name: "mysql".to_string(),
            download_url: "https://drivers.example.com/mysql.bin".to_string(),
            artifact_name: "mysql.bin".to_string(),
            driver_class: MySqlConnector::CLASS.to_string(),
            default_port: None,
            url_template: None,
            note: None,
            sha256: None,
        };
        let (host, port, database) = resolve_endpoint(&reference, &ConnectParams::default());
        assert_eq!(host, "localhost");
        assert_eq!(port, FALLBACK_PORT);
        assert_eq!(database, "mysql");
    }
}
