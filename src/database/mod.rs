use async_trait::async_trait;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

use crate::transport::{Transport, TransportKind};

pub(crate) mod mysql;

pub(crate) const PROCESSLIST_QUERY: &str =
    "SELECT * FROM information_schema.PROCESSLIST ORDER BY TIME DESC";
pub(crate) const KILL_COMMAND: &str = "KILL ?";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DbConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl DbConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// `username:password@transport(host:port)/` with the password masked, for logs.
pub(crate) fn data_source_name(config: &DbConfig, kind: TransportKind) -> String {
    let password = if config.password.is_empty() { "" } else { "***" };
    format!(
        "{}:{}@{}({})/",
        config.username,
        password,
        kind.tag(),
        config.address()
    )
}

/// One row of `information_schema.PROCESSLIST`, as it was when listed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Process {
    pub id: u64,
    pub user: String,
    pub host: String,
    pub database: Option<String>,
    pub command: String,
    pub elapsed_seconds: u64,
    pub state: Option<String>,
    pub info: Option<String>,
}

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("fail to start the local relay for the tunnel")]
    Relay(#[source] std::io::Error),
    #[error("fail to connect MySQL server {address}")]
    Connection {
        address: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("fail to select PROCESSLIST")]
    Query(#[source] sqlx::Error),
    #[error("fail to KILL process {process_id}")]
    Kill {
        process_id: u64,
        #[source]
        source: sqlx::Error,
    },
    #[error("database session is closed")]
    Closed,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub(crate) trait DbSession: Send {
    /// Longest running first, as ordered by the server.
    async fn list_processes(&mut self) -> Result<Vec<Process>, DatabaseError>;
    /// Success means the server accepted the command, nothing more.
    async fn kill_process(&mut self, process_id: u64) -> Result<(), DatabaseError>;
    /// Idempotent.
    async fn close(&mut self);
}

#[async_trait]
pub(crate) trait Connector: Send + Sync {
    async fn connect(
        &self,
        config: &DbConfig,
        transport: &dyn Transport,
    ) -> Result<Box<dyn DbSession>, DatabaseError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(password: &str) -> DbConfig {
        DbConfig {
            host: String::from("10.0.0.5"),
            port: 3306,
            username: String::from("root"),
            password: password.to_string(),
        }
    }

    #[test]
    fn data_source_name_masks_the_password() {
        assert_eq!(
            data_source_name(&config("secret"), TransportKind::Direct),
            "root:***@tcp(10.0.0.5:3306)/"
        );
        assert_eq!(
            data_source_name(&config("secret"), TransportKind::Tunneled),
            "root:***@ssh+tcp(10.0.0.5:3306)/"
        );
        assert_eq!(
            data_source_name(&config(""), TransportKind::Direct),
            "root:@tcp(10.0.0.5:3306)/"
        );
    }
}
