use async_trait::async_trait;
use sqlx::{
    Connection, FromRow, Row,
    mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow},
};
use tracing::{debug, info, warn};

use crate::transport::{Transport, TransportKind, relay::Relay};

use super::{
    Connector, DatabaseError, DbConfig, DbSession, KILL_COMMAND, PROCESSLIST_QUERY, Process,
    data_source_name,
};

pub(crate) struct MySqlConnector;

#[async_trait]
impl Connector for MySqlConnector {
    async fn connect(
        &self,
        config: &DbConfig,
        transport: &dyn Transport,
    ) -> Result<Box<dyn DbSession>, DatabaseError> {
        let kind = transport.kind();
        info!(
            "connecting MySQL server {} ...",
            data_source_name(config, kind)
        );
        let options = MySqlConnectOptions::new()
            .username(&config.username)
            .password(&config.password);
        // the driver dials by itself, so a tunnel is fed to it through a loopback relay
        let (options, relay) = match kind {
            TransportKind::Direct => {
                let target = transport.dialer().target();
                (options.host(&target.host).port(target.port), None)
            }
            TransportKind::Tunneled => {
                let relay = Relay::start(transport.dialer())
                    .await
                    .map_err(DatabaseError::Relay)?;
                let local = relay.local_addr();
                (
                    options.host(&local.ip().to_string()).port(local.port()),
                    Some(relay),
                )
            }
        };
        let connection = MySqlConnection::connect_with(&options)
            .await
            .map_err(|source| DatabaseError::Connection {
                address: config.address(),
                source,
            })?;
        debug!("connected to {}", config.address());
        Ok(Box::new(MySqlSession {
            connection: Some(connection),
            relay,
        }))
    }
}

pub(crate) struct MySqlSession {
    connection: Option<MySqlConnection>,
    /// kept alive for as long as the connection uses it
    relay: Option<Relay>,
}

impl MySqlSession {
    fn connection(&mut self) -> Result<&mut MySqlConnection, DatabaseError> {
        self.connection.as_mut().ok_or(DatabaseError::Closed)
    }
}

#[async_trait]
impl DbSession for MySqlSession {
    async fn list_processes(&mut self) -> Result<Vec<Process>, DatabaseError> {
        let connection = self.connection()?;
        sqlx::query_as::<_, Process>(PROCESSLIST_QUERY)
            .fetch_all(&mut *connection)
            .await
            .map_err(DatabaseError::Query)
    }

    async fn kill_process(&mut self, process_id: u64) -> Result<(), DatabaseError> {
        let connection = self.connection()?;
        sqlx::query(KILL_COMMAND)
            .bind(process_id)
            .execute(&mut *connection)
            .await
            .map_err(|source| DatabaseError::Kill { process_id, source })?;
        debug!("process {} killed", process_id);
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.close().await {
                warn!("error while closing the MySQL connection: {}", e);
            }
        }
        self.relay.take();
    }
}

impl<'r> FromRow<'r, MySqlRow> for Process {
    fn from_row(row: &'r MySqlRow) -> Result<Self, sqlx::Error> {
        Ok(Process {
            id: unsigned(row, "ID")?,
            user: row.try_get("USER")?,
            host: row.try_get("HOST")?,
            database: row.try_get("DB")?,
            command: row.try_get("COMMAND")?,
            elapsed_seconds: unsigned(row, "TIME")?,
            state: row.try_get("STATE")?,
            info: row.try_get("INFO")?,
        })
    }
}

/// Integer columns are unsigned on some servers and signed on others.
fn unsigned(row: &MySqlRow, column: &str) -> Result<u64, sqlx::Error> {
    match row.try_get::<u64, _>(column) {
        Ok(value) => Ok(value),
        Err(_) => non_negative(column, row.try_get(column)?),
    }
}

fn non_negative(column: &str, value: i64) -> Result<u64, sqlx::Error> {
    u64::try_from(value).map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}
