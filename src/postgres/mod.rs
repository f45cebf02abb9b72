//! PostgreSQL connection provider backed by `tokio-postgres`

use async_trait::async_trait;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error};

use crate::pool::{BoxError, ConnectionProvider};

/// Opens plain-TCP PostgreSQL sessions
///
/// Accepts both `postgres://` URLs and `key=value` connection strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgProvider;

#[async_trait]
impl ConnectionProvider for PgProvider {
    type Connection = Client;

    async fn open(&self, url: &str) -> Result<Client, BoxError> {
        let (client, connection) = tokio_postgres::connect(url, NoTls).await?;

        // Drive the socket until the client is dropped
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection error");
            }
        });

        debug!("PostgreSQL connection established");
        Ok(client)
    }

    async fn ping(&self, client: &Client) -> Result<(), BoxError> {
        client.simple_query("SELECT 1").await?;
        Ok(())
    }

    async fn close(&self, client: Client) {
        // Dropping the client ends the connection task
        drop(client);
    }
}
