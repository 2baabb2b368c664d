use anyhow::{Context, Result};
use clickhouse::Client;

/// Connection parameters for the time-series store.
#[derive(Debug, Clone)]
pub struct ClickHouseConfig {
    pub url: String,
    pub database: String,
    pub username: String,
    pub password: String,
}

#[derive(Clone)]
pub struct ClickHouseClient {
    client: Client,
    database: String,
}

impl ClickHouseClient {
    pub fn new(config: &ClickHouseConfig) -> Self {
        let client = Client::default()
            .with_url(&config.url)
            .with_database(&config.database)
            .with_user(&config.username)
            .with_password(&config.password)
            .with_compression(clickhouse::Compression::Lz4);

        Self {
            client,
            database: config.database.clone(),
        }
    }

    /// Run a statement that returns no rows (DDL and the like).
    pub async fn execute(&self, statement: &str) -> Result<()> {
        self.client
            .query(statement)
            .execute()
            .await
            .with_context(|| format!("ClickHouse statement failed: {}", statement))?;
        Ok(())
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn get_client(&self) -> &Client {
        &self.client
    }
}
