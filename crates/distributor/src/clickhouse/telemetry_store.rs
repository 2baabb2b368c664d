use crate::clickhouse::{
    schema_statements, CommandResponseRow, EventRow, FileMetadataRow, GenericDataRow, SensorDataRow,
    COMMAND_RESPONSES_TABLE, EVENTS_TABLE, FILE_METADATA_TABLE, GENERIC_DATA_TABLE, SENSOR_DATA_TABLE,
};
use crate::domain::TelemetryStore;
use async_trait::async_trait;
use common::clickhouse::ClickHouseClient;
use common::domain::{
    CommandResponseRecord, DomainError, DomainResult, EventRecord, FileRecord, GenericRecord,
    SensorPoint,
};
use tracing::{debug, error, info};

/// Insert `$rows` into `$table` as one batch.
macro_rules! insert_rows {
    ($client:expr, $row:ty, $table:expr, $rows:expr) => {{
        let rows: Vec<$row> = $rows;
        let mut insert = $client
            .get_client()
            .insert::<$row>($table)
            .await
            .map_err(|e| {
                error!(table = $table, "failed to create ClickHouse inserter: {}", e);
                DomainError::SinkWrite(e.to_string())
            })?;

        for row in &rows {
            insert.write(row).await.map_err(|e| {
                error!(table = $table, "failed to write row to ClickHouse: {}", e);
                DomainError::SinkWrite(e.to_string())
            })?;
        }

        insert.end().await.map_err(|e| {
            error!(table = $table, "failed to finalize ClickHouse insert: {}", e);
            DomainError::SinkWrite(e.to_string())
        })?;

        debug!(table = $table, rows_inserted = rows.len(), "stored rows");
        Ok(())
    }};
}

/// [`TelemetryStore`] backed by ClickHouse tables.
#[derive(Clone)]
pub struct ClickHouseTelemetryStore {
    client: ClickHouseClient,
}

impl ClickHouseTelemetryStore {
    pub fn new(client: ClickHouseClient) -> Self {
        Self { client }
    }

    /// Create any missing tables.
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        for statement in schema_statements(self.client.database()) {
            self.client.execute(&statement).await?;
        }
        info!(database = %self.client.database(), "ClickHouse schema ready");
        Ok(())
    }
}

#[async_trait]
impl TelemetryStore for ClickHouseTelemetryStore {
    async fn write_sensor_points(&self, points: Vec<SensorPoint>) -> DomainResult<()> {
        if points.is_empty() {
            return Ok(());
        }
        insert_rows!(
            self.client,
            SensorDataRow,
            SENSOR_DATA_TABLE,
            points.iter().map(SensorDataRow::from).collect()
        )
    }

    async fn write_file_record(&self, record: FileRecord) -> DomainResult<()> {
        insert_rows!(
            self.client,
            FileMetadataRow,
            FILE_METADATA_TABLE,
            vec![FileMetadataRow::from(&record)]
        )
    }

    async fn write_event(&self, record: EventRecord) -> DomainResult<()> {
        insert_rows!(self.client, EventRow, EVENTS_TABLE, vec![EventRow::from(&record)])
    }

    async fn write_command_response(&self, record: CommandResponseRecord) -> DomainResult<()> {
        insert_rows!(
            self.client,
            CommandResponseRow,
            COMMAND_RESPONSES_TABLE,
            vec![CommandResponseRow::from(&record)]
        )
    }

    async fn write_generic(&self, record: GenericRecord) -> DomainResult<()> {
        insert_rows!(
            self.client,
            GenericDataRow,
            GENERIC_DATA_TABLE,
            vec![GenericDataRow::from(&record)]
        )
    }
}
