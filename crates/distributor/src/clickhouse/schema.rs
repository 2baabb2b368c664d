pub const SENSOR_DATA_TABLE: &str = "sensor_data";
pub const FILE_METADATA_TABLE: &str = "file_metadata";
pub const EVENTS_TABLE: &str = "events";
pub const COMMAND_RESPONSES_TABLE: &str = "command_responses";
pub const GENERIC_DATA_TABLE: &str = "generic_data";

/// `CREATE TABLE IF NOT EXISTS` statements for every table the store writes,
/// qualified with `database`.
pub fn schema_statements(database: &str) -> Vec<String> {
    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {database}.{SENSOR_DATA_TABLE} (
                device_id LowCardinality(String),
                tenant_id LowCardinality(String),
                data_type LowCardinality(String),
                field LowCardinality(String),
                value Float64,
                timestamp DateTime64(3, 'UTC')
            ) ENGINE = MergeTree
            ORDER BY (device_id, field, timestamp)"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {database}.{FILE_METADATA_TABLE} (
                device_id LowCardinality(String),
                filename String,
                content_type LowCardinality(String),
                file_size UInt64,
                file_path String,
                timestamp DateTime64(3, 'UTC')
            ) ENGINE = MergeTree
            ORDER BY (device_id, timestamp)"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {database}.{EVENTS_TABLE} (
                device_id LowCardinality(String),
                event_type LowCardinality(String),
                severity LowCardinality(String),
                message String,
                count UInt32,
                timestamp DateTime64(3, 'UTC')
            ) ENGINE = MergeTree
            ORDER BY (device_id, event_type, timestamp)"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {database}.{COMMAND_RESPONSES_TABLE} (
                device_id LowCardinality(String),
                command_id String,
                status LowCardinality(String),
                result String,
                response_time_ms Int64,
                timestamp DateTime64(3, 'UTC')
            ) ENGINE = MergeTree
            ORDER BY (device_id, timestamp)"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {database}.{GENERIC_DATA_TABLE} (
                device_id LowCardinality(String),
                data_type LowCardinality(String),
                raw_data String,
                timestamp DateTime64(3, 'UTC')
            ) ENGINE = MergeTree
            ORDER BY (device_id, timestamp)"
        ),
    ]
}
