use async_trait::async_trait;
use common::domain::{
    CommandResponseRecord, DomainResult, EventRecord, FileRecord, GenericRecord, SensorPoint,
};

/// Write contract of the time-series store.
///
/// Implementations report failures as `DomainError::SinkWrite`.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    async fn write_sensor_points(&self, points: Vec<SensorPoint>) -> DomainResult<()>;

    async fn write_file_record(&self, record: FileRecord) -> DomainResult<()>;

    async fn write_event(&self, record: EventRecord) -> DomainResult<()>;

    async fn write_command_response(&self, record: CommandResponseRecord) -> DomainResult<()>;

    async fn write_generic(&self, record: GenericRecord) -> DomainResult<()>;
}

/// What a sink did with one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkOutcome {
    /// This many records (or files) were written.
    Written(usize),
    /// Nothing was written; the reason is logged.
    Skipped(String),
}

impl SinkOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped(reason.into())
    }
}

pub const STORE_NOT_CONFIGURED: &str = "time-series store not configured";
