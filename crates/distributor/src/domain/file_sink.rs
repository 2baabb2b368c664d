use crate::domain::{DeviceMessage, SinkOutcome, TelemetryStore};
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use chrono::Utc;
use common::domain::{DomainError, DomainResult, FileRecord};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Standard alphabet, padding optional.
const FILE_DATA_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Stores file uploads under `{root}/{device_id}/{filename}` and records
/// their metadata.
#[derive(Clone)]
pub struct FileSink {
    root: PathBuf,
    store: Option<Arc<dyn TelemetryStore>>,
}

impl FileSink {
    pub fn new(root: impl Into<PathBuf>, store: Option<Arc<dyn TelemetryStore>>) -> Self {
        Self {
            root: root.into(),
            store,
        }
    }

    pub async fn write(&self, message: &DeviceMessage) -> DomainResult<SinkOutcome> {
        if !is_plain_path_component(&message.device_id) {
            return Err(DomainError::SinkWrite(format!(
                "device id '{}' cannot be used as a directory name",
                message.device_id
            )));
        }

        let filename = match message.payload.get("filename") {
            Some(Value::String(name)) if !name.is_empty() => sanitize_filename(name)?,
            _ => format!("{}_{}.bin", message.device_id, Utc::now().timestamp_millis()),
        };

        let bytes = match message.payload.get("data") {
            Some(Value::String(encoded)) => decode_file_data(encoded)?,
            None | Some(Value::Null) => Vec::new(),
            Some(_) => {
                return Err(DomainError::SinkWrite(
                    "file data must be a base64 string".to_string(),
                ))
            }
        };

        let dir = self.root.join(&message.device_id);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            DomainError::SinkWrite(format!("failed to create {}: {}", dir.display(), e))
        })?;

        let path = dir.join(&filename);
        tokio::fs::write(&path, &bytes).await.map_err(|e| {
            DomainError::SinkWrite(format!("failed to write {}: {}", path.display(), e))
        })?;

        info!(
            device_id = %message.device_id,
            filename = %filename,
            bytes = bytes.len(),
            "stored file"
        );

        let record = FileRecord {
            device_id: message.device_id.clone(),
            filename,
            content_type: message.text_field("contentType", DEFAULT_CONTENT_TYPE),
            byte_length: bytes.len() as u64,
            storage_path: path.display().to_string(),
            timestamp: message.record_time(
                message
                    .payload
                    .get("metadata")
                    .and_then(|metadata| metadata.get("timestamp")),
            ),
        };

        match &self.store {
            Some(store) => store.write_file_record(record).await?,
            None => warn!(device_id = %message.device_id, "no time-series store configured, file metadata not recorded"),
        }

        Ok(SinkOutcome::Written(1))
    }
}

/// Decode base64 file data, ignoring the line breaks and blanks that MIME
/// style encoders insert.
fn decode_file_data(encoded: &str) -> DomainResult<Vec<u8>> {
    let compact: Vec<u8> = encoded
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    FILE_DATA_ENGINE
        .decode(compact)
        .map_err(|e| DomainError::SinkWrite(format!("invalid base64 file data: {}", e)))
}

fn is_plain_path_component(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

/// Keep only the final path component of a device supplied filename.
pub fn sanitize_filename(name: &str) -> DomainResult<String> {
    let last = name.rsplit(['/', '\\']).next().unwrap_or_default();
    if !is_plain_path_component(last) {
        return Err(DomainError::SinkWrite(format!("unusable filename '{}'", name)));
    }
    Ok(last.to_string())
}
