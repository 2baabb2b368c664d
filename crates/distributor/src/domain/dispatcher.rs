use crate::domain::{
    DeviceMessage, EventSink, FileSink, GenericSink, ResponseSink, SinkOutcome, TelemetryStore,
    TimeSeriesSink,
};
use common::domain::{Category, DomainResult, Topic};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Sink a message is dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    TimeSeries,
    File,
    Event,
    Response,
    Generic,
}

impl Route {
    /// Pick a sink: an explicit, known `dataType` first, then the topic's
    /// channel, then the generic fallback.
    pub fn select(data_type: Option<&str>, topic: &Topic) -> Self {
        match data_type.and_then(|declared| declared.parse::<Category>().ok()) {
            Some(Category::TimeSeries) => Self::TimeSeries,
            Some(Category::File) => Self::File,
            Some(Category::Event) => Self::Event,
            Some(Category::Response) => Self::Response,
            Some(Category::Command) | None => match topic.category {
                Category::File => Self::File,
                Category::Event => Self::Event,
                Category::Response => Self::Response,
                Category::TimeSeries | Category::Command => Self::Generic,
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TimeSeries => "timeseries",
            Self::File => "file",
            Self::Event => "event",
            Self::Response => "response",
            Self::Generic => "generic",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    pub route: Route,
    pub outcome: SinkOutcome,
}

/// Decodes broker messages and hands each to exactly one sink.
pub struct Dispatcher {
    time_series: TimeSeriesSink,
    file: FileSink,
    event: EventSink,
    response: ResponseSink,
    generic: GenericSink,
}

impl Dispatcher {
    /// With no store, only file bytes are persisted; every other write is
    /// skipped with a warning.
    pub fn new(store: Option<Arc<dyn TelemetryStore>>, file_root: impl Into<PathBuf>) -> Self {
        let time_series = TimeSeriesSink::new(store.clone());
        Self {
            file: FileSink::new(file_root, store.clone()),
            event: EventSink::new(store.clone()),
            response: ResponseSink::new(store.clone()),
            generic: GenericSink::new(time_series.clone(), store),
            time_series,
        }
    }

    pub async fn dispatch(&self, topic: &str, raw: &[u8]) -> DomainResult<Dispatched> {
        let topic = Topic::parse(topic)?;
        let message = DeviceMessage::decode(topic, raw)?;
        let route = Route::select(message.data_type.as_deref(), &message.topic);

        debug!(
            device_id = %message.device_id,
            tenant_id = message.tenant_id.as_deref().unwrap_or(""),
            data_type = message.data_type.as_deref().unwrap_or("auto-detected"),
            route = %route,
            "dispatching message"
        );

        let outcome = match route {
            Route::TimeSeries => self.time_series.write(&message).await?,
            Route::File => self.file.write(&message).await?,
            Route::Event => self.event.write(&message).await?,
            Route::Response => self.response.write(&message).await?,
            Route::Generic => self.generic.write(&message).await?,
        };

        Ok(Dispatched { route, outcome })
    }
}
