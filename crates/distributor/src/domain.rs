mod device_message;
mod dispatcher;
mod event_sink;
mod file_sink;
mod generic_sink;
mod response_sink;
mod telemetry_store;
mod time_series_sink;

pub use device_message::*;
pub use dispatcher::*;
pub use event_sink::*;
pub use file_sink::*;
pub use generic_sink::*;
pub use response_sink::*;
pub use telemetry_store::*;
pub use time_series_sink::*;
