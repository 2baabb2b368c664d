mod rows;
mod schema;
mod telemetry_store;

pub use rows::*;
pub use schema::*;
pub use telemetry_store::*;
