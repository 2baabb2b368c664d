mod clickhouse;
mod distributor;
mod domain;
mod mqtt;

pub use clickhouse::*;
pub use distributor::*;
pub use domain::*;
pub use mqtt::*;
