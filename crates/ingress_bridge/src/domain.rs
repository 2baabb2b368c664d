mod bridge_service;
mod connection;
mod connection_registry;
mod outbound;
mod scheduler;

pub use bridge_service::*;
pub use connection::*;
pub use connection_registry::*;
pub use outbound::*;
pub use scheduler::*;
