mod domain;
mod ingress_bridge;
mod mqtt;
mod websocket;

pub use domain::*;
pub use ingress_bridge::*;
pub use mqtt::*;
pub use websocket::*;
