mod acks;
mod client;
mod config;
mod middleware;
mod subscriber;
mod traits;
mod types;

pub use acks::*;
pub use client::*;
pub use config::*;
pub use middleware::*;
pub use subscriber::*;
pub use traits::*;
pub use types::*;
