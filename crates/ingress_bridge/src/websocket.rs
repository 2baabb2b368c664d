mod listener;
mod session;

pub use listener::*;
pub use session::*;
