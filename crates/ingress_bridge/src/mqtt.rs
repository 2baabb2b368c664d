mod command_relay;

pub use command_relay::*;
