pub mod codec;
mod service;

pub use codec::{read_message, write_message, Message, WireError};
pub use service::{NetworkConfig, NetworkService, RECONNECT_INTERVAL_SECS};
