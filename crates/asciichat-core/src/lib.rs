pub mod config;
pub mod errors;
pub mod identity;
pub mod types;

pub use config::CallConfig;
pub use errors::{CallError, CodecError, ConfigError, SessionError, SignalingError, TransportError, Truncation};
pub use identity::Identity;
pub use types::*;
