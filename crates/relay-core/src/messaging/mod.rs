//! Platform-neutral messaging: inbound update model and the outbound port.

pub mod port;
pub mod throttled;
pub mod types;
