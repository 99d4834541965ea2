//! Portal Channel (§4.7): the heartbeat fallback plus the optional
//! persistent push channel.

pub mod heartbeat;
pub mod push;

pub use heartbeat::Heartbeat;
pub use push::PushChannel;
