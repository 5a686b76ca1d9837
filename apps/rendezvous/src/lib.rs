pub mod config;
pub mod media;
pub mod native;
pub mod session;
pub mod telemetry;
pub mod transport;

pub use signal_wire::{Decoded, IceCandidate, SdpType, SessionDescription, SignalMessage};
