//! Backend senders, one module per `type` accepted in the outputs file.

pub mod debug;
pub mod signalfx;

pub use debug::{DebugConfig, DebugOutput, DebugSender};
pub use signalfx::{SignalFxConfig, SignalFxOutput, SignalFxSender};
