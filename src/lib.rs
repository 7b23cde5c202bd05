//! Morse Key - timing-driven Morse telegraph decoder
//!
//! Turns a stream of timed press/release edges into dots and dashes, letters
//! and words. The decoder is headless: any event source that can report edge
//! timestamps can drive it, and deadlines run on an injected [`timer::Timer`].

/// Signal-sequence to character mapping
pub mod code_table;
/// Configuration management
pub mod config;
/// Decoder state machine and observer plumbing
pub mod decoder;
/// Logging setup
pub mod telemetry;
/// Clocks and deadline schedulers
pub mod timer;

pub use code_table::CodeTable;
pub use decoder::{
    Decoder, DecoderBuilder, DecoderError, DecoderEvent, DecoderObserver, DecoderState, Signal,
    Snapshot, Subscription, Thresholds,
};
pub use timer::{Clock, MonotonicClock, Timer, TokioTimer, VirtualTimer};
