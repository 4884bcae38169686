//! # SSCTP
//!
//! Engine for the Simple Serial Command Transfer Protocol: a byte-oriented,
//! bidirectional command protocol for serial links between a host and a
//! microcontroller.
//!
//! - **Wire format**: bit 7 set marks a command byte, otherwise the byte
//!   carries 7 data bits
//! - **Receiver**: state machine that rebuilds typed arguments and dispatches
//!   control commands to a [`CommandHandler`]
//! - **Transmitter**: encoder that keeps every command atomic on a bounded
//!   [`ByteSink`], retracting partial commands when the sink fills up
//!
//! ## Architecture
//!
//! ```text
//!  ┌──────────────────────── Endpoint ────────────────────────┐
//!  │                                                          │
//!  │  bytes ──► Receiver ──► ArgumentStack ──► CommandHandler │
//!  │               │                                 │        │
//!  │               └──── errors ───► Transmitter ◄───┘        │
//!  │                                      │                   │
//!  └──────────────────────────────────────┼───────────────────┘
//!                                         ▼
//!                          ByteSink (RetractableBuffer, IoSink)
//! ```
//!
//! The crate is `no_std` without the `std` feature and never allocates.

#![cfg_attr(not(feature = "std"), no_std)]

#[macro_use]
mod fmt;

pub mod buffer;
pub mod config;
pub mod endpoint;
pub mod protocol;
pub mod receiver;
pub mod stack;
pub mod traits;
pub mod transmitter;

// Re-export main types for convenience
pub use buffer::{BufferError, RetractableBuffer};
pub use config::{Capabilities, Config, ConfigError, ReceiverConfig, TransmitterConfig};
pub use endpoint::Endpoint;
pub use protocol::{CommandClass, ErrorCode};
pub use receiver::{Command, Receiver, ReceiverStats, State};
pub use stack::{ArgumentStack, Value, STACK_SIZE};
pub use traits::{ByteSink, CommandHandler, IoSink};
pub use transmitter::{Transmitter, TransmitterStats};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
