//! # Transmit Engine
//!
//! Encodes commands and values into wire bytes and keeps command units
//! atomic on a bounded sink.
//!
//! ## Retraction
//!
//! ```text
//!  sink:  ... │ 0x83 d d d │ d d d │ 0x86 ✗ full
//!             ▲ mark        (dirty)
//!
//!  after: ... │ 0x89 CLEAR │ 0xFA OVERRUN │        (corrupt until next command)
//! ```
//!
//! The first byte of a run marks the sink. A control command ends the run
//! and releases the mark. If the sink fills up mid-run, everything since the
//! mark is taken back, the peer is told CLEAR + OVERRUN, and further data is
//! dropped until the next command boundary.

use serde::{Deserialize, Serialize};

use crate::config::TransmitterConfig;
use crate::protocol::{
    command_byte, is_data, is_error, septets, width_for, ErrorCode, CMD_CLEAR, CMD_EXTCMD,
    CMD_FLOAT, CMD_HALT, EXTENDED_CODE_MASK, MAX_DIRECT_CODE, MAX_INT_WIDTH, PAYLOAD_MASK,
};
use crate::stack::Value;
use crate::traits::ByteSink;

/// Counters for the transmit side
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransmitterStats {
    /// Bytes handed to the sink (including later retracted ones)
    pub bytes_written: u32,
    /// Partial runs taken back after the sink filled up
    pub retractions: u32,
    /// Commands and data bytes discarded
    pub dropped: u32,
}

/// Encoder side of an endpoint
#[derive(Debug)]
pub struct Transmitter<S> {
    sink: S,
    config: TransmitterConfig,
    /// Last data command sent, HALT when the next value must be declared
    declared: u8,
    /// Part of the current run is in the sink
    dirty: bool,
    /// A run was abandoned; drop data until the next command
    corrupt: bool,
    stats: TransmitterStats,
}

impl<S: ByteSink> Transmitter<S> {
    pub fn new(sink: S) -> Self {
        Self::with_config(sink, TransmitterConfig::default())
    }

    pub fn with_config(sink: S, config: TransmitterConfig) -> Self {
        Self {
            sink,
            config,
            declared: CMD_HALT,
            dirty: false,
            corrupt: false,
            stats: TransmitterStats::default(),
        }
    }

    /// Send a command
    ///
    /// Codes are limited to 14 bits. Codes above 127 go out as a 2-byte
    /// integer followed by EXTCMD.
    pub fn send_command(&mut self, code: u16) {
        let code = code & EXTENDED_CODE_MASK;
        if is_data(code) {
            self.declared = code as u8;
        } else if !is_error(code) {
            self.declared = CMD_HALT;
        }

        if code > MAX_DIRECT_CODE {
            self.send_int(2, u32::from(code));
            self.emit_command(CMD_EXTCMD);
            self.declared = CMD_HALT;
            return;
        }
        self.emit_command(code as u8);
    }

    /// Send an unsigned integer as `width` data bytes
    ///
    /// Widths outside `1..=5` are ignored.
    pub fn send_int(&mut self, width: u8, value: u32) {
        if !(1..=MAX_INT_WIDTH).contains(&width) {
            return;
        }
        if self.declared != width {
            self.send_command(u16::from(width));
        }
        for byte in septets(u64::from(value), width) {
            self.emit_data(byte);
        }
    }

    /// 7-bit integer
    pub fn send_int7(&mut self, value: u32) {
        self.send_int(1, value);
    }

    /// 14-bit integer
    pub fn send_int14(&mut self, value: u32) {
        self.send_int(2, value);
    }

    /// 21-bit integer
    pub fn send_int21(&mut self, value: u32) {
        self.send_int(3, value);
    }

    /// 28-bit integer
    pub fn send_int28(&mut self, value: u32) {
        self.send_int(4, value);
    }

    /// Full 32-bit integer in 5 data bytes
    pub fn send_int35(&mut self, value: u32) {
        self.send_int(5, value);
    }

    /// Send a float as its 32-bit pattern in 5 data bytes
    pub fn send_float(&mut self, value: f32) {
        if !self.config.float {
            return;
        }
        if self.declared != CMD_FLOAT {
            self.send_command(u16::from(CMD_FLOAT));
        }
        for byte in septets(u64::from(value.to_bits()), 5) {
            self.emit_data(byte);
        }
    }

    /// Send a value, integers in the narrowest width that holds them
    pub fn send_value(&mut self, value: Value) {
        match value {
            Value::Int(v) => self.send_int(width_for(v), v),
            Value::Float(v) => self.send_float(v),
        }
    }

    /// Send `args` followed by `code`
    pub fn send_command_with(&mut self, code: u16, args: &[Value]) {
        for arg in args {
            self.send_value(*arg);
        }
        self.send_command(code);
    }

    /// Report an error to the peer (suppressed when errors are disabled)
    pub fn send_error(&mut self, code: ErrorCode) {
        if self.config.send_errors {
            self.send_command(code.into());
        }
    }

    /// Acknowledge
    pub fn send_ok(&mut self) {
        self.send_error(ErrorCode::Ok);
    }

    fn emit_command(&mut self, code: u8) {
        let data = is_data(u16::from(code));
        let error = is_error(u16::from(code));

        // Errors bypass the corrupt gate; they never start or end a run.
        if self.corrupt && !error {
            if !data {
                trace!("command {} ends corrupt run", code);
                self.corrupt = false;
            }
            self.drop_item();
            return;
        }

        if !self.sink.is_free() {
            if !error {
                if self.dirty {
                    self.retract();
                }
                if data {
                    self.corrupt = true;
                }
            }
            self.drop_item();
            return;
        }

        if data {
            self.begin_run();
        } else if !error {
            self.dirty = false;
            self.sink.clear_mark();
        }
        self.put(command_byte(code));
    }

    fn emit_data(&mut self, byte: u8) {
        if self.corrupt {
            self.drop_item();
            return;
        }

        if !self.sink.is_free() {
            if self.dirty {
                self.retract();
            }
            self.corrupt = true;
            self.drop_item();
            return;
        }

        self.begin_run();
        self.put(byte & PAYLOAD_MASK);
    }

    fn begin_run(&mut self) {
        if !self.dirty {
            self.sink.mark();
            self.dirty = true;
        }
    }

    fn retract(&mut self) {
        self.sink.restore_to_mark();
        self.dirty = false;
        self.sink.clear_mark();
        self.stats.retractions = self.stats.retractions.wrapping_add(1);
        warn!("sink full mid-command, retracted (total {})", self.stats.retractions);

        self.send_command(u16::from(CMD_CLEAR));
        self.send_error(ErrorCode::Overrun);
    }

    fn put(&mut self, byte: u8) {
        self.sink.write(byte);
        self.stats.bytes_written = self.stats.bytes_written.wrapping_add(1);
    }

    fn drop_item(&mut self) {
        self.stats.dropped = self.stats.dropped.wrapping_add(1);
    }

    /// Forget the declared type and take back any unfinished run
    pub fn reset(&mut self) {
        if self.dirty {
            self.sink.restore_to_mark();
            self.sink.clear_mark();
        }
        self.declared = CMD_HALT;
        self.dirty = false;
        self.corrupt = false;
    }

    /// Data command the next value of the same type can skip, HALT if none
    #[inline]
    pub fn declared_type(&self) -> u8 {
        self.declared
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[inline]
    pub fn is_corrupt(&self) -> bool {
        self.corrupt
    }

    #[inline]
    pub fn stats(&self) -> TransmitterStats {
        self.stats
    }

    #[inline]
    pub fn config(&self) -> &TransmitterConfig {
        &self.config
    }

    #[inline]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    #[inline]
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}
