//! # Receive State Machine
//!
//! Feeds on one byte at a time and turns the stream back into commands with
//! typed arguments.
//!
//! ## States
//!
//! ```text
//!            data command                 value complete
//!   ┌──────┐ ───────────► ┌─────────────┐ ─────────────┐
//!   │ Idle │              │ Collecting  │              │
//!   └──────┘ ◄─────────── └─────────────┘ ◄────────────┘
//!            HALT / forced halt
//! ```
//!
//! Data bytes are OR-ed into a shift buffer 7 bits at a time. Completed
//! values land on the argument stack; a control command dispatches the stack
//! and then clears it. Every data byte consumed is XOR-ed into a rolling
//! checksum which the peer can challenge with VERIFY.

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, ReceiverConfig};
use crate::protocol::{
    clears_checksum, data_size, is_command_byte, is_data, is_error, ErrorCode, BITS_PER_BYTE,
    CMD_ASYNC, CMD_ASYNCEND, CMD_BYTE1, CMD_BYTE5, CMD_CLEAR, CMD_EXTCMD, CMD_FLOAT, CMD_HALT,
    CMD_VERIFY, EXTENDED_CODE_MASK, PAYLOAD_MASK,
};
use crate::stack::{ArgumentStack, Value, STACK_SIZE};
use crate::traits::{ByteSink, CommandHandler};
use crate::transmitter::Transmitter;

/// Where the receiver is within a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    /// No active data mode; stray data bytes are dropped
    Idle,
    /// Reassembling a value of data command `mode`
    Collecting { mode: u8, received: u8 },
}

/// Counters for the receive side
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReceiverStats {
    /// Bytes fed in
    pub bytes: u32,
    /// Control commands dispatched
    pub commands: u32,
    /// Values appended to the stack
    pub values: u32,
    /// Data bytes that arrived with no active mode
    pub dropped: u32,
    /// Forced halts because the session was full
    pub overflows: u32,
}

#[derive(Debug, Default)]
struct Retention {
    preserve: bool,
    force_clear: bool,
}

/// A control command handed to the application
///
/// Borrows the argument stack and the transmitter for the duration of the
/// call.
pub struct Command<'a, S: ByteSink> {
    code: u16,
    args: &'a [Value],
    transmitter: &'a mut Transmitter<S>,
    retention: &'a mut Retention,
}

impl<'a, S: ByteSink> Command<'a, S> {
    /// Command code, resolved through EXTCMD
    #[inline]
    pub fn code(&self) -> u16 {
        self.code
    }

    #[inline]
    pub fn argc(&self) -> usize {
        self.args.len()
    }

    /// Arguments in arrival order
    #[inline]
    pub fn args(&self) -> &'a [Value] {
        self.args
    }

    #[inline]
    pub fn arg(&self, index: usize) -> Option<Value> {
        self.args.get(index).copied()
    }

    /// Transmitter for replies
    #[inline]
    pub fn transmitter(&mut self) -> &mut Transmitter<S> {
        self.transmitter
    }

    /// Keep the arguments for the next command instead of clearing them
    pub fn preserve_buffer(&mut self) {
        self.retention.preserve = true;
    }

    /// Clear the arguments after this call even if preserved
    pub fn clear_buffer(&mut self) {
        self.retention.force_clear = true;
    }
}

/// Decoder side of an endpoint
#[derive(Debug, Clone)]
pub struct Receiver<const N: usize = STACK_SIZE> {
    config: ReceiverConfig,
    stack: ArgumentStack<N>,
    /// Active data command, HALT when idle
    mode: u8,
    /// Data bytes per value in the active mode
    expected: u8,
    /// Data bytes of the current value so far
    received: u8,
    shift: u64,
    checksum: u8,
    stats: ReceiverStats,
}

impl<const N: usize> Receiver<N> {
    pub fn new() -> Self {
        let config = ReceiverConfig::for_stack(N);
        Self {
            config,
            stack: ArgumentStack::with_capacities(config.int_capacity, config.float_capacity),
            mode: CMD_HALT,
            expected: 0,
            received: 0,
            shift: 0,
            checksum: 0,
            stats: ReceiverStats::default(),
        }
    }

    pub fn with_config(config: ReceiverConfig) -> Result<Self, ConfigError> {
        config.validate(N)?;
        Ok(Self {
            config,
            stack: ArgumentStack::with_capacities(config.int_capacity, config.float_capacity),
            ..Self::new()
        })
    }

    /// Feed one byte from the link
    ///
    /// Errors detected here are reported to the peer through `tx`; the
    /// receiver is always ready for the next byte afterwards.
    pub fn receive_byte<S, H>(&mut self, byte: u8, tx: &mut Transmitter<S>, handler: &mut H)
    where
        S: ByteSink,
        H: CommandHandler<S>,
    {
        self.stats.bytes = self.stats.bytes.wrapping_add(1);
        if is_command_byte(byte) {
            self.receive_command(byte & PAYLOAD_MASK, tx, handler);
        } else {
            self.receive_data(byte, tx, handler);
        }
    }

    fn receive_command<S, H>(&mut self, code: u8, tx: &mut Transmitter<S>, handler: &mut H)
    where
        S: ByteSink,
        H: CommandHandler<S>,
    {
        if is_error(u16::from(code)) {
            // Must not touch the shift buffer: errors may interleave a value.
            debug!("peer reported {}", code);
            handler.on_error(code);
            return;
        }

        self.shift = 0;
        self.received = 0;

        let mut code = code;
        if is_data(u16::from(code)) {
            if self.stack.is_full() && code != CMD_HALT {
                warn!("receive buffers full, halting (mode {})", code);
                code = CMD_HALT;
                self.stats.overflows = self.stats.overflows.wrapping_add(1);
                tx.send_error(ErrorCode::Overflow);
            }
            if !self.config.capabilities.supports(code) {
                warn!("unsupported data command {}", code);
                code = CMD_HALT;
                tx.send_error(ErrorCode::UnknownCommand);
            }
            self.mode = code;
            self.expected = data_size(code).unwrap_or(0);
        } else {
            self.dispatch(code, tx, handler);
        }

        if clears_checksum(u16::from(code)) {
            self.checksum = 0;
        }
    }

    fn dispatch<S, H>(&mut self, code: u8, tx: &mut Transmitter<S>, handler: &mut H)
    where
        S: ByteSink,
        H: CommandHandler<S>,
    {
        self.stats.commands = self.stats.commands.wrapping_add(1);
        trace!("dispatch {} with {} args", code, self.stack.len());

        let mut retention = Retention::default();
        process_command(
            u16::from(code),
            self.stack.as_slice(),
            self.checksum,
            N,
            tx,
            handler,
            &mut retention,
        );
        if retention.force_clear || !retention.preserve {
            self.stack.clear();
        }
    }

    fn receive_data<S, H>(&mut self, byte: u8, tx: &mut Transmitter<S>, handler: &mut H)
    where
        S: ByteSink,
        H: CommandHandler<S>,
    {
        if self.mode == CMD_HALT || self.expected == 0 {
            trace!("stray data byte {}", byte);
            self.stats.dropped = self.stats.dropped.wrapping_add(1);
            return;
        }

        if self.stack.is_full() {
            // Re-entering the active mode halts and reports the overflow.
            self.receive_command(self.mode, tx, handler);
            return;
        }

        self.checksum ^= byte;
        if self.received < self.expected {
            self.shift |= u64::from(byte) << (BITS_PER_BYTE * u32::from(self.received));
            self.received += 1;
        }

        if self.received >= self.expected {
            let value = match self.mode {
                CMD_BYTE1..=CMD_BYTE5 => Some(Value::Int(self.shift as u32)),
                CMD_FLOAT => Some(Value::Float(f32::from_bits(self.shift as u32))),
                _ => None,
            };
            if let Some(value) = value {
                if self.stack.push(value).is_ok() {
                    self.stats.values = self.stats.values.wrapping_add(1);
                }
            }
            self.shift = 0;
            self.received = 0;
        }
    }

    /// Drop all collected arguments now
    pub fn clear_buffer(&mut self) {
        self.stack.clear();
    }

    /// Back to the initial state, keeping configuration
    pub fn reset(&mut self) {
        self.stack.clear();
        self.mode = CMD_HALT;
        self.expected = 0;
        self.received = 0;
        self.shift = 0;
        self.checksum = 0;
    }

    /// Arguments collected so far
    #[inline]
    pub fn args(&self) -> &[Value] {
        self.stack.as_slice()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.stack.is_full()
    }

    /// XOR of the data bytes since the last checksum-clearing command
    #[inline]
    pub fn checksum(&self) -> u8 {
        self.checksum
    }

    pub fn state(&self) -> State {
        if self.mode == CMD_HALT || self.expected == 0 {
            State::Idle
        } else {
            State::Collecting {
                mode: self.mode,
                received: self.received,
            }
        }
    }

    #[inline]
    pub fn stats(&self) -> ReceiverStats {
        self.stats
    }

    #[inline]
    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }
}

impl<const N: usize> Default for Receiver<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Run one control command, resolving EXTCMD chains first
fn process_command<S, H>(
    code: u16,
    args: &[Value],
    checksum: u8,
    max_depth: usize,
    tx: &mut Transmitter<S>,
    handler: &mut H,
    retention: &mut Retention,
) where
    S: ByteSink,
    H: CommandHandler<S>,
{
    let mut code = code;
    let mut args = args;
    let mut depth = 0;

    // The real code travels as the last integer argument.
    while code == u16::from(CMD_EXTCMD) {
        depth += 1;
        let resolved = args.split_last().and_then(|(last, rest)| {
            let next = last.as_int().and_then(|c| u16::try_from(c).ok())?;
            (next <= EXTENDED_CODE_MASK).then_some((next, rest))
        });
        match resolved {
            Some((next, rest)) if depth <= max_depth => {
                code = next;
                args = rest;
            }
            _ => {
                tx.send_error(ErrorCode::InvalidCommand);
                return;
            }
        }
    }

    match code {
        c if c == u16::from(CMD_VERIFY) => match args.first().and_then(Value::as_int) {
            Some(expected) if expected == u32::from(checksum) => tx.send_ok(),
            Some(_) => {
                debug!("verify failed, checksum {}", checksum);
                tx.send_error(ErrorCode::DataCorrupt);
            }
            None => tx.send_error(ErrorCode::InvalidCommand),
        },
        c if c == u16::from(CMD_CLEAR) => {}
        c if c == u16::from(CMD_ASYNC) || c == u16::from(CMD_ASYNCEND) => {
            tx.send_error(ErrorCode::UnknownCommand);
        }
        _ => handler.handle(Command {
            code,
            args,
            transmitter: tx,
            retention,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::RetractableBuffer;
    use crate::config::Capabilities;
    use heapless::Vec;
    use proptest::prelude::*;

    type Sink = RetractableBuffer<64>;

    #[derive(Default)]
    struct Recorder {
        commands: Vec<(u16, Vec<Value, 16>), 8>,
        errors: Vec<u8, 8>,
        preserve: Option<u16>,
        force_clear: bool,
    }

    impl<S: ByteSink> CommandHandler<S> for Recorder {
        fn handle(&mut self, mut cmd: Command<'_, S>) {
            let args = Vec::from_slice(cmd.args()).unwrap();
            self.commands.push((cmd.code(), args)).unwrap();
            if self.preserve == Some(cmd.code()) {
                cmd.preserve_buffer();
                if self.force_clear {
                    cmd.clear_buffer();
                }
            }
        }

        fn on_error(&mut self, code: u8) {
            self.errors.push(code).unwrap();
        }
    }

    struct Harness<const N: usize> {
        rx: Receiver<N>,
        tx: Transmitter<Sink>,
        handler: Recorder,
    }

    impl<const N: usize> Harness<N> {
        fn new() -> Self {
            Self::with_receiver(Receiver::new())
        }

        fn with_receiver(rx: Receiver<N>) -> Self {
            Self {
                rx,
                tx: Transmitter::new(Sink::new()),
                handler: Recorder::default(),
            }
        }

        fn feed(&mut self, bytes: &[u8]) {
            for &byte in bytes {
                self.rx.receive_byte(byte, &mut self.tx, &mut self.handler);
            }
        }

        fn sent(&mut self) -> Vec<u8, 64> {
            let mut out = Vec::new();
            while let Some(byte) = self.tx.sink().pop() {
                out.push(byte).unwrap();
            }
            out
        }
    }

    #[test]
    fn test_single_byte_int() {
        let mut h = Harness::<10>::new();
        h.feed(&[0x81, 0x05]);

        assert_eq!(h.rx.args(), &[Value::Int(5)]);
        assert_eq!(h.rx.checksum(), 0x05);
        assert_eq!(h.rx.state(), State::Collecting { mode: 1, received: 0 });
        assert!(h.sent().is_empty());
    }

    #[test]
    fn test_verify_compares_first_argument() {
        let mut h = Harness::<10>::new();
        h.feed(&[0x81, 0x05, 0x8A]);
        assert_eq!(h.sent(), [0xF6]);
        assert!(h.rx.args().is_empty());
        assert_eq!(h.rx.checksum(), 0);

        // Mode survives the control command
        h.feed(&[0x00]);
        assert_eq!(h.rx.args(), &[Value::Int(0)]);
    }

    #[test]
    fn test_verify_mismatch() {
        let mut h = Harness::<10>::new();
        h.feed(&[0x81, 0x05, 0x03, 0x8A]);
        assert_eq!(h.sent(), [0xFD]);
    }

    #[test]
    fn test_verify_requires_int_argument() {
        let mut h = Harness::<10>::new();
        h.feed(&[0x8A]);
        h.feed(&[0x86, 0x00, 0x00, 0x00, 0x01, 0x04, 0x8A]);
        assert_eq!(h.sent(), [0xFF, 0xFF]);
    }

    #[test]
    fn test_user_command_receives_typed_args() {
        let mut h = Harness::<10>::new();
        h.feed(&[0x82, 0x2C, 0x02, 0x86, 0x00, 0x00, 0x00, 0x01, 0x04, 0x94]);

        let (code, args) = &h.handler.commands[0];
        assert_eq!(*code, 20);
        assert_eq!(args.as_slice(), &[Value::Int(300), Value::Float(2.5)]);
        assert!(h.rx.args().is_empty());
        assert_eq!(h.rx.stats().commands, 1);
        assert_eq!(h.rx.stats().values, 2);
    }

    #[test]
    fn test_preserve_buffer_keeps_args() {
        let mut h = Harness::<10>::new();
        h.handler.preserve = Some(30);
        h.feed(&[0x81, 0x07, 0x9E]);
        assert_eq!(h.rx.args(), &[Value::Int(7)]);

        h.feed(&[0x94]);
        assert_eq!(h.handler.commands[1].0, 20);
        assert_eq!(h.handler.commands[1].1.as_slice(), &[Value::Int(7)]);
        assert!(h.rx.args().is_empty());
    }

    #[test]
    fn test_clear_buffer_overrides_preserve() {
        let mut h = Harness::<10>::new();
        h.handler.preserve = Some(30);
        h.handler.force_clear = true;
        h.feed(&[0x81, 0x07, 0x9E]);
        assert!(h.rx.args().is_empty());
    }

    #[test]
    fn test_error_codes_leave_state_alone() {
        let mut h = Harness::<10>::new();
        h.feed(&[0x82, 0x2C, 0xF6, 0x02]);

        assert_eq!(h.rx.args(), &[Value::Int(300)]);
        assert_eq!(h.rx.checksum(), 0x2C ^ 0x02);
        assert_eq!(h.handler.errors, [118]);
        assert!(h.handler.commands.is_empty());
        assert!(h.sent().is_empty());
    }

    #[test]
    fn test_stray_data_is_dropped() {
        let mut h = Harness::<10>::new();
        h.feed(&[0x05, 0x06]);
        assert_eq!(h.rx.state(), State::Idle);
        assert!(h.rx.args().is_empty());
        assert_eq!(h.rx.checksum(), 0);
        assert_eq!(h.rx.stats().dropped, 2);
        assert!(h.sent().is_empty());
    }

    #[test]
    fn test_command_discards_partial_value() {
        let mut h = Harness::<10>::new();
        h.feed(&[0x82, 0x05, 0x81, 0x07]);
        assert_eq!(h.rx.args(), &[Value::Int(7)]);
        // Data commands do not clear the checksum
        assert_eq!(h.rx.checksum(), 0x05 ^ 0x07);
    }

    #[test]
    fn test_unsupported_widths_halt() {
        let mut h = Harness::<10>::new();
        h.feed(&[0x84, 0x01]);
        assert_eq!(h.rx.state(), State::Idle);
        assert!(h.rx.args().is_empty());

        h.feed(&[0x87, 0x88]);
        assert_eq!(h.sent(), [0xFE, 0xFE, 0xFE]);
    }

    #[test]
    fn test_float_disabled_behaves_like_unsupported_width() {
        let config = ReceiverConfig {
            capabilities: Capabilities {
                float: false,
                max_int_width: 3,
            },
            ..ReceiverConfig::for_stack(10)
        };
        let mut h = Harness::<10>::with_receiver(Receiver::with_config(config).unwrap());
        h.feed(&[0x86, 0x00]);
        assert_eq!(h.rx.state(), State::Idle);
        assert_eq!(h.sent(), [0xFE]);
    }

    #[test]
    fn test_wide_ints_when_enabled() {
        let config = ReceiverConfig {
            capabilities: Capabilities {
                float: true,
                max_int_width: 5,
            },
            ..ReceiverConfig::for_stack(10)
        };
        let mut h = Harness::<10>::with_receiver(Receiver::with_config(config).unwrap());
        h.feed(&[0x85, 0x7F, 0x7F, 0x7F, 0x7F, 0x7F]);
        // 35 bits truncated to 32
        assert_eq!(h.rx.args(), &[Value::Int(u32::MAX)]);
    }

    #[test]
    fn test_overflow_halts_once() {
        let mut h = Harness::<2>::new();
        h.feed(&[0x81, 0x01, 0x02]);
        assert!(h.rx.is_full());

        h.feed(&[0x03]);
        assert_eq!(h.rx.state(), State::Idle);
        h.feed(&[0x04, 0x05]);

        assert_eq!(h.rx.args(), &[Value::Int(1), Value::Int(2)]);
        assert_eq!(h.sent(), [0xFC]);
        assert_eq!(h.rx.stats().overflows, 1);
    }

    #[test]
    fn test_data_command_while_full() {
        let mut h = Harness::<2>::new();
        h.feed(&[0x81, 0x01, 0x02, 0x82]);
        assert_eq!(h.rx.state(), State::Idle);
        assert_eq!(h.sent(), [0xFC]);

        // Explicit halt never overflows
        h.feed(&[0x80]);
        assert!(h.sent().is_empty());
    }

    #[test]
    fn test_float_budget_fills_session() {
        let config = ReceiverConfig {
            float_capacity: 1,
            ..ReceiverConfig::for_stack(10)
        };
        let mut h = Harness::<10>::with_receiver(Receiver::with_config(config).unwrap());
        h.feed(&[0x86, 0x00, 0x00, 0x00, 0x01, 0x04]);
        assert!(h.rx.is_full());

        h.feed(&[0x81]);
        assert_eq!(h.sent(), [0xFC]);
    }

    #[test]
    fn test_extcmd_resolves_last_argument() {
        let mut h = Harness::<10>::new();
        h.feed(&[0x81, 0x14, 0x8B]);
        h.feed(&[0x81, 0x05, 0x14, 0x8B]);

        assert_eq!(h.handler.commands[0].0, 20);
        assert!(h.handler.commands[0].1.is_empty());
        assert_eq!(h.handler.commands[1].0, 20);
        assert_eq!(h.handler.commands[1].1.as_slice(), &[Value::Int(5)]);
    }

    #[test]
    fn test_extcmd_beyond_seven_bits() {
        let mut h = Harness::<10>::new();
        h.feed(&[0x82, 0x5C, 0x01, 0x8B]);
        assert_eq!(h.handler.commands[0].0, 220);
    }

    #[test]
    fn test_nested_extcmd() {
        let mut h = Harness::<10>::new();
        h.feed(&[0x81, 0x14, 0x0B, 0x8B]);
        assert_eq!(h.handler.commands.len(), 1);
        assert_eq!(h.handler.commands[0].0, 20);
        assert!(h.handler.commands[0].1.is_empty());
    }

    #[test]
    fn test_extcmd_resolving_to_verify() {
        let mut h = Harness::<10>::new();
        // checksum = 0x03 ^ 0x0A = 0x09, slot 0 is 3
        h.feed(&[0x81, 0x03, 0x0A, 0x8B]);
        assert_eq!(h.sent(), [0xFD]);
    }

    #[test]
    fn test_extcmd_invalid_arguments() {
        let mut h = Harness::<10>::new();
        h.feed(&[0x8B]);
        h.feed(&[0x86, 0x00, 0x00, 0x00, 0x01, 0x04, 0x8B]);
        h.feed(&[0x85]);
        assert_eq!(h.sent(), [0xFF, 0xFF, 0xFE]);
        assert!(h.handler.commands.is_empty());
    }

    #[test]
    fn test_async_is_unknown() {
        let mut h = Harness::<10>::new();
        h.feed(&[0x8C, 0x8D]);
        assert_eq!(h.sent(), [0xFE, 0xFE]);
        assert!(h.handler.commands.is_empty());
    }

    #[test]
    fn test_clear_command() {
        let mut h = Harness::<10>::new();
        h.feed(&[0x81, 0x05, 0x89]);
        assert!(h.rx.args().is_empty());
        assert_eq!(h.rx.checksum(), 0);
        assert!(h.sent().is_empty());
        assert!(h.handler.commands.is_empty());
    }

    #[test]
    fn test_errors_disabled_on_reply_path() {
        let tx_config = crate::config::TransmitterConfig {
            send_errors: false,
            ..Default::default()
        };
        let mut h = Harness::<10>::new();
        h.tx = Transmitter::with_config(Sink::new(), tx_config);
        h.feed(&[0x84, 0x8C, 0x8A]);
        assert!(h.sent().is_empty());
    }

    #[test]
    fn test_reset_returns_to_idle() {
        let mut h = Harness::<10>::new();
        h.feed(&[0x82, 0x05, 0x00, 0x05]);
        h.rx.reset();
        assert_eq!(h.rx.state(), State::Idle);
        assert!(h.rx.args().is_empty());
        assert_eq!(h.rx.checksum(), 0);
    }

    #[test]
    fn test_with_config_rejects_oversized_budget() {
        let config = ReceiverConfig::for_stack(12);
        assert!(Receiver::<10>::with_config(config).is_err());
    }

    proptest! {
        #[test]
        fn prop_checksum_is_xor_of_data(data in prop::collection::vec(0u8..0x80, 1..10)) {
            let mut h = Harness::<16>::new();
            h.feed(&[0x81]);
            h.feed(&data);

            let xor = data.iter().fold(0u8, |acc, b| acc ^ b);
            prop_assert_eq!(h.rx.checksum(), xor);

            h.feed(&[0x8A]);
            let expected: u8 = if data[0] == xor { 0xF6 } else { 0xFD };
            prop_assert_eq!(h.sent(), [expected]);
        }
    }
}
