//! # Endpoint
//!
//! One side of a link: a receiver, a transmitter over the outgoing sink, and
//! the application's command handler, owned together.
//!
//! ```text
//!   link rx ──► receive_byte ──► Receiver ──► CommandHandler
//!                                   │               │
//!                                   ▼ errors        ▼ replies
//!                               Transmitter ──► ByteSink ──► link tx
//! ```
//!
//! Not reentrant: feed bytes and send from one context only, or serialize
//! access externally.

use embedded_io::Read;

use crate::config::{Config, ConfigError};
use crate::protocol::ErrorCode;
use crate::receiver::Receiver;
use crate::stack::{Value, STACK_SIZE};
use crate::traits::{ByteSink, CommandHandler};
use crate::transmitter::Transmitter;

/// Bytes pulled per `receive_from` call
const READ_CHUNK: usize = 32;

pub struct Endpoint<S, H, const N: usize = STACK_SIZE> {
    receiver: Receiver<N>,
    transmitter: Transmitter<S>,
    handler: H,
}

impl<S, H, const N: usize> Endpoint<S, H, N>
where
    S: ByteSink,
    H: CommandHandler<S>,
{
    /// Endpoint with default configuration
    pub fn new(sink: S, handler: H) -> Self {
        Self {
            receiver: Receiver::new(),
            transmitter: Transmitter::new(sink),
            handler,
        }
    }

    pub fn with_config(sink: S, handler: H, config: Config) -> Result<Self, ConfigError> {
        Ok(Self {
            receiver: Receiver::with_config(config.receiver)?,
            transmitter: Transmitter::with_config(sink, config.transmitter),
            handler,
        })
    }

    /// Feed one byte from the link
    pub fn receive_byte(&mut self, byte: u8) {
        self.receiver
            .receive_byte(byte, &mut self.transmitter, &mut self.handler);
    }

    /// Feed a chunk of bytes from the link
    pub fn receive(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.receive_byte(byte);
        }
    }

    /// Pull one chunk from `reader` and feed it
    ///
    /// Makes a single `read` call, so a blocking reader blocks at most once.
    /// Returns the number of bytes processed; 0 means end of stream.
    pub fn receive_from<R: Read>(&mut self, reader: &mut R) -> Result<usize, R::Error> {
        let mut chunk = [0u8; READ_CHUNK];
        let len = reader.read(&mut chunk)?;
        self.receive(&chunk[..len]);
        Ok(len)
    }

    pub fn send_command(&mut self, code: u16) {
        self.transmitter.send_command(code);
    }

    pub fn send_int(&mut self, width: u8, value: u32) {
        self.transmitter.send_int(width, value);
    }

    pub fn send_float(&mut self, value: f32) {
        self.transmitter.send_float(value);
    }

    pub fn send_value(&mut self, value: Value) {
        self.transmitter.send_value(value);
    }

    pub fn send_command_with(&mut self, code: u16, args: &[Value]) {
        self.transmitter.send_command_with(code, args);
    }

    pub fn send_error(&mut self, code: ErrorCode) {
        self.transmitter.send_error(code);
    }

    pub fn send_ok(&mut self) {
        self.transmitter.send_ok();
    }

    /// Drop the received arguments now
    pub fn clear_buffer(&mut self) {
        self.receiver.clear_buffer();
    }

    /// Reset both directions to their initial state
    pub fn reset(&mut self) {
        self.receiver.reset();
        self.transmitter.reset();
    }

    #[inline]
    pub fn receiver(&self) -> &Receiver<N> {
        &self.receiver
    }

    #[inline]
    pub fn transmitter(&self) -> &Transmitter<S> {
        &self.transmitter
    }

    #[inline]
    pub fn transmitter_mut(&mut self) -> &mut Transmitter<S> {
        &mut self.transmitter
    }

    #[inline]
    pub fn handler(&self) -> &H {
        &self.handler
    }

    #[inline]
    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    #[inline]
    pub fn sink(&self) -> &S {
        self.transmitter.sink()
    }

    pub fn into_parts(self) -> (Receiver<N>, Transmitter<S>, H) {
        (self.receiver, self.transmitter, self.handler)
    }
}
