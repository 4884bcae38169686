//! # Collaborator Traits
//!
//! The engine talks to the outside world through two seams:
//!
//! - **`ByteSink`**: where the transmitter puts encoded bytes. Bounded sinks
//!   support mark/restore so a half-written command can be taken back.
//! - **`CommandHandler`**: what the application does with a received command.
//!
//! `IoSink` adapts any `embedded_io::Write` (UART driver, host serial port)
//! into an unbounded sink.

use embedded_io::Write;

use crate::receiver::Command;

/// Destination for transmitted bytes
///
/// Unbounded sinks return `true` from `is_free` and ignore the marker calls.
pub trait ByteSink {
    /// Whether at least one more byte fits
    fn is_free(&self) -> bool;

    /// Append one byte
    fn write(&mut self, byte: u8);

    /// Remember the current write position
    fn mark(&mut self);

    /// Discard everything written since `mark`
    fn restore_to_mark(&mut self);

    /// Forget the remembered position
    fn clear_mark(&mut self);
}

impl<T: ByteSink + ?Sized> ByteSink for &mut T {
    #[inline]
    fn is_free(&self) -> bool {
        (**self).is_free()
    }

    #[inline]
    fn write(&mut self, byte: u8) {
        (**self).write(byte)
    }

    #[inline]
    fn mark(&mut self) {
        (**self).mark()
    }

    #[inline]
    fn restore_to_mark(&mut self) {
        (**self).restore_to_mark()
    }

    #[inline]
    fn clear_mark(&mut self) {
        (**self).clear_mark()
    }
}

/// Application side of the protocol
///
/// Called for every control command the engine does not handle itself
/// (everything except CLEAR, VERIFY, EXTCMD and the ASYNC pair). Replies go
/// out through [`Command::transmitter`].
///
/// # Example
///
/// ```ignore
/// struct Multiplier;
///
/// impl<S: ByteSink> CommandHandler<S> for Multiplier {
///     fn handle(&mut self, mut cmd: Command<'_, S>) {
///         match (cmd.code(), cmd.args()) {
///             (20, [Value::Float(a), Value::Float(b)]) => {
///                 let product = a * b;
///                 cmd.transmitter().send_float(product);
///                 cmd.transmitter().send_command(21);
///             }
///             _ => cmd.transmitter().send_error(ErrorCode::InvalidCommand),
///         }
///     }
/// }
/// ```
pub trait CommandHandler<S: ByteSink> {
    /// Handle one dispatched command
    fn handle(&mut self, cmd: Command<'_, S>);

    /// An error/status code arrived from the peer
    ///
    /// Receiver state is left untouched regardless of what this does.
    fn on_error(&mut self, _code: u8) {}
}

/// Unbounded sink over an `embedded_io::Write`
///
/// Write failures cannot be reported back through `ByteSink`; they are logged
/// and counted instead.
#[derive(Debug)]
pub struct IoSink<W> {
    inner: W,
    write_errors: u32,
}

impl<W: Write> IoSink<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            write_errors: 0,
        }
    }

    /// Number of bytes the underlying writer refused
    #[inline]
    pub fn write_errors(&self) -> u32 {
        self.write_errors
    }

    /// Flush the underlying writer
    pub fn flush(&mut self) -> Result<(), W::Error> {
        self.inner.flush()
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> ByteSink for IoSink<W> {
    #[inline]
    fn is_free(&self) -> bool {
        true
    }

    fn write(&mut self, byte: u8) {
        if self.inner.write_all(&[byte]).is_err() {
            self.write_errors = self.write_errors.saturating_add(1);
            warn!("io sink dropped byte {}", byte);
        }
    }

    fn mark(&mut self) {}

    fn restore_to_mark(&mut self) {}

    fn clear_mark(&mut self) {}
}
