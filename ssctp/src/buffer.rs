//! # Retractable Ring Buffer
//!
//! Transmit-side ring buffer that can roll its write position back to a
//! marker. The transmitter marks the buffer before the first byte of a
//! command and either clears the marker once the command is complete or
//! restores it when the buffer runs out of room halfway.
//!
//! ## Memory Layout
//!
//! ```text
//! ┌──────────┬────────────────────┬──────────────────┬───────────┐
//! │ consumed │   readable data    │  pending (may be │ writable  │
//! │  region  │  (ready to send)   │    retracted)    │  region   │
//! └──────────┴────────────────────┴──────────────────┴───────────┘
//!            ▲                    ▲                  ▲
//!         read_idx            marker_idx         write_idx
//! ```
//!
//! The consumer never sees bytes past an active marker, so a restore can
//! never take back bytes that already went out on the wire.
//!
//! Indices are atomics for the single-producer single-consumer case: the
//! transmitter produces through `&mut self`, a drain loop (UART interrupt,
//! DMA completion) consumes through `&self`.

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::traits::ByteSink;

/// Errors specific to buffer operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BufferError {
    /// Attempted to write more data than available space
    #[error("buffer overflow")]
    Overflow,
    /// Attempted to read more data than available
    #[error("buffer underflow")]
    Underflow,
    /// Restore requested without an active marker
    #[error("no marker set")]
    NoMarker,
}

/// Ring buffer with mark/restore support
///
/// `N` must be a power of two; one slot is kept free to tell full from empty.
///
/// # Example
///
/// ```rust
/// use ssctp::buffer::RetractableBuffer;
///
/// let mut buffer: RetractableBuffer<16> = RetractableBuffer::new();
///
/// buffer.set_marker();
/// buffer.write(b"partial").unwrap();
/// assert_eq!(buffer.readable_len(), 0); // held back by the marker
///
/// buffer.restore_marker().unwrap();
/// assert!(buffer.is_empty());
/// ```
pub struct RetractableBuffer<const N: usize> {
    data: [u8; N],

    /// Where the producer writes next
    write_idx: AtomicUsize,

    /// Where the consumer reads next
    read_idx: AtomicUsize,

    /// Write position at the time of the last `set_marker`
    marker_idx: AtomicUsize,
    marked: AtomicBool,
}

impl<const N: usize> RetractableBuffer<N> {
    const MASK: usize = {
        assert!(N.is_power_of_two(), "RetractableBuffer size must be a power of two");
        N - 1
    };

    /// Create a new zero-initialized buffer
    pub const fn new() -> Self {
        Self {
            data: [0u8; N],
            write_idx: AtomicUsize::new(0),
            read_idx: AtomicUsize::new(0),
            marker_idx: AtomicUsize::new(0),
            marked: AtomicBool::new(false),
        }
    }

    /// Get the total capacity of the buffer
    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Bytes stored, including bytes held back by the marker
    #[inline]
    pub fn len(&self) -> usize {
        let write = self.write_idx.load(Ordering::Acquire);
        let read = self.read_idx.load(Ordering::Acquire);
        write.wrapping_sub(read) & Self::MASK
    }

    /// Bytes the consumer may take
    #[inline]
    pub fn readable_len(&self) -> usize {
        let read = self.read_idx.load(Ordering::Acquire);
        let limit = if self.marked.load(Ordering::Acquire) {
            self.marker_idx.load(Ordering::Acquire)
        } else {
            self.write_idx.load(Ordering::Acquire)
        };
        limit.wrapping_sub(read) & Self::MASK
    }

    /// Bytes the producer may still write
    #[inline]
    pub fn writable_len(&self) -> usize {
        // Leave one byte to distinguish full from empty
        N - 1 - self.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.writable_len() == 0
    }

    /// Append a single byte
    pub fn push(&mut self, byte: u8) -> Result<(), BufferError> {
        if self.is_full() {
            return Err(BufferError::Overflow);
        }
        let write = self.write_idx.load(Ordering::Acquire);
        self.data[write & Self::MASK] = byte;
        self.write_idx.store(write.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Append a slice; nothing is written unless all of it fits
    pub fn write(&mut self, data: &[u8]) -> Result<usize, BufferError> {
        if data.len() > self.writable_len() {
            return Err(BufferError::Overflow);
        }

        let write_idx = self.write_idx.load(Ordering::Acquire) & Self::MASK;
        let len = data.len();

        if write_idx + len <= N {
            self.data[write_idx..write_idx + len].copy_from_slice(data);
        } else {
            let first_len = N - write_idx;
            self.data[write_idx..N].copy_from_slice(&data[..first_len]);
            self.data[0..len - first_len].copy_from_slice(&data[first_len..]);
        }

        let old_write = self.write_idx.load(Ordering::Acquire);
        self.write_idx.store(old_write.wrapping_add(len), Ordering::Release);
        Ok(len)
    }

    /// Take the next readable byte
    pub fn pop(&self) -> Option<u8> {
        if self.readable_len() == 0 {
            return None;
        }
        let read = self.read_idx.load(Ordering::Acquire);
        let byte = self.data[read & Self::MASK];
        self.read_idx.store(read.wrapping_add(1), Ordering::Release);
        Some(byte)
    }

    /// Copy readable bytes into `buf`, returning how many were taken
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let len = buf.len().min(self.readable_len());
        if len == 0 {
            return 0;
        }

        let read_idx = self.read_idx.load(Ordering::Acquire) & Self::MASK;
        if read_idx + len <= N {
            buf[..len].copy_from_slice(&self.data[read_idx..read_idx + len]);
        } else {
            let first_len = N - read_idx;
            buf[..first_len].copy_from_slice(&self.data[read_idx..N]);
            buf[first_len..len].copy_from_slice(&self.data[0..len - first_len]);
        }

        let old_read = self.read_idx.load(Ordering::Acquire);
        self.read_idx.store(old_read.wrapping_add(len), Ordering::Release);
        len
    }

    /// Skip `len` readable bytes
    pub fn consume(&self, len: usize) -> Result<(), BufferError> {
        if len > self.readable_len() {
            return Err(BufferError::Underflow);
        }
        let old_read = self.read_idx.load(Ordering::Acquire);
        self.read_idx.store(old_read.wrapping_add(len), Ordering::Release);
        Ok(())
    }

    /// Remember the current write position
    pub fn set_marker(&mut self) {
        let write = self.write_idx.load(Ordering::Acquire);
        self.marker_idx.store(write, Ordering::Release);
        self.marked.store(true, Ordering::Release);
    }

    /// Drop every byte written since the marker, keeping the marker
    pub fn restore_marker(&mut self) -> Result<(), BufferError> {
        if !self.marked.load(Ordering::Acquire) {
            return Err(BufferError::NoMarker);
        }
        let marker = self.marker_idx.load(Ordering::Acquire);
        self.write_idx.store(marker, Ordering::Release);
        Ok(())
    }

    /// Release the held-back bytes to the consumer
    pub fn clear_marker(&mut self) {
        self.marked.store(false, Ordering::Release);
    }

    #[inline]
    pub fn has_marker(&self) -> bool {
        self.marked.load(Ordering::Acquire)
    }

    /// Reset the buffer to empty state
    pub fn reset(&mut self) {
        self.read_idx.store(0, Ordering::Release);
        self.write_idx.store(0, Ordering::Release);
        self.marker_idx.store(0, Ordering::Release);
        self.marked.store(false, Ordering::Release);
    }
}

impl<const N: usize> Default for RetractableBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> ByteSink for RetractableBuffer<N> {
    #[inline]
    fn is_free(&self) -> bool {
        !self.is_full()
    }

    fn write(&mut self, byte: u8) {
        // The transmitter checks `is_free` first; a full buffer drops the byte.
        if self.push(byte).is_err() {
            warn!("retractable buffer full, dropped byte {}", byte);
        }
    }

    fn mark(&mut self) {
        self.set_marker();
    }

    fn restore_to_mark(&mut self) {
        let _ = self.restore_marker();
    }

    fn clear_mark(&mut self) {
        self.clear_marker();
    }
}
