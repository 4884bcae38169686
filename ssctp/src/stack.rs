//! # Argument Stack
//!
//! Values decoded by the receiver accumulate here until a control command
//! consumes them. Integer and float values have their own capacity budgets on
//! top of the stack capacity; the session is full as soon as any of the three
//! is exhausted.

use heapless::Vec;
use serde::{Deserialize, Serialize};

/// Default number of stack entries
pub const STACK_SIZE: usize = 10;

/// A decoded argument
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Value {
    /// Unsigned integer (1 to 5 data bytes, truncated to 32 bits)
    Int(u32),
    /// IEEE-754 single precision float
    Float(f32),
}

impl Value {
    /// The integer payload, if this is an integer
    #[inline]
    pub fn as_int(&self) -> Option<u32> {
        match *self {
            Value::Int(v) => Some(v),
            Value::Float(_) => None,
        }
    }

    /// The float payload, if this is a float
    #[inline]
    pub fn as_float(&self) -> Option<f32> {
        match *self {
            Value::Float(v) => Some(v),
            Value::Int(_) => None,
        }
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

/// Bounded, ordered list of decoded arguments
#[derive(Debug, Clone)]
pub struct ArgumentStack<const N: usize = STACK_SIZE> {
    entries: Vec<Value, N>,
    ints: usize,
    floats: usize,
    int_capacity: usize,
    float_capacity: usize,
}

impl<const N: usize> ArgumentStack<N> {
    /// Create an empty stack whose value budgets equal the stack capacity
    pub const fn new() -> Self {
        Self::with_capacities(N, N)
    }

    /// Create an empty stack with separate integer and float budgets
    ///
    /// Budgets larger than `N` are clamped to `N`.
    pub const fn with_capacities(int_capacity: usize, float_capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            ints: 0,
            floats: 0,
            int_capacity: if int_capacity < N { int_capacity } else { N },
            float_capacity: if float_capacity < N { float_capacity } else { N },
        }
    }

    /// Total entry capacity
    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of integer entries
    #[inline]
    pub fn int_count(&self) -> usize {
        self.ints
    }

    /// Number of float entries
    #[inline]
    pub fn float_count(&self) -> usize {
        self.floats
    }

    /// True once the stack or either value budget is exhausted
    #[inline]
    pub fn is_full(&self) -> bool {
        self.entries.is_full() || self.ints >= self.int_capacity || self.floats >= self.float_capacity
    }

    /// Append a value, handing it back if the session is full
    pub fn push(&mut self, value: Value) -> Result<(), Value> {
        if self.is_full() {
            return Err(value);
        }
        self.entries.push(value)?;
        match value {
            Value::Int(_) => self.ints += 1,
            Value::Float(_) => self.floats += 1,
        }
        Ok(())
    }

    /// Entry at `index`, 0 being the first value received
    #[inline]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.entries.get(index)
    }

    #[inline]
    pub fn as_slice(&self) -> &[Value] {
        &self.entries
    }

    /// Drop every entry and reset both value budgets
    pub fn clear(&mut self) {
        self.entries.clear();
        self.ints = 0;
        self.floats = 0;
    }
}

impl<const N: usize> Default for ArgumentStack<N> {
    fn default() -> Self {
        Self::new()
    }
}
