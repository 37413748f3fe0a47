//! Triple buffering, three ways
//!
//! A triple buffer is a single-producer single-consumer nonblocking
//! communication channel which behaves like a shared variable: the writer
//! submits regular updates, the reader accesses the latest available value at
//! any time. Intermediate values that the reader did not get to see are
//! silently dropped, this is not a queue.
//!
//! Three slots are shared between both sides. At any time, one of them is the
//! writer's back buffer, one is the reader's front buffer, and the last one is
//! the spare buffer through which updates are handed over. This crate provides
//! three strategies for rotating those roles:
//!
//! - [`locking`]: a mutex protects the spare role.
//! - [`lockfree`]: the spare role is an atomic token that both sides exchange.
//! - [`padded`]: like `lockfree`, with every hot field on its own cache line.
//!
//! All of them follow the same contract, captured by the [`Producer`],
//! [`Consumer`] and [`Strategy`] traits.
//!
//! ```
//! use tribuf::lockfree::TripleBuffer;
//!
//! let (mut input, mut output) = TripleBuffer::new(&0).split();
//!
//! // The writer fills its back buffer, then publishes it
//! *input.input_buffer_mut() = 42;
//! input.publish();
//!
//! // The reader gets the latest value, along with a freshness flag
//! assert_eq!(output.fetch(), (&42, true));
//! assert_eq!(output.fetch(), (&42, false));
//! ```

#![deny(missing_debug_implementations)]
#![warn(missing_docs)]

pub mod locking;
pub mod lockfree;
pub mod padded;
mod storage;

/// Writer half of a triple buffer
pub trait Producer<T> {
    /// Access the back buffer, which belongs to the writer until `publish()`
    fn input_buffer_mut(&mut self) -> &mut T;

    /// Make the back buffer the newest value available to the reader
    ///
    /// This hands over the back buffer without copying it, and gives the
    /// writer a different back buffer whose contents are unspecified.
    fn publish(&mut self);

    /// Overwrite the back buffer with a new value and publish it
    fn write(&mut self, value: T) {
        *self.input_buffer_mut() = value;
        self.publish();
    }
}

/// Reader half of a triple buffer
pub trait Consumer<T> {
    /// Access the latest published value, and tell if it is new
    ///
    /// The flag is true if and only if the value differs from the one that
    /// the previous call returned. This never waits for a publish.
    fn fetch(&mut self) -> (&T, bool);

    /// Access the latest published value
    fn read(&mut self) -> &T {
        self.fetch().0
    }
}

/// A triple buffer synchronization strategy
pub trait Strategy<T>: Sized {
    /// Name under which benchmarks refer to this strategy
    const NAME: &'static str;

    /// Writer half
    type Input: Producer<T>;

    /// Reader half
    type Output: Consumer<T>;

    /// Extract input and output of the triple buffer
    fn split(self) -> (Self::Input, Self::Output);
}
