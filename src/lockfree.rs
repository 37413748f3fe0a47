//! Lock-free triple buffer
//!
//! The spare role and its freshness flag are packed into a single atomic
//! byte. Handing a slot to the other side is one atomic exchange: whoever
//! swaps their slot into the spare role gets the previous spare slot back, so
//! neither side can ever claim a slot that the other one still uses.
//!
//! Under the single-writer single-reader contract, every operation completes
//! in a fixed number of steps, without any retry loop.

use crate::storage::{
    AtomicSpare, SlotArray, SlotIndex, Slots, SpareState, INITIAL_BACK, INITIAL_FRONT,
};
use crate::{Consumer, Producer, Strategy};
use std::sync::Arc;

/// A lock-free triple buffer
///
/// Use `split()` to get the `Input` and `Output` halves, which can then be
/// sent to the writer and reader threads.
#[derive(Debug)]
pub struct TripleBuffer<T> {
    input: Input<T>,
    output: Output<T>,
}
//
impl<T: Clone> TripleBuffer<T> {
    /// Construct a triple buffer with a certain initial value
    pub fn new(initial: &T) -> Self {
        Self::from_slots([initial.clone(), initial.clone(), initial.clone()])
    }
}
//
impl<T: Default> Default for TripleBuffer<T> {
    fn default() -> Self {
        Self::from_slots([T::default(), T::default(), T::default()])
    }
}
//
impl<T> TripleBuffer<T> {
    fn from_slots(slots: [T; 3]) -> Self {
        let shared = Arc::new(SharedState {
            slots: Slots::new(slots),
            spare: AtomicSpare::new(SpareState::INITIAL),
        });
        Self {
            input: Input {
                shared: shared.clone(),
                back_idx: INITIAL_BACK,
            },
            output: Output {
                shared,
                front_idx: INITIAL_FRONT,
            },
        }
    }

    /// Extract input and output of the triple buffer
    pub fn split(self) -> (Input<T>, Output<T>) {
        (self.input, self.output)
    }

    /// Role assignment. Only meaningful while nobody else holds the halves.
    #[cfg(test)]
    pub(crate) fn roles(&self) -> crate::storage::Roles {
        let spare = self.input.shared.spare.peek();
        crate::storage::Roles {
            front: self.output.front_idx,
            spare: spare.index,
            back: self.input.back_idx,
            fresh: spare.fresh,
        }
    }
}

/// Producer interface to the triple buffer
///
/// Writes never wait for the reader: a collision results in cache contention
/// on the spare token, but not in blocking.
#[derive(Debug)]
pub struct Input<T> {
    shared: Arc<SharedState<T>>,
    back_idx: SlotIndex,
}
//
impl<T> Input<T> {
    /// Access the back buffer
    ///
    /// The back index is private to the writer, so this needs no atomics.
    pub fn input_buffer_mut(&mut self) -> &mut T {
        // Safe because the writer owns the back slot
        unsafe { self.shared.slots.get_mut(self.back_idx) }
    }

    /// Make the back buffer the newest value available to the reader
    ///
    /// The previous spare slot becomes our new back buffer. If the reader
    /// never picked it up, its contents are silently dropped.
    pub fn publish(&mut self) {
        let former_spare = self
            .shared
            .spare
            .exchange(SpareState::published(self.back_idx));
        self.back_idx = former_spare.index;
    }

    /// Overwrite the back buffer with a new value and publish it
    pub fn write(&mut self, value: T) {
        *self.input_buffer_mut() = value;
        self.publish();
    }
}

/// Consumer interface to the triple buffer
///
/// Reads never wait for the writer. When nothing new was published, they do
/// not even perform an atomic read-modify-write.
#[derive(Debug)]
pub struct Output<T> {
    shared: Arc<SharedState<T>>,
    front_idx: SlotIndex,
}
//
impl<T> Output<T> {
    /// Access the latest published value, and tell if it is new
    ///
    /// The flag is true if and only if a newer value was adopted since the
    /// previous call. A publish that races with this call may only be seen by
    /// the next one.
    pub fn fetch(&mut self) -> (&T, bool) {
        let shared = &*self.shared;
        let updated = shared.spare.peek().fresh;
        if updated {
            // Only the reader clears the flag, so the spare is still fresh,
            // although it may have been replaced by an even newer slot.
            let former_spare = shared.spare.exchange(SpareState::released(self.front_idx));
            debug_assert!(former_spare.fresh);
            self.front_idx = former_spare.index;
        }

        // Safe because the reader owns the front slot
        (unsafe { shared.slots.get(self.front_idx) }, updated)
    }

    /// Access the latest published value
    pub fn read(&mut self) -> &T {
        self.fetch().0
    }
}

/// Shared state: the slots and the atomic spare token
#[derive(Debug)]
struct SharedState<T> {
    slots: Slots<T>,
    spare: AtomicSpare,
}

impl<T> Producer<T> for Input<T> {
    fn input_buffer_mut(&mut self) -> &mut T {
        Input::input_buffer_mut(self)
    }

    fn publish(&mut self) {
        Input::publish(self)
    }
}

impl<T> Consumer<T> for Output<T> {
    fn fetch(&mut self) -> (&T, bool) {
        Output::fetch(self)
    }
}

impl<T> Strategy<T> for TripleBuffer<T> {
    const NAME: &'static str = "lockfree";
    type Input = Input<T>;
    type Output = Output<T>;

    fn split(self) -> (Input<T>, Output<T>) {
        TripleBuffer::split(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Roles;

    /// Check that triple buffers are properly initialized
    #[test]
    fn initial_state() {
        let mut buf = TripleBuffer::new(&42);
        assert_eq!(buf.roles(), Roles::INITIAL);
        assert_eq!(buf.output.fetch(), (&42, false));
        assert_eq!(buf.roles(), Roles::INITIAL);
    }

    /// Check that publishing swaps the back and spare roles
    #[test]
    fn sequential_publish() {
        let mut buf = TripleBuffer::<bool>::default();
        let old_roles = buf.roles();

        *buf.input.input_buffer_mut() = true;
        buf.input.publish();

        let new_roles = buf.roles();
        assert_eq!(new_roles, old_roles.after_publish());
        assert!(new_roles.is_permutation());
        assert!(unsafe { *buf.input.shared.slots.get(new_roles.spare) });
    }

    /// Check that fetching adopts fresh data exactly once
    #[test]
    fn sequential_fetch() {
        let mut buf = TripleBuffer::new(&1.0);
        buf.input.write(4.2);

        let old_roles = buf.roles();
        assert_eq!(buf.output.fetch(), (&4.2, true));
        assert_eq!(buf.roles(), old_roles.after_fetch());

        let old_roles = buf.roles();
        assert_eq!(buf.output.fetch(), (&4.2, false));
        assert_eq!(buf.roles(), old_roles);
    }

    /// Check that the writer always gets the slot that was spare before
    #[test]
    fn writer_claims_former_spare() {
        let mut buf = TripleBuffer::new(&0u8);
        for value in 1..=10 {
            let spare_before = buf.roles().spare;
            buf.input.write(value);
            assert_eq!(buf.input.back_idx, spare_before);
            assert_ne!(buf.input.back_idx, buf.output.front_idx);
        }
        assert_eq!(buf.output.fetch(), (&10, true));
    }

    /// Check that the roles stay a permutation over a long operation mix
    #[test]
    fn random_operations_keep_roles() {
        let mut buf = TripleBuffer::new(&0usize);
        let mut expected = Roles::INITIAL;
        let mut last_published = 0;
        for (step, publish) in crate::storage::operation_sequence(5000).enumerate() {
            if publish {
                buf.input.write(step);
                last_published = step;
                expected = expected.after_publish();
            } else {
                let fresh = expected.fresh;
                assert_eq!(buf.output.fetch(), (&last_published, fresh));
                expected = expected.after_fetch();
            }
            let roles = buf.roles();
            assert!(roles.is_permutation(), "{roles:?} at step {step}");
            assert_eq!(roles, expected, "at step {step}");
        }
    }
}
