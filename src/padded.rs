//! Lock-free triple buffer with cache-padded state
//!
//! Same algorithm as the `lockfree` module, but every independently accessed
//! piece of state gets its own cache line: each slot, the shared spare token,
//! the writer's back index and the reader's front index. Without this, the
//! writer and reader keep invalidating each other's cache lines even when they
//! touch logically unrelated data (false sharing).

use crate::storage::{
    AtomicSpare, PaddedSlots, SlotArray, SlotIndex, SpareState, INITIAL_BACK, INITIAL_FRONT,
};
use crate::{Consumer, Producer, Strategy};
use crossbeam_utils::CachePadded;
use std::sync::Arc;

/// A lock-free triple buffer, laid out to avoid false sharing
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
            slots: PaddedSlots::new(slots),
            spare: CachePadded::new(AtomicSpare::new(SpareState::INITIAL)),
        });
        Self {
            input: Input {
                shared: shared.clone(),
                back_idx: CachePadded::new(INITIAL_BACK),
            },
            output: Output {
                shared,
                front_idx: CachePadded::new(INITIAL_FRONT),
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
            front: *self.output.front_idx,
            spare: spare.index,
            back: *self.input.back_idx,
            fresh: spare.fresh,
        }
    }
}

/// Producer interface to the triple buffer
#[derive(Debug)]
pub struct Input<T> {
    shared: Arc<SharedState<T>>,
    back_idx: CachePadded<SlotIndex>,
}
//
impl<T> Input<T> {
    /// Access the back buffer
    pub fn input_buffer_mut(&mut self) -> &mut T {
        // Safe because the writer owns the back slot
        unsafe { self.shared.slots.get_mut(*self.back_idx) }
    }

    /// Make the back buffer the newest value available to the reader
    pub fn publish(&mut self) {
        let former_spare = self
            .shared
            .spare
            .exchange(SpareState::published(*self.back_idx));
        *self.back_idx = former_spare.index;
    }

    /// Overwrite the back buffer with a new value and publish it
    pub fn write(&mut self, value: T) {
        *self.input_buffer_mut() = value;
        self.publish();
    }
}

/// Consumer interface to the triple buffer
#[derive(Debug)]
pub struct Output<T> {
    shared: Arc<SharedState<T>>,
    front_idx: CachePadded<SlotIndex>,
}
//
impl<T> Output<T> {
    /// Access the latest published value, and tell if it is new
    pub fn fetch(&mut self) -> (&T, bool) {
        let shared = &*self.shared;
        let updated = shared.spare.peek().fresh;
        if updated {
            let former_spare = shared
                .spare
                .exchange(SpareState::released(*self.front_idx));
            debug_assert!(former_spare.fresh);
            *self.front_idx = former_spare.index;
        }

        // Safe because the reader owns the front slot
        (unsafe { shared.slots.get(*self.front_idx) }, updated)
    }

    /// Access the latest published value
    pub fn read(&mut self) -> &T {
        self.fetch().0
    }
}

/// Shared state, one cache line per slot and one for the spare token
#[derive(Debug)]
struct SharedState<T> {
    slots: PaddedSlots<T>,
    spare: CachePadded<AtomicSpare>,
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
    const NAME: &'static str = "optimized";
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
    use std::mem;

    /// Check that triple buffers are properly initialized
    #[test]
    fn initial_state() {
        let mut buf = TripleBuffer::new(&42);
        assert_eq!(buf.roles(), Roles::INITIAL);
        assert_eq!(buf.output.fetch(), (&42, false));
    }

    /// Check that publish and fetch rotate roles like the unpadded version
    #[test]
    fn sequential_rotations() {
        let mut buf = TripleBuffer::new(&'a');
        let mut expected = Roles::INITIAL;
        for value in ['b', 'c', 'd'] {
            buf.input.write(value);
            expected = expected.after_publish();
            assert_eq!(buf.roles(), expected);
        }
        assert_eq!(buf.output.fetch(), (&'d', true));
        expected = expected.after_fetch();
        assert_eq!(buf.roles(), expected);
        assert_eq!(buf.output.fetch(), (&'d', false));
        assert_eq!(buf.roles(), expected);
    }

    /// Check that the hot fields really live on separate cache lines
    #[test]
    fn false_sharing_layout() {
        let line = mem::align_of::<CachePadded<SlotIndex>>();
        assert!(mem::align_of::<SharedState<u8>>() >= line);
        assert!(mem::size_of::<SharedState<u8>>() >= 4 * line);
        assert!(mem::align_of::<Input<u8>>() >= line);
        assert!(mem::align_of::<Output<u8>>() >= line);

        let buf = TripleBuffer::new(&0u8);
        let shared = &*buf.input.shared;
        let spare = &*shared.spare as *const AtomicSpare as usize;
        for index in 0..3 {
            let slot = shared.slots.cell(index).get() as usize;
            assert!(slot.abs_diff(spare) >= line);
        }
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
