//! Mutex-guarded triple buffer
//!
//! The simplest strategy: the spare role is protected by a mutex, and both
//! sides take it to swap their own role with the spare one. Critical sections
//! only swap an index and a flag, so their length does not depend on `T`, but
//! acquiring the lock is not wait-free and is exposed to scheduling hiccups.

use crate::storage::{SlotArray, SlotIndex, Slots, SpareState, INITIAL_BACK, INITIAL_FRONT};
use crate::{Consumer, Producer, Strategy};
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A triple buffer whose role rotations are serialized by a mutex
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
            spare: Mutex::new(SpareState::INITIAL),
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

    /// Role assignment, snapshotted under the lock
    #[cfg(test)]
    pub(crate) fn roles(&self) -> crate::storage::Roles {
        let spare = self.input.shared.lock_spare();
        crate::storage::Roles {
            front: self.output.front_idx,
            spare: spare.index,
            back: self.input.back_idx,
            fresh: spare.fresh,
        }
    }
}

/// Producer interface to the triple buffer
#[derive(Debug)]
pub struct Input<T> {
    shared: Arc<SharedState<T>>,
    back_idx: SlotIndex,
}
//
impl<T> Input<T> {
    /// Access the back buffer
    ///
    /// No lock is needed here: the back slot belongs to the writer until the
    /// next `publish()`, which only changes which slot is called "back".
    pub fn input_buffer_mut(&mut self) -> &mut T {
        // Safe because the writer owns the back slot
        unsafe { self.shared.slots.get_mut(self.back_idx) }
    }

    /// Make the back buffer the newest value available to the reader
    pub fn publish(&mut self) {
        let mut spare = self.shared.lock_spare();
        mem::swap(&mut self.back_idx, &mut spare.index);
        spare.fresh = true;
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
    front_idx: SlotIndex,
}
//
impl<T> Output<T> {
    /// Access the latest published value, and tell if it is new
    ///
    /// The flag is true if and only if a newer value was adopted since the
    /// previous call.
    pub fn fetch(&mut self) -> (&T, bool) {
        let updated = {
            let mut spare = self.shared.lock_spare();
            let updated = spare.fresh;
            if updated {
                mem::swap(&mut self.front_idx, &mut spare.index);
                spare.fresh = false;
            }
            updated
        };

        // Safe because the reader owns the front slot
        (unsafe { self.shared.slots.get(self.front_idx) }, updated)
    }

    /// Access the latest published value
    pub fn read(&mut self) -> &T {
        self.fetch().0
    }
}

/// Shared state: the slots and the lock-protected spare role
#[derive(Debug)]
struct SharedState<T> {
    slots: Slots<T>,
    spare: Mutex<SpareState>,
}
//
impl<T> SharedState<T> {
    /// Lock the spare role
    ///
    /// Critical sections only swap plain data and cannot panic, so a poisoned
    /// lock still guards a consistent state.
    fn lock_spare(&self) -> MutexGuard<'_, SpareState> {
        self.spare.lock().unwrap_or_else(PoisonError::into_inner)
    }
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
    const NAME: &'static str = "lock";
    type Input = Input<T>;
    type Output = Output<T>;

    fn split(self) -> (Input<T>, Output<T>) {
        TripleBuffer::split(self)
    }
}
