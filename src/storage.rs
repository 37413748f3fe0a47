//! State shared by all triple buffer strategies
//!
//! Every strategy manages the same three-slot arena. Roles (front, spare,
//! back) are plain indices into that arena, and the spare role carries a
//! freshness flag telling the reader whether it holds unread data.

use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU8, Ordering};

// Rust only exposes the atomic types that the target implements natively, so
// the mere existence of AtomicU8 proves that the spare token can be exchanged
// without a hidden lock.
#[cfg(not(target_has_atomic = "8"))]
compile_error!("triple buffers need a lock-free 8-bit atomic exchange on this target");

/// Index of a slot in the three-slot arena
pub(crate) type SlotIndex = usize;

/// Initial role assignment
pub(crate) const INITIAL_FRONT: SlotIndex = 0;
pub(crate) const INITIAL_SPARE: SlotIndex = 1;
pub(crate) const INITIAL_BACK: SlotIndex = 2;

/// Bits of the packed spare token
const INDEX_MASK: u8 = 0b011;
const FRESH_BIT: u8 = 0b100;

/// Spare role: which slot is spare, and whether it holds unread data
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SpareState {
    pub(crate) index: SlotIndex,
    pub(crate) fresh: bool,
}
//
impl SpareState {
    /// Spare state before the first publish
    pub(crate) const INITIAL: Self = Self {
        index: INITIAL_SPARE,
        fresh: false,
    };

    /// Spare slot that was just published by the writer
    pub(crate) const fn published(index: SlotIndex) -> Self {
        Self { index, fresh: true }
    }

    /// Spare slot that was just released by the reader
    pub(crate) const fn released(index: SlotIndex) -> Self {
        Self {
            index,
            fresh: false,
        }
    }

    /// Pack into a single byte (bits 0-1: index, bit 2: freshness flag)
    const fn pack(self) -> u8 {
        debug_assert!(self.index < 3);
        let flag = if self.fresh { FRESH_BIT } else { 0 };
        (self.index as u8) | flag
    }

    /// Inverse of `pack`
    const fn unpack(bits: u8) -> Self {
        Self {
            index: (bits & INDEX_MASK) as SlotIndex,
            fresh: bits & FRESH_BIT != 0,
        }
    }
}

/// Spare token shared by the lock-free strategies
///
/// This is the only datum that both the writer and the reader touch. Handing
/// a slot over always goes through a single atomic exchange, so no retry loop
/// is ever needed.
#[derive(Debug)]
pub(crate) struct AtomicSpare(AtomicU8);
//
impl AtomicSpare {
    pub(crate) const fn new(state: SpareState) -> Self {
        Self(AtomicU8::new(state.pack()))
    }

    /// Cheap look at the token, without synchronizing with the writer
    ///
    /// A stale result can only report "not fresh" for one extra call, since
    /// the freshness flag is only ever cleared by the reader itself.
    pub(crate) fn peek(&self) -> SpareState {
        SpareState::unpack(self.0.load(Ordering::Relaxed))
    }

    /// Put a slot in the spare role, taking ownership of the previous spare
    ///
    /// Release publishes our writes to the surrendered slot, acquire makes
    /// the other side's writes to the claimed slot visible to us.
    pub(crate) fn exchange(&self, new: SpareState) -> SpareState {
        SpareState::unpack(self.0.swap(new.pack(), Ordering::AcqRel))
    }
}

/// Three-slot storage arena
///
/// Each slot is owned by exactly one role at a time, and the role owner is
/// the only one allowed to access it. Strategies uphold that invariant, this
/// trait merely gives them raw access.
pub(crate) trait SlotArray<T> {
    /// Cell backing the slot with a certain index
    fn cell(&self, index: SlotIndex) -> &UnsafeCell<T>;

    /// Shared access to a slot
    ///
    /// # Safety
    ///
    /// Caller must own the role that currently points to `index`, and nobody
    /// may be mutating that slot while the reference is alive.
    unsafe fn get(&self, index: SlotIndex) -> &T {
        &*self.cell(index).get()
    }

    /// Exclusive access to a slot
    ///
    /// # Safety
    ///
    /// Caller must own the role that currently points to `index`, and no
    /// other reference to that slot may be alive.
    #[allow(clippy::mut_from_ref)]
    unsafe fn get_mut(&self, index: SlotIndex) -> &mut T {
        &mut *self.cell(index).get()
    }
}

/// Tightly packed slots
#[derive(Debug)]
pub(crate) struct Slots<T>([UnsafeCell<T>; 3]);
//
impl<T> Slots<T> {
    pub(crate) fn new(slots: [T; 3]) -> Self {
        Self(slots.map(UnsafeCell::new))
    }
}
//
impl<T> SlotArray<T> for Slots<T> {
    fn cell(&self, index: SlotIndex) -> &UnsafeCell<T> {
        &self.0[index]
    }
}
//
// Slot access is coordinated by the role indices, see SlotArray.
unsafe impl<T: Send> Sync for Slots<T> {}

/// Slots that each sit on their own cache line(s)
#[derive(Debug)]
pub(crate) struct PaddedSlots<T>([CachePadded<UnsafeCell<T>>; 3]);
//
impl<T> PaddedSlots<T> {
    pub(crate) fn new(slots: [T; 3]) -> Self {
        Self(slots.map(|value| CachePadded::new(UnsafeCell::new(value))))
    }
}
//
impl<T> SlotArray<T> for PaddedSlots<T> {
    fn cell(&self, index: SlotIndex) -> &UnsafeCell<T> {
        &self.0[index]
    }
}
//
unsafe impl<T: Send> Sync for PaddedSlots<T> {}

/// Snapshot of the role assignment, used to check buffer invariants
#[cfg(test)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Roles {
    pub(crate) front: SlotIndex,
    pub(crate) spare: SlotIndex,
    pub(crate) back: SlotIndex,
    pub(crate) fresh: bool,
}
//
#[cfg(test)]
impl Roles {
    pub(crate) const INITIAL: Self = Self {
        front: INITIAL_FRONT,
        spare: INITIAL_SPARE,
        back: INITIAL_BACK,
        fresh: false,
    };

    /// Truth that the roles are a bijection onto the three slots
    pub(crate) fn is_permutation(&self) -> bool {
        let mut seen = [false; 3];
        for index in [self.front, self.spare, self.back] {
            if index >= 3 || seen[index] {
                return false;
            }
            seen[index] = true;
        }
        true
    }

    /// Expected roles after the writer publishes
    pub(crate) fn after_publish(self) -> Self {
        Self {
            spare: self.back,
            back: self.spare,
            fresh: true,
            ..self
        }
    }

    /// Expected roles after the reader fetches
    pub(crate) fn after_fetch(self) -> Self {
        if self.fresh {
            Self {
                front: self.spare,
                spare: self.front,
                fresh: false,
                ..self
            }
        } else {
            self
        }
    }
}

/// Deterministic pseudo-random choice of publish (true) or fetch (false)
#[cfg(test)]
pub(crate) fn operation_sequence(len: usize) -> impl Iterator<Item = bool> {
    let mut state = 0x9e37_79b9_7f4a_7c15_u64;
    (0..len).map(move |_| {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state & 1 == 0
    })
}
