//! Per-tick bump arena.
//!
//! Every event copy and pending-config record referenced by the buckets lives in here; the whole
//! region is handed back in one step when the consumer has finished draining the tick. Values are
//! addressed by [`ArenaSlot`], a typed word offset, rather than by pointer, so the arena can grow
//! (and a stale slot held across [`reset`](TickArena::reset) trips a bounds check instead of
//! aliasing recycled memory).

use std::marker::PhantomData;
use std::mem;

/// Default initial arena capacity in bytes.
pub const TICK_ARENA_INIT_BYTES: usize = 4096;

/// Typed handle to a value stored in a [`TickArena`].
///
/// Slots are only meaningful for the arena that produced them, and only until that arena is
/// reset.
pub struct ArenaSlot<T> {
    offset: u32,
    _ty: PhantomData<fn() -> T>,
}

impl<T> Clone for ArenaSlot<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ArenaSlot<T> {}

impl<T> std::fmt::Debug for ArenaSlot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ArenaSlot({})", self.offset)
    }
}

impl<T> ArenaSlot<T> {
    pub(crate) fn to_raw(self) -> u64 {
        u64::from(self.offset)
    }

    pub(crate) fn from_raw(raw: u64) -> Self {
        ArenaSlot {
            offset: raw as u32,
            _ty: PhantomData,
        }
    }
}

const fn words_for<T>() -> usize {
    (mem::size_of::<T>() + 7) / 8
}

/// A monotonic bump allocator backing one tick's bucket records.
///
/// Storage is a flat array of 8-byte words, which bounds the supported alignment to 8; enough
/// for every wire event record. Allocation only ever appends; nothing is freed until
/// [`reset`](TickArena::reset) drops the whole tick at once.
#[derive(Debug, Default)]
pub struct TickArena {
    words: Vec<u64>,
}

impl TickArena {
    /// Creates an arena with `bytes` of pre-allocated capacity.
    pub fn with_capacity(bytes: usize) -> Self {
        TickArena {
            words: Vec::with_capacity((bytes + 7) / 8),
        }
    }

    /// Copies `value` into the arena and returns its slot.
    pub fn alloc<T: Copy>(&mut self, value: T) -> ArenaSlot<T> {
        // The word array keeps everything 8-aligned; types needing more don't occur on this path.
        assert!(mem::align_of::<T>() <= 8);
        let offset = self.words.len();
        assert!(offset <= u32::MAX as usize, "tick arena exhausted");
        self.words.resize(offset + words_for::<T>().max(1), 0);
        // SAFETY: the destination is in-bounds, 8-byte aligned and exclusively borrowed; T is
        // Copy so no drop obligations are created.
        unsafe {
            self.words.as_mut_ptr().add(offset).cast::<T>().write(value);
        }
        ArenaSlot {
            offset: offset as u32,
            _ty: PhantomData,
        }
    }

    /// Resolves a slot previously returned by [`alloc`](TickArena::alloc).
    ///
    /// Panics if the slot points past the live region, i.e. it was held across a reset.
    pub fn get<T: Copy>(&self, slot: ArenaSlot<T>) -> &T {
        let offset = slot.offset as usize;
        assert!(
            offset + words_for::<T>() <= self.words.len(),
            "arena slot used after reset"
        );
        // SAFETY: in-bounds (checked above), aligned, and initialized by `alloc`.
        unsafe { &*self.words.as_ptr().add(offset).cast::<T>() }
    }

    /// Mutable variant of [`get`](TickArena::get).
    pub fn get_mut<T: Copy>(&mut self, slot: ArenaSlot<T>) -> &mut T {
        let offset = slot.offset as usize;
        assert!(
            offset + words_for::<T>() <= self.words.len(),
            "arena slot used after reset"
        );
        // SAFETY: as in `get`, plus exclusivity from `&mut self`.
        unsafe { &mut *self.words.as_mut_ptr().add(offset).cast::<T>() }
    }

    /// Drops every allocation, keeping the backing capacity for the next tick.
    pub fn reset(&mut self) {
        self.words.clear();
    }

    /// Bytes currently allocated out of the arena.
    pub fn used(&self) -> usize {
        self.words.len() * 8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Wide {
        a: u64,
        b: u32,
        c: u16,
    }

    #[test]
    fn alloc_and_read_back() {
        let mut arena = TickArena::with_capacity(64);
        let a = arena.alloc(17u64);
        let b = arena.alloc(Wide { a: 1, b: 2, c: 3 });
        let c = arena.alloc(5u8);
        assert_eq!(*arena.get(a), 17);
        assert_eq!(*arena.get(b), Wide { a: 1, b: 2, c: 3 });
        assert_eq!(*arena.get(c), 5);
    }

    #[test]
    fn mutation_in_place() {
        let mut arena = TickArena::with_capacity(64);
        let slot = arena.alloc(1u64);
        *arena.get_mut(slot) = 2;
        assert_eq!(*arena.get(slot), 2);
    }

    #[test]
    fn grows_past_initial_capacity() {
        let mut arena = TickArena::with_capacity(8);
        let slots: Vec<_> = (0..1000u64).map(|i| arena.alloc(i)).collect();
        for (i, slot) in slots.iter().enumerate() {
            assert_eq!(*arena.get(*slot), i as u64);
        }
        assert_eq!(arena.used(), 8000);
    }

    #[test]
    fn reset_reclaims_everything() {
        let mut arena = TickArena::with_capacity(64);
        arena.alloc(1u64);
        arena.reset();
        assert_eq!(arena.used(), 0);
        let slot = arena.alloc(9u64);
        assert_eq!(*arena.get(slot), 9);
    }

    #[test]
    #[should_panic(expected = "arena slot used after reset")]
    fn stale_slot_panics() {
        let mut arena = TickArena::with_capacity(64);
        let slot = arena.alloc(1u64);
        arena.reset();
        let _ = arena.get(slot);
    }

    #[test]
    fn raw_round_trip() {
        let mut arena = TickArena::with_capacity(64);
        let slot = arena.alloc(0xabcdu64);
        let raw = slot.to_raw();
        let back = ArenaSlot::<u64>::from_raw(raw);
        assert_eq!(*arena.get(back), 0xabcd);
    }
}
