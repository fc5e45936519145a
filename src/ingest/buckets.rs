//! Per-tick event buckets.
//!
//! One container per coalescing policy class. FIFO buckets keep insertion order for kinds where
//! ordering carries meaning (a destroy must not erase an earlier client message); keyed buckets
//! hold at most one effective entry per window and merge everything else into it. All event
//! copies live in the tick arena, the buckets themselves only store slots.

use smallvec::SmallVec;
use x11rb::protocol::xproto::{
    Atom, ButtonPressEvent, ClientMessageEvent, ConfigureNotifyEvent, DestroyNotifyEvent,
    EnterNotifyEvent, KeyPressEvent, MapRequestEvent, MotionNotifyEvent, PropertyNotifyEvent,
    StackMode, UnmapNotifyEvent, Window,
};

use crate::utils::{ArenaSlot, TickArena, U64Map};

/// FIFO buckets store arena slots; eight inline entries cover a quiet tick without touching the
/// heap.
pub(crate) type Fifo = SmallVec<[u64; 8]>;

/// Geometry accumulated across the coalesced configure requests of one window.
///
/// `mask` holds [`ConfigWindow`](x11rb::protocol::xproto::ConfigWindow) bits; only fields named
/// by it are meaningful. Within one tick the first request to name a field wins; later restates
/// of the same field are treated as redundant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PendingConfig {
    /// The window being configured.
    pub window: Window,
    /// Union of the geometry bits seen so far.
    pub mask: u16,
    /// Requested x position.
    pub x: i16,
    /// Requested y position.
    pub y: i16,
    /// Requested width.
    pub width: u16,
    /// Requested height.
    pub height: u16,
    /// Requested border width.
    pub border_width: u16,
}

/// The stacking half of a configure request.
///
/// These are never merged; every request that names `STACK_MODE` or `SIBLING` produces one entry
/// in original order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRestack {
    /// The window being restacked.
    pub window: Window,
    /// The stacking-related [`ConfigWindow`](x11rb::protocol::xproto::ConfigWindow) bits.
    pub mask: u16,
    /// Requested stack mode.
    pub stack_mode: StackMode,
    /// Requested sibling, if `mask` names one.
    pub sibling: Window,
}

/// Bounding box of every expose seen for one window this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExposeRegion {
    /// The exposed window.
    pub window: Window,
    /// Left edge.
    pub x: u16,
    /// Top edge.
    pub y: u16,
    /// Width of the bounding box.
    pub width: u16,
    /// Height of the bounding box.
    pub height: u16,
}

impl ExposeRegion {
    /// Grows the region to the minimum box containing both itself and the given rectangle.
    pub(crate) fn merge(&mut self, x: u16, y: u16, width: u16, height: u16) {
        let x2 = (u32::from(self.x) + u32::from(self.width)).max(u32::from(x) + u32::from(width));
        let y2 = (u32::from(self.y) + u32::from(self.height)).max(u32::from(y) + u32::from(height));
        self.x = self.x.min(x);
        self.y = self.y.min(y);
        self.width = (x2 - u32::from(self.x)).min(u32::from(u16::MAX)) as u16;
        self.height = (y2 - u32::from(self.y)).min(u32::from(u16::MAX)) as u16;
    }

    /// Whether the region fully contains the given rectangle.
    pub fn contains(&self, x: u16, y: u16, width: u16, height: u16) -> bool {
        self.x <= x
            && self.y <= y
            && u32::from(self.x) + u32::from(self.width) >= u32::from(x) + u32::from(width)
            && u32::from(self.y) + u32::from(self.height) >= u32::from(y) + u32::from(height)
    }
}

pub(crate) fn property_key(window: Window, atom: Atom) -> u64 {
    u64::from(window) << 32 | u64::from(atom)
}

/// All buckets of one tick. Owned by [`EventCore`](super::EventCore), read through
/// [`Buckets`].
#[derive(Debug, Default)]
pub(crate) struct EventBuckets {
    pub map_requests: Fifo,
    pub unmap_notifies: Fifo,
    pub destroy_notifies: Fifo,
    pub key_presses: Fifo,
    pub button_events: Fifo,
    pub client_messages: Fifo,
    pub pointer_events: Fifo,
    pub restack_requests: Fifo,
    pub property_fifo: Fifo,

    pub expose_regions: U64Map,
    pub configure_requests: U64Map,
    pub configure_notifies: U64Map,
    pub destroyed_windows: U64Map,
    pub motion_notifies: U64Map,
    pub property_lww: U64Map,

    pub randr_dirty: bool,
    pub randr_width: u16,
    pub randr_height: u16,

    pub ingested: usize,
    pub coalesced: usize,
}

impl EventBuckets {
    pub fn reset(&mut self) {
        self.map_requests.clear();
        self.unmap_notifies.clear();
        self.destroy_notifies.clear();
        self.key_presses.clear();
        self.button_events.clear();
        self.client_messages.clear();
        self.pointer_events.clear();
        self.restack_requests.clear();
        self.property_fifo.clear();

        self.expose_regions.clear();
        self.configure_requests.clear();
        self.configure_notifies.clear();
        self.destroyed_windows.clear();
        self.motion_notifies.clear();
        self.property_lww.clear();

        self.randr_dirty = false;
        self.randr_width = 0;
        self.randr_height = 0;

        self.ingested = 0;
        self.coalesced = 0;
    }
}

/// Read-only view over one tick's buckets.
///
/// Obtained from [`EventCore::buckets`](super::EventCore::buckets) after
/// [`ingest`](super::EventCore::ingest) returns. Every reference handed out borrows the core, so
/// the view has to be dropped before the next [`reset`](super::EventCore::reset). FIFO accessors
/// yield insertion order; keyed accessors yield an unspecified order.
#[derive(Debug, Clone, Copy)]
pub struct Buckets<'a> {
    pub(crate) buckets: &'a EventBuckets,
    pub(crate) arena: &'a TickArena,
}

impl<'a> Buckets<'a> {
    /// Map requests, in arrival order.
    pub fn map_requests(&self) -> impl ExactSizeIterator<Item = &'a MapRequestEvent> {
        self.fifo(&self.buckets.map_requests)
    }

    /// Unmap notifies, in arrival order.
    pub fn unmap_notifies(&self) -> impl ExactSizeIterator<Item = &'a UnmapNotifyEvent> {
        self.fifo(&self.buckets.unmap_notifies)
    }

    /// Destroy notifies, in arrival order.
    pub fn destroy_notifies(&self) -> impl ExactSizeIterator<Item = &'a DestroyNotifyEvent> {
        self.fifo(&self.buckets.destroy_notifies)
    }

    /// Key presses and releases, in arrival order (check `response_type` for the direction).
    pub fn key_presses(&self) -> impl ExactSizeIterator<Item = &'a KeyPressEvent> {
        self.fifo(&self.buckets.key_presses)
    }

    /// Button presses and releases, in arrival order.
    pub fn button_events(&self) -> impl ExactSizeIterator<Item = &'a ButtonPressEvent> {
        self.fifo(&self.buckets.button_events)
    }

    /// Client messages, in arrival order.
    pub fn client_messages(&self) -> impl ExactSizeIterator<Item = &'a ClientMessageEvent> {
        self.fifo(&self.buckets.client_messages)
    }

    /// Enter/leave crossings, in arrival order (check `response_type` for the direction).
    pub fn pointer_events(&self) -> impl ExactSizeIterator<Item = &'a EnterNotifyEvent> {
        self.fifo(&self.buckets.pointer_events)
    }

    /// Stacking changes split out of configure requests, in arrival order.
    pub fn restack_requests(&self) -> impl ExactSizeIterator<Item = &'a PendingRestack> {
        self.fifo(&self.buckets.restack_requests)
    }

    /// Property notifies whose atom is order-sensitive, in arrival order.
    pub fn property_fifo(&self) -> impl ExactSizeIterator<Item = &'a PropertyNotifyEvent> {
        self.fifo(&self.buckets.property_fifo)
    }

    /// The coalesced expose regions, one per window.
    pub fn expose_regions(&self) -> impl Iterator<Item = &'a ExposeRegion> {
        self.keyed(&self.buckets.expose_regions)
    }

    /// The expose region accumulated for `window` this tick.
    pub fn expose_region(&self, window: Window) -> Option<&'a ExposeRegion> {
        self.lookup(&self.buckets.expose_regions, u64::from(window))
    }

    /// The coalesced configure requests, one per window.
    pub fn configure_requests(&self) -> impl Iterator<Item = &'a PendingConfig> {
        self.keyed(&self.buckets.configure_requests)
    }

    /// The pending configure geometry for `window`.
    pub fn pending_config(&self, window: Window) -> Option<&'a PendingConfig> {
        self.lookup(&self.buckets.configure_requests, u64::from(window))
    }

    /// The last configure notify per window.
    pub fn configure_notifies(&self) -> impl Iterator<Item = &'a ConfigureNotifyEvent> {
        self.keyed(&self.buckets.configure_notifies)
    }

    /// The last configure notify seen for `window`.
    pub fn configure_notify(&self, window: Window) -> Option<&'a ConfigureNotifyEvent> {
        self.lookup(&self.buckets.configure_notifies, u64::from(window))
    }

    /// Every window destroyed this tick (set semantics; see also
    /// [`destroy_notifies`](Buckets::destroy_notifies) for the ordered stream).
    pub fn destroyed_windows(&self) -> impl Iterator<Item = &'a DestroyNotifyEvent> {
        self.keyed(&self.buckets.destroyed_windows)
    }

    /// Whether `window` was destroyed this tick.
    pub fn is_destroyed(&self, window: Window) -> bool {
        self.buckets.destroyed_windows.contains(u64::from(window))
    }

    /// The last motion per receiving window.
    pub fn motion_notifies(&self) -> impl Iterator<Item = &'a MotionNotifyEvent> {
        self.keyed(&self.buckets.motion_notifies)
    }

    /// The last motion whose receiving window is `window`.
    pub fn motion_notify(&self, window: Window) -> Option<&'a MotionNotifyEvent> {
        self.lookup(&self.buckets.motion_notifies, u64::from(window))
    }

    /// The last property notify per `(window, atom)` pair, for atoms outside the must-queue set.
    pub fn properties(&self) -> impl Iterator<Item = &'a PropertyNotifyEvent> {
        self.keyed(&self.buckets.property_lww)
    }

    /// The last property notify for `atom` on `window`.
    pub fn property(&self, window: Window, atom: Atom) -> Option<&'a PropertyNotifyEvent> {
        self.lookup(&self.buckets.property_lww, property_key(window, atom))
    }

    /// The screen size from the newest RandR screen-change event, if any arrived this tick.
    pub fn randr_change(&self) -> Option<(u16, u16)> {
        self.buckets
            .randr_dirty
            .then_some((self.buckets.randr_width, self.buckets.randr_height))
    }

    /// Events classified this tick, including inline-dispatched and dropped ones.
    pub fn ingested(&self) -> usize {
        self.buckets.ingested
    }

    /// Events that were merged into an existing entry instead of growing the tick's workload.
    pub fn coalesced(&self) -> usize {
        self.buckets.coalesced
    }

    /// Returns `true` if nothing is buffered for this tick.
    pub fn is_empty(&self) -> bool {
        self.buckets.map_requests.is_empty()
            && self.buckets.unmap_notifies.is_empty()
            && self.buckets.destroy_notifies.is_empty()
            && self.buckets.key_presses.is_empty()
            && self.buckets.button_events.is_empty()
            && self.buckets.client_messages.is_empty()
            && self.buckets.pointer_events.is_empty()
            && self.buckets.restack_requests.is_empty()
            && self.buckets.property_fifo.is_empty()
            && self.buckets.expose_regions.is_empty()
            && self.buckets.configure_requests.is_empty()
            && self.buckets.configure_notifies.is_empty()
            && self.buckets.destroyed_windows.is_empty()
            && self.buckets.motion_notifies.is_empty()
            && self.buckets.property_lww.is_empty()
            && !self.buckets.randr_dirty
    }

    fn fifo<T: Copy + 'a>(&self, fifo: &'a Fifo) -> impl ExactSizeIterator<Item = &'a T> {
        let arena = self.arena;
        fifo.iter().map(move |&raw| arena.get(ArenaSlot::<T>::from_raw(raw)))
    }

    fn keyed<T: Copy + 'a>(&self, map: &'a U64Map) -> impl Iterator<Item = &'a T> {
        let arena = self.arena;
        map.iter().map(move |(_, raw)| arena.get(ArenaSlot::<T>::from_raw(raw)))
    }

    fn lookup<T: Copy>(&self, map: &'a U64Map, key: u64) -> Option<&'a T> {
        map.get(key).map(|raw| self.arena.get(ArenaSlot::<T>::from_raw(raw)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expose_region_merge_is_a_bounding_box() {
        let mut region = ExposeRegion {
            window: 1,
            x: 10,
            y: 10,
            width: 20,
            height: 20,
        };
        region.merge(5, 15, 10, 30);
        assert_eq!((region.x, region.y), (5, 10));
        assert_eq!((region.width, region.height), (25, 35));
        assert!(region.contains(10, 10, 20, 20));
        assert!(region.contains(5, 15, 10, 30));
        assert!(!region.contains(0, 0, 10, 10));
    }

    #[test]
    fn expose_region_merge_of_disjoint_rects() {
        let mut region = ExposeRegion {
            window: 1,
            x: 0,
            y: 0,
            width: 10,
            height: 10,
        };
        region.merge(100, 200, 50, 25);
        assert_eq!((region.x, region.y), (0, 0));
        assert_eq!((region.width, region.height), (150, 225));
    }

    #[test]
    fn property_key_packs_window_and_atom() {
        assert_eq!(property_key(0x1234, 0x42), 0x1234_0000_0042);
        assert_ne!(property_key(1, 2), property_key(2, 1));
    }
}
