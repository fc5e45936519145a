//! Client records and the stable-handle registry.
//!
//! Every managed X window gets one slot in a generational [`SlotMap`], split into a packed
//! [`ClientHot`] record for the per-event path and a [`ClientCold`] record for strings and other
//! rarely-touched data. The [`ClientRegistry`] layers two lookup maps on top, one keyed by the
//! client window id and one by the frame (decoration) window id, and keeps them consistent with
//! the slotmap through every register/unregister.
//!
//! Handles, not window ids, are what the rest of the window manager passes around: they stay
//! valid across table growth and turn stale the moment the client is unregistered. Lists that
//! naturally refer back to windows (such as `WM_COLORMAP_WINDOWS`) store raw window ids instead
//! and are resolved through the registry at use time, which keeps the record graph acyclic.

mod slotmap;

pub use self::slotmap::{Handle, SlotMap};

use tracing::debug;
use x11rb::protocol::xproto::{Atom, Colormap, Window};

use crate::utils::U64Map;

/// Lifecycle state of a managed client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientState {
    /// Seen but not yet mapped by us.
    #[default]
    Unmanaged,
    /// Mapped and visible.
    Mapped,
    /// Unmapped at the client's request (ICCCM withdrawn).
    Withdrawn,
    /// Iconified.
    Iconic,
    /// The X window is gone; the record lingers until downstream unregisters it.
    Destroyed,
}

/// The cache-hot per-client record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientHot {
    /// This record's own handle.
    pub handle: Handle,
    /// The client's top-level window.
    pub window: Window,
    /// The frame window we reparented the client into, or 0.
    pub frame: Window,
    /// Lifecycle state.
    pub state: ClientState,
    /// Stacking layer, -1 while unplaced.
    pub stacking_layer: i32,
    /// Position within the stacking layer, -1 while unplaced.
    pub stacking_index: i32,
    /// The client's own colormap, or 0 for the default.
    pub colormap: Colormap,
    /// Colormap installed on the frame, if we own one.
    pub frame_colormap: Colormap,
    /// Whether `frame_colormap` was created (and must be freed) by us.
    pub frame_colormap_owned: bool,
    /// `WM_TRANSIENT_FOR` target window, or 0.
    pub transient_for: Window,
}

impl Default for ClientHot {
    fn default() -> Self {
        ClientHot {
            handle: Handle::NULL,
            window: 0,
            frame: 0,
            state: ClientState::Unmanaged,
            stacking_layer: -1,
            stacking_index: -1,
            colormap: 0,
            frame_colormap: 0,
            frame_colormap_owned: false,
            transient_for: 0,
        }
    }
}

/// The rarely-touched per-client record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientCold {
    /// `_NET_WM_NAME` / `WM_NAME`.
    pub title: String,
    /// Class part of `WM_CLASS`.
    pub class: String,
    /// Instance part of `WM_CLASS`.
    pub instance: String,
    /// Atoms advertised through `WM_PROTOCOLS`.
    pub protocols: Vec<Atom>,
    /// `WM_COLORMAP_WINDOWS`, as raw window ids (resolved through the registry at use time).
    pub colormap_windows: Vec<Window>,
    /// Whether the client accepts input focus.
    pub can_focus: bool,
}

/// The client registry: slotmap plus window-id and frame-id lookup maps.
///
/// Invariant: for every live client `c`, `find_by_window(c.window)` yields `c.handle`, and if
/// `c.frame != 0` so does `find_by_frame(c.frame)`; no other key maps to it.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    slots: SlotMap<ClientHot, ClientCold>,
    window_to_client: U64Map,
    frame_to_client: U64Map,
}

impl ClientRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live clients.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if no client is registered.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Registers a new client for `window`, optionally already framed, and returns its handle.
    ///
    /// The record starts out [`ClientState::Unmanaged`] and unplaced. Pass `frame = 0` when no
    /// frame window exists yet and supply it later via [`set_frame`](ClientRegistry::set_frame).
    pub fn register(&mut self, window: Window, frame: Window) -> Handle {
        let handle = self.slots.alloc();
        let hot = self.slots.hot_mut(handle).unwrap();
        hot.handle = handle;
        hot.window = window;
        hot.frame = frame;
        self.window_to_client.insert(u64::from(window), handle.to_raw());
        if frame != 0 {
            self.frame_to_client.insert(u64::from(frame), handle.to_raw());
        }
        debug!(window, frame, ?handle, "registered client");
        handle
    }

    /// Removes the client from both lookup maps and frees its slot.
    ///
    /// Returns `false` if the handle was already stale.
    pub fn unregister(&mut self, handle: Handle) -> bool {
        let (window, frame) = match self.slots.hot(handle) {
            Some(hot) => (hot.window, hot.frame),
            None => return false,
        };
        self.window_to_client.remove(u64::from(window));
        if frame != 0 {
            self.frame_to_client.remove(u64::from(frame));
        }
        self.slots.free(handle);
        debug!(window, frame, ?handle, "unregistered client");
        true
    }

    /// Looks up a client by its top-level window id.
    pub fn find_by_window(&self, window: Window) -> Option<Handle> {
        self.resolve(self.window_to_client.get(u64::from(window))?)
    }

    /// Looks up a client by its frame window id.
    pub fn find_by_frame(&self, frame: Window) -> Option<Handle> {
        self.resolve(self.frame_to_client.get(u64::from(frame))?)
    }

    /// Changes the frame window of `handle`, keeping the frame lookup map in sync.
    pub fn set_frame(&mut self, handle: Handle, frame: Window) -> bool {
        let old = match self.slots.hot(handle) {
            Some(hot) => hot.frame,
            None => return false,
        };
        if old != 0 {
            self.frame_to_client.remove(u64::from(old));
        }
        if frame != 0 {
            self.frame_to_client.insert(u64::from(frame), handle.to_raw());
        }
        self.slots.hot_mut(handle).unwrap().frame = frame;
        true
    }

    /// Replaces the client's `WM_COLORMAP_WINDOWS` list.
    pub fn set_colormap_windows(&mut self, handle: Handle, windows: &[Window]) -> bool {
        match self.slots.cold_mut(handle) {
            Some(cold) => {
                cold.colormap_windows.clear();
                cold.colormap_windows.extend_from_slice(windows);
                true
            }
            None => false,
        }
    }

    /// Resolves the hot record.
    pub fn hot(&self, handle: Handle) -> Option<&ClientHot> {
        self.slots.hot(handle)
    }

    /// Resolves the hot record mutably.
    pub fn hot_mut(&mut self, handle: Handle) -> Option<&mut ClientHot> {
        self.slots.hot_mut(handle)
    }

    /// Resolves the cold record.
    pub fn cold(&self, handle: Handle) -> Option<&ClientCold> {
        self.slots.cold(handle)
    }

    /// Resolves the cold record mutably.
    pub fn cold_mut(&mut self, handle: Handle) -> Option<&mut ClientCold> {
        self.slots.cold_mut(handle)
    }

    /// Iterates over every live client in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &ClientHot)> {
        self.slots.iter()
    }

    fn resolve(&self, raw: u64) -> Option<Handle> {
        let handle = Handle::from_raw(raw);
        self.slots.contains(handle).then_some(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_find_round_trips() {
        let mut registry = ClientRegistry::new();
        let handle = registry.register(100, 110);
        assert_eq!(registry.find_by_window(100), Some(handle));
        assert_eq!(registry.find_by_frame(110), Some(handle));
        assert_eq!(registry.hot(handle).unwrap().window, 100);
        assert_eq!(registry.hot(handle).unwrap().frame, 110);
        assert_eq!(registry.hot(handle).unwrap().state, ClientState::Unmanaged);
        assert_eq!(registry.hot(handle).unwrap().stacking_index, -1);
    }

    #[test]
    fn unregister_invalidates_handle_and_lookups() {
        let mut registry = ClientRegistry::new();
        let handle = registry.register(200, 210);
        assert!(registry.unregister(handle));
        assert_eq!(registry.find_by_window(200), None);
        assert_eq!(registry.find_by_frame(210), None);
        assert!(registry.hot(handle).is_none());
        assert!(!registry.unregister(handle));
    }

    #[test]
    fn recycled_slot_yields_fresh_record() {
        let mut registry = ClientRegistry::new();
        let first = registry.register(300, 310);
        registry.unregister(first);
        let second = registry.register(400, 0);
        assert_eq!(second.index(), first.index());
        assert!(registry.hot(first).is_none());
        assert_eq!(registry.hot(second).unwrap().window, 400);
        assert_eq!(registry.find_by_window(300), None);
    }

    #[test]
    fn frameless_client_gets_frame_later() {
        let mut registry = ClientRegistry::new();
        let handle = registry.register(500, 0);
        assert_eq!(registry.find_by_frame(510), None);
        assert!(registry.set_frame(handle, 510));
        assert_eq!(registry.find_by_frame(510), Some(handle));
        assert!(registry.set_frame(handle, 520));
        assert_eq!(registry.find_by_frame(510), None);
        assert_eq!(registry.find_by_frame(520), Some(handle));
    }

    #[test]
    fn colormap_windows_list() {
        let mut registry = ClientRegistry::new();
        let handle = registry.register(600, 610);
        assert!(registry.set_colormap_windows(handle, &[600, 610]));
        assert_eq!(registry.cold(handle).unwrap().colormap_windows, vec![600, 610]);
        assert!(registry.set_colormap_windows(handle, &[600]));
        assert_eq!(registry.cold(handle).unwrap().colormap_windows, vec![600]);
        registry.unregister(handle);
        assert!(!registry.set_colormap_windows(handle, &[600]));
    }

    #[test]
    fn many_clients_stay_reachable() {
        let mut registry = ClientRegistry::new();
        let handles: Vec<_> = (0..500u32).map(|i| registry.register(1000 + i, 0)).collect();
        for (i, handle) in handles.iter().enumerate() {
            assert_eq!(registry.find_by_window(1000 + i as u32), Some(*handle));
        }
        assert_eq!(registry.len(), 500);
    }
}
