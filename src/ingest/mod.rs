//! Event ingestion and coalescing.
//!
//! [`EventCore`] is what the scheduler talks to. Once per tick it calls
//! [`ingest`](EventCore::ingest), which drains the [`EventSource`] under a fixed event budget and
//! lands every event in the bucket matching its coalescing policy:
//!
//! - **FIFO** for ordering-sensitive kinds (map requests, unmaps, destroys, key and button
//!   input, client messages, enter/leave crossings, must-queue property atoms). Nothing merges.
//! - **Last-writer-wins** per window for motion and configure notifies, and per `(window, atom)`
//!   for the remaining property notifies.
//! - **Mask union** for configure requests: one pending geometry per window, where the first
//!   request to name a field wins and later restates are absorbed.
//! - **Region merge** for exposes: one bounding box per window.
//! - **Extremum** for RandR screen changes: a dirty flag plus the newest screen size.
//!
//! Configure requests carrying both geometry and stacking bits are split: the geometry half joins
//! the mask union, the stacking half is appended to the restack FIFO, so each bucket stays
//! policy-homogeneous. Colormap, focus and keyboard-mapping events have no useful coalescing and
//! go straight to the [`IngestHandler`] during the drain.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bellows::ingest::{EventCore, IngestConfig, X11Source};
//! use x11rb::rust_connection::RustConnection;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let (conn, _screen) = RustConnection::connect(None)?;
//! let mut source = X11Source::new(Arc::new(conn));
//! let mut core = EventCore::new(IngestConfig::default());
//!
//! // One scheduler tick: drain, process, reset.
//! core.ingest(&mut source, &mut (), true)?;
//! for request in core.buckets().map_requests() {
//!     println!("client wants {} mapped", request.window);
//! }
//! core.reset();
//! // Re-enter immediately if the budget capped the drain, otherwise wait on the X fd.
//! let _ = core.x_poll_immediate();
//! # Ok(())
//! # }
//! ```

mod buckets;
mod source;

pub use self::buckets::{Buckets, ExposeRegion, PendingConfig, PendingRestack};
pub use self::source::{Atoms, AtomsCookie, EventSource, SourceError, X11Source};

use std::collections::HashSet;

use tracing::{trace, warn};
use x11rb::protocol::xproto::{
    Atom, ColormapNotifyEvent, ConfigWindow, ConfigureRequestEvent, DestroyNotifyEvent, ExposeEvent,
    FocusInEvent, FocusOutEvent, MappingNotifyEvent, PropertyNotifyEvent,
};
use x11rb::protocol::Event;

use self::buckets::{property_key, EventBuckets, Fifo};
use crate::client::{ClientRegistry, ClientState};
use crate::utils::{ArenaSlot, TickArena, U64Map, TICK_ARENA_INIT_BYTES};

/// Default per-tick event budget.
pub const MAX_EVENTS_PER_TICK: usize = 256;

/// Tunables fixed at core construction.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Upper bound on events classified per tick. A capped drain raises
    /// [`x_poll_immediate`](EventCore::x_poll_immediate) instead of stalling the tick.
    pub max_events_per_tick: usize,
    /// Property atoms whose notifications must keep FIFO order instead of being coalesced.
    /// Usually [`Atoms::must_queue`] plus whatever the consumer treats as order-sensitive.
    pub must_queue_atoms: HashSet<Atom>,
    /// Initial capacity of the tick arena, in bytes.
    pub arena_capacity: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            max_events_per_tick: MAX_EVENTS_PER_TICK,
            must_queue_atoms: HashSet::new(),
            arena_capacity: TICK_ARENA_INIT_BYTES,
        }
    }
}

/// Inline delivery for the event kinds that bypass the buckets.
///
/// Colormap, focus and keyboard-mapping changes have no meaningful coalescing and affect state
/// the consumer wants settled before the bucket drain, so they are handed over during ingest
/// instead of being stored. They still count as ingested.
pub trait IngestHandler {
    /// A colormap was created, freed or (un)installed on a window.
    fn colormap_notify(&mut self, event: &ColormapNotifyEvent) {
        let _ = event;
    }

    /// A window gained input focus.
    fn focus_in(&mut self, event: &FocusInEvent) {
        let _ = event;
    }

    /// A window lost input focus.
    fn focus_out(&mut self, event: &FocusOutEvent) {
        let _ = event;
    }

    /// The keyboard or modifier mapping changed.
    fn mapping_notify(&mut self, event: &MappingNotifyEvent) {
        let _ = event;
    }
}

/// For consumers without any inline handling.
impl IngestHandler for () {}

/// The event ingestion core.
///
/// Owns the client registry, this tick's buckets, and the arena backing them. Single-threaded by
/// design: ingest and the downstream drain run on the thread owning the X connection, so none of
/// this is synchronized.
#[derive(Debug)]
pub struct EventCore {
    clients: ClientRegistry,
    buckets: EventBuckets,
    arena: TickArena,
    config: IngestConfig,
    x_poll_immediate: bool,
}

impl Default for EventCore {
    fn default() -> Self {
        Self::new(IngestConfig::default())
    }
}

impl EventCore {
    /// Creates a core with the given tunables.
    pub fn new(config: IngestConfig) -> Self {
        EventCore {
            clients: ClientRegistry::new(),
            buckets: EventBuckets::default(),
            arena: TickArena::with_capacity(config.arena_capacity),
            config,
            x_poll_immediate: false,
        }
    }

    /// The tunables this core was built with.
    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// The client registry.
    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    /// The client registry, mutably (downstream handlers update records through this).
    pub fn clients_mut(&mut self) -> &mut ClientRegistry {
        &mut self.clients
    }

    /// This tick's buckets.
    pub fn buckets(&self) -> Buckets<'_> {
        Buckets {
            buckets: &self.buckets,
            arena: &self.arena,
        }
    }

    /// Whether the last [`ingest`](EventCore::ingest) left work behind and the scheduler should
    /// re-enter without waiting on the X file descriptor.
    pub fn x_poll_immediate(&self) -> bool {
        self.x_poll_immediate
    }

    /// Drains the source into the buckets, classifying at most the configured budget of events.
    ///
    /// The already-queued buffer is always drained first; the wire is consulted only when
    /// `ready` says the scheduler observed the connection readable. A source failure ends the
    /// tick early with the error, leaving everything ingested so far in place and
    /// [`x_poll_immediate`](EventCore::x_poll_immediate) raised.
    #[profiling::function]
    pub fn ingest<S, H>(&mut self, source: &mut S, handler: &mut H, ready: bool) -> Result<(), SourceError>
    where
        S: EventSource,
        H: IngestHandler,
    {
        let mut budget = self.config.max_events_per_tick;
        while budget > 0 {
            let polled = match source.poll_queued() {
                Ok(Some(event)) => Some(event),
                Ok(None) if ready => match source.poll_wire() {
                    Ok(polled) => polled,
                    Err(err) => {
                        warn!("wire poll failed, stopping ingest for this tick: {}", err);
                        self.x_poll_immediate = true;
                        return Err(err);
                    }
                },
                Ok(None) => None,
                Err(err) => {
                    warn!("queued poll failed, stopping ingest for this tick: {}", err);
                    self.x_poll_immediate = true;
                    return Err(err);
                }
            };
            let event = match polled {
                Some(event) => event,
                None => break,
            };
            self.dispatch(event, handler);
            budget -= 1;
        }
        // The transport has no non-consuming peek; a capped drain is the signal that events may
        // remain buffered.
        self.x_poll_immediate = budget == 0;
        Ok(())
    }

    /// Clears every bucket, both counters and the arena.
    ///
    /// Must be called after the downstream drain and before the next
    /// [`ingest`](EventCore::ingest); every bucket reference obtained before the reset is gone
    /// afterwards.
    pub fn reset(&mut self) {
        self.buckets.reset();
        self.arena.reset();
    }

    #[profiling::function]
    fn dispatch<H: IngestHandler>(&mut self, event: Event, handler: &mut H) {
        self.buckets.ingested += 1;
        trace!(?event, "classifying event");

        match event {
            Event::KeyPress(ev) | Event::KeyRelease(ev) => {
                push_fifo(&mut self.arena, &mut self.buckets.key_presses, ev);
            }
            Event::ButtonPress(ev) | Event::ButtonRelease(ev) => {
                push_fifo(&mut self.arena, &mut self.buckets.button_events, ev);
            }
            Event::MotionNotify(ev) => {
                // Keyed by the receiving window; only the newest position matters.
                lww_replace(
                    &mut self.buckets.motion_notifies,
                    &mut self.arena,
                    &mut self.buckets.coalesced,
                    u64::from(ev.event),
                    ev,
                );
            }
            Event::EnterNotify(ev) | Event::LeaveNotify(ev) => {
                push_fifo(&mut self.arena, &mut self.buckets.pointer_events, ev);
            }
            Event::Expose(ev) => self.on_expose(ev),
            Event::MapRequest(ev) => {
                // First sighting of a top-level window creates its registry record.
                if self.clients.find_by_window(ev.window).is_none() {
                    self.clients.register(ev.window, 0);
                }
                push_fifo(&mut self.arena, &mut self.buckets.map_requests, ev);
            }
            Event::UnmapNotify(ev) => {
                push_fifo(&mut self.arena, &mut self.buckets.unmap_notifies, ev);
            }
            Event::DestroyNotify(ev) => self.on_destroy(ev),
            Event::ConfigureRequest(ev) => self.on_configure_request(ev),
            Event::ConfigureNotify(ev) => {
                // Keyed by the configured window, not the event window: with SubstructureNotify
                // selected every child reports through the same parent.
                lww_replace(
                    &mut self.buckets.configure_notifies,
                    &mut self.arena,
                    &mut self.buckets.coalesced,
                    u64::from(ev.window),
                    ev,
                );
            }
            Event::PropertyNotify(ev) => self.on_property(ev),
            Event::ClientMessage(ev) => {
                push_fifo(&mut self.arena, &mut self.buckets.client_messages, ev);
            }
            Event::RandrScreenChangeNotify(ev) => {
                if self.buckets.randr_dirty {
                    self.buckets.coalesced += 1;
                }
                self.buckets.randr_dirty = true;
                self.buckets.randr_width = ev.width;
                self.buckets.randr_height = ev.height;
            }
            Event::ColormapNotify(ev) => handler.colormap_notify(&ev),
            Event::FocusIn(ev) => handler.focus_in(&ev),
            Event::FocusOut(ev) => handler.focus_out(&ev),
            Event::MappingNotify(ev) => handler.mapping_notify(&ev),
            Event::Error(err) => {
                warn!(?err, "X protocol error delivered in the event stream");
            }
            _ => {
                trace!("dropping unhandled event kind");
            }
        }
    }

    fn on_expose(&mut self, ev: ExposeEvent) {
        let key = u64::from(ev.window);
        match self.buckets.expose_regions.get(key) {
            Some(raw) => {
                self.arena
                    .get_mut(ArenaSlot::<ExposeRegion>::from_raw(raw))
                    .merge(ev.x, ev.y, ev.width, ev.height);
                self.buckets.coalesced += 1;
            }
            None => {
                let region = ExposeRegion {
                    window: ev.window,
                    x: ev.x,
                    y: ev.y,
                    width: ev.width,
                    height: ev.height,
                };
                let slot = self.arena.alloc(region);
                self.buckets.expose_regions.insert(key, slot.to_raw());
            }
        }
    }

    fn on_destroy(&mut self, ev: DestroyNotifyEvent) {
        push_fifo(&mut self.arena, &mut self.buckets.destroy_notifies, ev);
        let key = u64::from(ev.window);
        if !self.buckets.destroyed_windows.contains(key) {
            let slot = self.arena.alloc(ev);
            self.buckets.destroyed_windows.insert(key, slot.to_raw());
        }
        // The record itself stays registered; downstream unregisters once nothing refers to the
        // window anymore.
        if let Some(handle) = self.clients.find_by_window(ev.window) {
            if let Some(hot) = self.clients.hot_mut(handle) {
                hot.state = ClientState::Destroyed;
            }
        }
    }

    fn on_configure_request(&mut self, ev: ConfigureRequestEvent) {
        let mask = u16::from(ev.value_mask);
        let geometry = u16::from(ConfigWindow::X)
            | u16::from(ConfigWindow::Y)
            | u16::from(ConfigWindow::WIDTH)
            | u16::from(ConfigWindow::HEIGHT)
            | u16::from(ConfigWindow::BORDER_WIDTH);
        let stacking = u16::from(ConfigWindow::STACK_MODE) | u16::from(ConfigWindow::SIBLING);

        let geometry_bits = mask & geometry;
        if geometry_bits != 0 {
            let key = u64::from(ev.window);
            match self.buckets.configure_requests.get(key) {
                Some(raw) => {
                    let pending = self.arena.get_mut(ArenaSlot::<PendingConfig>::from_raw(raw));
                    // First writer wins per bit: only bits not yet named copy their fields.
                    let fresh = geometry_bits & !pending.mask;
                    copy_geometry(pending, &ev, fresh);
                    pending.mask |= fresh;
                    self.buckets.coalesced += 1;
                }
                None => {
                    let mut pending = PendingConfig {
                        window: ev.window,
                        ..PendingConfig::default()
                    };
                    copy_geometry(&mut pending, &ev, geometry_bits);
                    pending.mask = geometry_bits;
                    let slot = self.arena.alloc(pending);
                    self.buckets.configure_requests.insert(key, slot.to_raw());
                }
            }
        }

        let stacking_bits = mask & stacking;
        if stacking_bits != 0 {
            let restack = PendingRestack {
                window: ev.window,
                mask: stacking_bits,
                stack_mode: ev.stack_mode.into(),
                sibling: ev.sibling,
            };
            push_fifo(&mut self.arena, &mut self.buckets.restack_requests, restack);
        }
    }

    fn on_property(&mut self, ev: PropertyNotifyEvent) {
        if self.config.must_queue_atoms.contains(&ev.atom) {
            push_fifo(&mut self.arena, &mut self.buckets.property_fifo, ev);
        } else {
            lww_replace(
                &mut self.buckets.property_lww,
                &mut self.arena,
                &mut self.buckets.coalesced,
                property_key(ev.window, ev.atom),
                ev,
            );
        }
    }
}

fn push_fifo<T: Copy>(arena: &mut TickArena, fifo: &mut Fifo, value: T) {
    fifo.push(arena.alloc(value).to_raw());
}

fn lww_replace<T: Copy>(map: &mut U64Map, arena: &mut TickArena, coalesced: &mut usize, key: u64, value: T) {
    match map.get(key) {
        Some(raw) => {
            *arena.get_mut(ArenaSlot::from_raw(raw)) = value;
            *coalesced += 1;
        }
        None => {
            let slot = arena.alloc(value);
            map.insert(key, slot.to_raw());
        }
    }
}

fn copy_geometry(pending: &mut PendingConfig, ev: &ConfigureRequestEvent, bits: u16) {
    if bits & u16::from(ConfigWindow::X) != 0 {
        pending.x = ev.x;
    }
    if bits & u16::from(ConfigWindow::Y) != 0 {
        pending.y = ev.y;
    }
    if bits & u16::from(ConfigWindow::WIDTH) != 0 {
        pending.width = ev.width;
    }
    if bits & u16::from(ConfigWindow::HEIGHT) != 0 {
        pending.height = ev.height;
    }
    if bits & u16::from(ConfigWindow::BORDER_WIDTH) != 0 {
        pending.border_width = ev.border_width;
    }
}
