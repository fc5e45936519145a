//! Event sources feeding the ingest loop.
//!
//! The loop only ever sees the two-phase polling contract of [`EventSource`]: first drain what
//! the transport has already buffered, then, if the scheduler says the connection is readable,
//! take single non-blocking reads from the wire. [`X11Source`] implements it on top of an x11rb
//! [`RustConnection`]; tests implement it over plain queues.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

use x11rb::connection::Connection as _;
use x11rb::errors::ConnectionError;
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;

/// Error produced by an event source while polling.
///
/// Any of these ends the current tick's drain; the scheduler decides whether the connection is
/// worth keeping.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The underlying X connection failed.
    #[error("lost connection to the X server")]
    Connection(#[from] ConnectionError),

    /// An I/O error occurred while polling the transport.
    #[error("i/o error while polling the X transport")]
    Io(#[from] io::Error),
}

/// A non-blocking supplier of X events.
///
/// Both operations must return immediately. [`poll_queued`](EventSource::poll_queued) may only
/// hand out events the transport has already buffered; [`poll_wire`](EventSource::poll_wire)
/// performs at most one read from the socket. The ingest loop consults the wire only when its
/// caller has observed readiness, so neither call may wait for data.
pub trait EventSource {
    /// Returns the next already-buffered event, if any, without touching the wire.
    fn poll_queued(&mut self) -> Result<Option<Event>, SourceError>;

    /// Performs one non-blocking read from the wire and returns an event if one is available.
    fn poll_wire(&mut self) -> Result<Option<Event>, SourceError>;
}

/// [`EventSource`] backed by an x11rb [`RustConnection`].
///
/// Synthetic events pushed through [`inject`](X11Source::inject) sit in a local buffer in front
/// of the wire and are handed out first, which lets a window manager splice self-generated
/// events (e.g. synthetic unmaps) into the stream in order. x11rb performs its own internal
/// buffering of wire events behind [`poll_for_event`](RustConnection::poll_for_event), so the
/// queued phase of the contract covers the injected buffer and the wire phase covers the
/// connection.
#[derive(Debug)]
pub struct X11Source {
    conn: Arc<RustConnection>,
    injected: VecDeque<Event>,
}

impl X11Source {
    /// Wraps a connection.
    pub fn new(conn: Arc<RustConnection>) -> Self {
        X11Source {
            conn,
            injected: VecDeque::new(),
        }
    }

    /// The wrapped connection.
    pub fn connection(&self) -> &Arc<RustConnection> {
        &self.conn
    }

    /// Queues a synthetic event to be delivered before anything from the wire.
    pub fn inject(&mut self, event: Event) {
        self.injected.push_back(event);
    }
}

impl EventSource for X11Source {
    fn poll_queued(&mut self) -> Result<Option<Event>, SourceError> {
        Ok(self.injected.pop_front())
    }

    fn poll_wire(&mut self) -> Result<Option<Event>, SourceError> {
        Ok(self.conn.poll_for_event()?)
    }
}

x11rb::atom_manager! {
    /// The property atoms the ingest layer cares about.
    ///
    /// Interned once at startup; [`Atoms::must_queue`] derives the default must-queue set from
    /// them.
    pub Atoms: AtomsCookie {
        WM_HINTS,
        WM_NORMAL_HINTS,
        WM_PROTOCOLS,
        WM_TRANSIENT_FOR,
        WM_COLORMAP_WINDOWS,
        WM_STATE,
        WM_NAME,
    }
}

impl Atoms {
    /// The atoms whose property notifications must keep FIFO ordering.
    ///
    /// These all carry multi-field state (hints, protocol lists) where collapsing two
    /// notifications could lose an intermediate value a consumer already acted on.
    pub fn must_queue(&self) -> std::collections::HashSet<x11rb::protocol::xproto::Atom> {
        [
            self.WM_HINTS,
            self.WM_NORMAL_HINTS,
            self.WM_PROTOCOLS,
            self.WM_TRANSIENT_FOR,
            self.WM_COLORMAP_WINDOWS,
        ]
        .into_iter()
        .collect()
    }
}
