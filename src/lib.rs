#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
// Allow acronyms like LWW
#![allow(clippy::upper_case_acronyms)]

//! # Bellows: the event intake for X11 window managers
//!
//! This crate is the event ingestion and coalescing core of an X11 window manager. Once per
//! scheduler tick it drains pending events from the X connection, classifies them by kind and
//! deposits them into per-kind *buckets* that merge semantically redundant events, so that the
//! rest of the window manager sees at most one effective event per (kind, window) pair per tick.
//! The X server delivers motion, expose, configure and property events in bursts; processing them
//! one-by-one causes quadratic work and wasted redraws, which is exactly what this layer absorbs.
//!
//! ## Structure of the crate
//!
//! The [`ingest`] module contains the heart of the crate: [`ingest::EventCore`] owns the buckets,
//! the per-tick arena and the client registry, and its [`ingest`](ingest::EventCore::ingest)
//! method implements the budgeted drain loop. Events are pulled from an
//! [`ingest::EventSource`], usually [`ingest::X11Source`] wrapping an x11rb connection, or a
//! stub in tests. A handful of kinds (colormap, focus, keyboard mapping) are delivered inline
//! through an [`ingest::IngestHandler`] instead of being bucketed.
//!
//! The [`client`] module provides the stable-handle client registry: a generational
//! [`client::SlotMap`] with split hot/cold records, layered with window-id and frame-id lookup
//! maps. Handles stay valid across table growth and are invalidated by a generation bump on free.
//!
//! The [`utils`] module holds the two storage primitives everything else is built on: an
//! open-addressed u64→u64 map and the per-tick bump arena that owns every bucketed event copy.
//!
//! ## General principles
//!
//! The whole crate is single-threaded and non-blocking: one thread owns the X connection, the
//! registry, the buckets and the arena, and nothing here ever waits on the wire. The only
//! backpressure mechanism is the per-tick event budget; when it is exhausted mid-drain the core
//! raises its poll-immediate flag so the outer loop re-enters without sleeping on the X file
//! descriptor.
//!
//! Bucket contents and arena allocations live for exactly one tick. Consumers drain the buckets
//! after [`ingest`](ingest::EventCore::ingest) returns and then call
//! [`reset`](ingest::EventCore::reset); anything that must survive the tick has to be copied out.

pub mod client;
pub mod ingest;
pub mod utils;
