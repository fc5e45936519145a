//! Various utilities functions and types

mod arena;
mod map;

pub use self::arena::{ArenaSlot, TickArena, TICK_ARENA_INIT_BYTES};
pub use self::map::U64Map;
