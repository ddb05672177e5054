//! The entity model: arenas, players, their lifecycle state machines and the
//! per-entity extension slot system.

pub mod arena;
pub mod extra;
pub mod player;

pub use arena::{Arena, ArenaHandle, ArenaManager, ArenaStatus};
pub use extra::{ExtraData, ExtraDataMap, ExtraSlotKey, ExtraSlotRegistry};
pub use player::{Player, PlayerFlags, PlayerHandle, PlayerManager, PlayerStatus};
