#![warn(missing_docs)]
#![deny(clippy::disallowed_types, clippy::await_holding_lock)]

//! A library crate of the in-memory and on-disk representations of the zone server's core data.

pub mod names;
pub mod persist;
pub mod settings;

/// A process-unique numeric player identity, assigned at connection time.
#[derive(Copy, Clone, Debug, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct PlayerId(pub i32);

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The ship a player currently flies, or the spectator pseudo-ship.
#[derive(Copy, Clone, Debug, Ord, PartialOrd, Eq, PartialEq, Hash, Default)]
pub enum ShipKind {
    /// Ship 0.
    Warbird,
    /// Ship 1.
    Javelin,
    /// Ship 2.
    Spider,
    /// Ship 3.
    Leviathan,
    /// Ship 4.
    Terrier,
    /// Ship 5.
    Weasel,
    /// Ship 6.
    Lancaster,
    /// Ship 7.
    Shark,
    /// Not in a ship at all.
    #[default]
    Spectator,
}

impl ShipKind {
    /// The ship's index into the per-ship settings blocks, or `None` for spectators.
    pub fn settings_index(self) -> Option<usize> {
        match self {
            ShipKind::Warbird => Some(0),
            ShipKind::Javelin => Some(1),
            ShipKind::Spider => Some(2),
            ShipKind::Leviathan => Some(3),
            ShipKind::Terrier => Some(4),
            ShipKind::Weasel => Some(5),
            ShipKind::Lancaster => Some(6),
            ShipKind::Shark => Some(7),
            ShipKind::Spectator => None,
        }
    }
}

/// Re-exported dependencies used in API types
pub mod dependencies {
    pub use bytemuck;
    pub use hashbrown;
    pub use kstring;
    pub use rand;
    pub use thiserror;
}
