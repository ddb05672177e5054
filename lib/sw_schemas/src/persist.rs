//! Vocabulary types for the persistent score store: intervals, scopes, keys
//! and arena groups.

use std::fmt::{Display, Formatter};

use thiserror::Error;

use crate::names::EntityName;

/// The reserved arena-group name under which zone-wide data is pooled.
pub static GLOBAL_GROUP_NAME: &str = "<global>";

/// The score category a piece of persistent data belongs to.
///
/// Shared intervals pool their data under a common group name so several
/// arenas (`turf1`, `turf2`, ...) can aggregate scores; non-shared intervals
/// keep data private to one arena.
#[derive(Copy, Clone, Debug, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub enum PersistInterval {
    /// Never-ending shared interval.
    Forever,
    /// Shared interval that lasts until an explicit reset.
    Reset,
    /// Per-game interval, ended when a game concludes.
    Game,
    /// Never-ending interval private to a single arena.
    ForeverNotShared,
}

impl PersistInterval {
    /// Whether several arenas pool their data for this interval under a
    /// common group name.
    pub fn is_shared(self) -> bool {
        match self {
            PersistInterval::Forever | PersistInterval::Reset | PersistInterval::Game => true,
            PersistInterval::ForeverNotShared => false,
        }
    }

    /// Whether the interval's current generation may ever be closed.
    pub fn can_end(self) -> bool {
        !matches!(self, PersistInterval::Forever | PersistInterval::ForeverNotShared)
    }

    /// The stable numeric code this interval is stored under in the database.
    pub fn code(self) -> i64 {
        match self {
            PersistInterval::Forever => 0,
            PersistInterval::Reset => 1,
            PersistInterval::Game => 2,
            PersistInterval::ForeverNotShared => 3,
        }
    }
}

/// Error returned when decoding an unknown interval code from the database.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
#[error("{0} is not a known persist interval code")]
pub struct InvalidIntervalCode(pub i64);

impl TryFrom<i64> for PersistInterval {
    type Error = InvalidIntervalCode;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PersistInterval::Forever),
            1 => Ok(PersistInterval::Reset),
            2 => Ok(PersistInterval::Game),
            3 => Ok(PersistInterval::ForeverNotShared),
            other => Err(InvalidIntervalCode(other)),
        }
    }
}

impl Display for PersistInterval {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PersistInterval::Forever => "forever",
            PersistInterval::Reset => "reset",
            PersistInterval::Game => "game",
            PersistInterval::ForeverNotShared => "forever-notshared",
        };
        f.write_str(name)
    }
}

/// Whether a persistent data registration covers the whole zone or one arena.
#[derive(Copy, Clone, Debug, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub enum PersistScope {
    /// One record per player (or one zone record) regardless of arena.
    Global,
    /// One record per `(player, arena group)` pair.
    PerArena,
}

/// Caller-chosen identity of one persistent record kind.
/// No two registrations may share `(key, interval, scope)`.
#[derive(Copy, Clone, Debug, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct PersistKey(pub u32);

impl Display for PersistKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A tag under which one or more arenas aggregate shared scores.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ArenaGroup(EntityName);

impl ArenaGroup {
    /// The reserved group for zone-wide data.
    pub fn global() -> Self {
        Self(EntityName::new_static(GLOBAL_GROUP_NAME))
    }

    /// Wraps an explicit group name.
    pub fn new(name: &str) -> Self {
        Self(EntityName::new(name))
    }

    /// The group's name as stored in the database.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Whether this is the reserved zone-wide group.
    pub fn is_global(&self) -> bool {
        self.0.as_str().eq_ignore_ascii_case(GLOBAL_GROUP_NAME)
    }
}

impl Display for ArenaGroup {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
