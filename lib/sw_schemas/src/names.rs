//! Case-insensitive entity names, used for arenas, players and score groups.

use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};

use hashbrown::Equivalent;
use kstring::{KString, KStringRef};

/// A name that preserves the spelling it was created with, but compares and
/// hashes ASCII-case-insensitively. Arena, player and arena-group identities
/// are all names of this kind.
#[derive(Clone, Debug, Default)]
pub struct EntityName {
    raw: KString,
}

impl EntityName {
    /// Wraps the given spelling.
    pub fn new(raw: &str) -> Self {
        Self {
            raw: KString::from_ref(raw),
        }
    }

    /// Wraps a static spelling without copying.
    pub const fn new_static(raw: &'static str) -> Self {
        Self {
            raw: KString::from_static(raw),
        }
    }

    /// The spelling this name was created with.
    pub fn as_str(&self) -> &str {
        self.raw.as_str()
    }

    /// The name with any trailing ASCII digits stripped.
    /// `turf3` and `turf12` share the base name `turf`.
    pub fn base_part(&self) -> &str {
        self.raw.as_str().trim_end_matches(|c: char| c.is_ascii_digit())
    }

    /// A reference view for heterogeneous map lookups.
    pub fn as_ref(&self) -> EntityNameRef {
        EntityNameRef {
            raw: self.raw.as_ref(),
        }
    }
}

/// Borrowed counterpart of [`EntityName`], see that type for the comparison semantics.
#[derive(Copy, Clone, Debug, Default)]
pub struct EntityNameRef<'n> {
    raw: KStringRef<'n>,
}

impl<'n> EntityNameRef<'n> {
    /// Wraps the given spelling.
    pub fn new(raw: &'n str) -> Self {
        Self {
            raw: KStringRef::from_ref(raw),
        }
    }

    /// The spelling this name was created with.
    pub fn as_str(&self) -> &str {
        self.raw.as_str()
    }

    /// Converts to an owned name, copying the string as needed.
    pub fn to_owned(&self) -> EntityName {
        EntityName {
            raw: self.raw.into(),
        }
    }
}

fn hash_ci<H: Hasher>(s: &str, state: &mut H) {
    for b in s.bytes() {
        state.write_u8(b.to_ascii_lowercase());
    }
    state.write_u8(0xff);
}

impl PartialEq for EntityName {
    fn eq(&self, other: &Self) -> bool {
        self.raw.eq_ignore_ascii_case(&other.raw)
    }
}

impl Eq for EntityName {}

impl Hash for EntityName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_ci(self.raw.as_str(), state);
    }
}

impl<'n> PartialEq for EntityNameRef<'n> {
    fn eq(&self, other: &Self) -> bool {
        self.raw.eq_ignore_ascii_case(other.raw.as_str())
    }
}

impl<'n> Eq for EntityNameRef<'n> {}

impl<'n> Hash for EntityNameRef<'n> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_ci(self.raw.as_str(), state);
    }
}

impl<'n> Equivalent<EntityName> for EntityNameRef<'n> {
    /// Enables heterogeneous lookup in [`hashbrown::HashMap`] and related types.
    fn equivalent(&self, key: &EntityName) -> bool {
        key.as_ref() == *self
    }
}

impl<'n> Equivalent<EntityNameRef<'n>> for EntityName {
    /// Enables heterogeneous lookup in [`hashbrown::HashMap`] and related types.
    fn equivalent(&self, key: &EntityNameRef) -> bool {
        *key == self.as_ref()
    }
}

impl From<&str> for EntityName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl Display for EntityName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.raw.fmt(f)
    }
}

impl<'n> Display for EntityNameRef<'n> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.raw.fmt(f)
    }
}
