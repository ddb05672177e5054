//! Configuration scopes.
//!
//! Config *files* are parsed elsewhere; the core only consumes tables of
//! `Section.Key → value` strings, one scope per arena plus one global scope.
//! Scopes are published through a watch channel so the mainloop can poll for
//! config-changed events without blocking the publisher.

use kstring::KString;
use smart_default::SmartDefault;
use sw_schemas::names::EntityName;

use crate::prelude::*;

#[derive(Clone, Eq, PartialEq, Hash, Debug)]
struct ScopeKey {
    section: EntityName,
    key: EntityName,
}

impl ScopeKey {
    fn new(section: &str, key: &str) -> Self {
        Self {
            section: EntityName::new(section),
            key: EntityName::new(key),
        }
    }
}

/// One table of `Section.Key → value` settings. Section and key names are
/// ASCII-case-insensitive, values keep their spelling.
#[derive(Clone, Default, Debug)]
pub struct ConfigScope {
    values: HashMap<ScopeKey, KString>,
}

impl ConfigScope {
    /// Constructs an empty scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `section.key` to the given raw value.
    pub fn set(&mut self, section: &str, key: &str, value: &str) {
        self.values.insert(ScopeKey::new(section, key), KString::from_ref(value));
    }

    /// Removes `section.key`, returning whether it was present.
    pub fn remove(&mut self, section: &str, key: &str) -> bool {
        self.values.remove(&ScopeKey::new(section, key)).is_some()
    }

    /// The raw value of `section.key`, if set.
    pub fn get_str(&self, section: &str, key: &str) -> Option<&str> {
        self.values.get(&ScopeKey::new(section, key)).map(KString::as_str)
    }

    /// Integer value of `section.key`; missing or unparseable values yield
    /// the default.
    pub fn get_int(&self, section: &str, key: &str, default: i32) -> i32 {
        match self.get_str(section, key) {
            Some(raw) => raw.trim().parse().unwrap_or(default),
            None => default,
        }
    }

    /// Boolean value of `section.key`. Accepts `1/0`, `yes/no`, `on/off`,
    /// `true/false` in any case; anything else yields the default.
    pub fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        match self.get_str(section, key).map(str::trim) {
            Some(raw) => {
                if raw.eq_ignore_ascii_case("1")
                    || raw.eq_ignore_ascii_case("yes")
                    || raw.eq_ignore_ascii_case("on")
                    || raw.eq_ignore_ascii_case("true")
                {
                    true
                } else if raw.eq_ignore_ascii_case("0")
                    || raw.eq_ignore_ascii_case("no")
                    || raw.eq_ignore_ascii_case("off")
                    || raw.eq_ignore_ascii_case("false")
                {
                    false
                } else {
                    default
                }
            }
            None => default,
        }
    }
}

/// A shared handle to a live config scope. Cloning the handle shares the
/// underlying scope; updates are visible to every holder and wake change
/// subscribers.
#[derive(Clone)]
pub struct ConfigHandle {
    tx: Arc<AsyncWatchSender<ConfigScope>>,
}

impl ConfigHandle {
    /// Publishes the given scope under a fresh handle.
    pub fn new(scope: ConfigScope) -> Self {
        let (tx, _rx) = async_watch_channel(scope);
        Self { tx: Arc::new(tx) }
    }

    /// Reads the current scope. Do not hold the returned guard across
    /// blocking calls; it pins the publisher.
    pub fn current(&self) -> tokio::sync::watch::Ref<'_, ConfigScope> {
        self.tx.borrow()
    }

    /// Applies an edit to the scope and wakes change subscribers.
    pub fn update<F: FnOnce(&mut ConfigScope)>(&self, edit: F) {
        self.tx.send_modify(edit);
    }

    /// Subscribes to change notifications, for `has_changed` polling.
    pub fn subscribe(&self) -> AsyncWatchReceiver<ConfigScope> {
        self.tx.subscribe()
    }
}

impl Default for ConfigHandle {
    fn default() -> Self {
        Self::new(ConfigScope::default())
    }
}

/// Settings of the persist subsystem, read from the global scope.
#[derive(Copy, Clone, Eq, PartialEq, Debug, SmartDefault)]
pub struct PersistConfig {
    /// Seconds between periodic full syncs (`Persist.SyncSeconds`, min 10).
    #[default(180)]
    pub sync_seconds: u32,
    /// Contractual cap on one record blob (`Persist.MaxRecordLength`).
    #[default(4096)]
    pub max_record_length: usize,
}

impl PersistConfig {
    /// Minimum allowed full-sync period.
    pub const MIN_SYNC_SECONDS: u32 = 10;

    /// Reads the persist options from the global scope.
    pub fn from_scope(scope: &ConfigScope) -> Self {
        let defaults = Self::default();
        let sync = scope.get_int("Persist", "SyncSeconds", defaults.sync_seconds as i32);
        let max_len = scope.get_int("Persist", "MaxRecordLength", defaults.max_record_length as i32);
        Self {
            sync_seconds: (sync.max(Self::MIN_SYNC_SECONDS as i32)) as u32,
            max_record_length: max_len.max(0) as usize,
        }
    }
}
