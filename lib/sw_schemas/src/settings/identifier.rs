//! Resolution of config `(section, key)` pairs to bit-precise locations in
//! the settings packet.
//!
//! The tables here are the single source of truth for which named setting
//! lives where; the loader walks them to populate a packet from config, and
//! override commands use them to address individual fields.

use super::packet::{
    ship_offset, BITSET_OFFSET, BYTE_COUNT, BYTE_OFFSET, INT16_COUNT, INT16_OFFSET, INT32_COUNT,
    INT32_OFFSET, PRIZE_WEIGHT_COUNT, PRIZE_WEIGHT_OFFSET, SHIP_BYTE_COUNT, SHIP_BYTE_REL,
    SHIP_COUNT, SHIP_INT16_COUNT, SHIP_INT16_REL, SHIP_INT32_COUNT, SHIP_INT32_REL, SHIP_MISC_REL,
    SHIP_WEAPONS_REL, SPAWN_OFFSET, SPAWN_POSITION_COUNT,
};

/// The storage width of the word a setting lives in.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SettingFieldKind {
    /// A single byte.
    Bit8,
    /// A little-endian 16-bit word.
    Bit16,
    /// A little-endian 32-bit word.
    Bit32,
}

/// Addresses any field of the settings packet, including bit-packed
/// sub-fields of the bitfield words.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ClientSettingIdentifier {
    /// Whether reads sign-extend the extracted bits.
    pub signed: bool,
    /// Width of the containing word.
    pub kind: SettingFieldKind,
    /// Byte offset of the containing word from the start of the packet.
    pub byte_offset: u16,
    /// First bit of the field within the containing word.
    pub bit_offset: u8,
    /// Number of bits in the field.
    pub bit_length: u8,
}

impl ClientSettingIdentifier {
    const fn i32_at(byte_offset: usize) -> Self {
        Self {
            signed: true,
            kind: SettingFieldKind::Bit32,
            byte_offset: byte_offset as u16,
            bit_offset: 0,
            bit_length: 32,
        }
    }

    const fn i16_at(byte_offset: usize) -> Self {
        Self {
            signed: true,
            kind: SettingFieldKind::Bit16,
            byte_offset: byte_offset as u16,
            bit_offset: 0,
            bit_length: 16,
        }
    }

    const fn u8_at(byte_offset: usize) -> Self {
        Self {
            signed: false,
            kind: SettingFieldKind::Bit8,
            byte_offset: byte_offset as u16,
            bit_offset: 0,
            bit_length: 8,
        }
    }

    const fn bits32_at(byte_offset: usize, bit_offset: u8, bit_length: u8) -> Self {
        Self {
            signed: false,
            kind: SettingFieldKind::Bit32,
            byte_offset: byte_offset as u16,
            bit_offset,
            bit_length,
        }
    }

    /// Mask of the field's value bits, right-aligned.
    pub fn value_mask(&self) -> u32 {
        if self.bit_length >= 32 {
            u32::MAX
        } else {
            (1u32 << self.bit_length) - 1
        }
    }

    /// Mask of the field's bits in its containing word.
    pub fn word_mask(&self) -> u32 {
        self.value_mask() << self.bit_offset
    }
}

/// Per-ship int32 setting keys, in packet order.
pub static SHIP_INT32_KEYS: [&str; SHIP_INT32_COUNT] = ["SuperTime", "ShieldsTime"];

/// Per-ship int16 setting keys, in packet order.
pub static SHIP_INT16_KEYS: [&str; SHIP_INT16_COUNT] = [
    "Gravity",
    "GravityTopSpeed",
    "BulletFireEnergy",
    "MultiFireEnergy",
    "BombFireEnergy",
    "MaximumEnergy",
    "InitialSpeed",
    "MaximumSpeed",
];

/// Per-ship byte setting keys, in packet order.
pub static SHIP_BYTE_KEYS: [&str; SHIP_BYTE_COUNT] =
    ["TurretLimit", "BurstShrapnel", "MaxMines", "RepelMax"];

/// Sub-fields of the per-ship `Weapons` bitfield word: `(key, bit offset, bit length)`.
pub static SHIP_WEAPON_BITS: [(&str, u8, u8); 13] = [
    ("ShrapnelMax", 0, 5),
    ("ShrapnelRate", 5, 5),
    ("CloakStatus", 10, 2),
    ("StealthStatus", 12, 2),
    ("XRadarStatus", 14, 2),
    ("AntiWarpStatus", 16, 2),
    ("InitialGuns", 18, 2),
    ("MaxGuns", 20, 2),
    ("InitialBombs", 22, 2),
    ("MaxBombs", 24, 2),
    ("DoubleBarrel", 26, 1),
    ("EmpBomb", 27, 1),
    ("SeeMines", 28, 1),
];

/// Sub-fields of the per-ship `MiscBits` bitfield word: `(key, bit offset, bit length)`.
pub static SHIP_MISC_BITS: [(&str, u8, u8); 3] = [
    ("SeeBombLevel", 0, 2),
    ("DisableFastShooting", 2, 1),
    ("Radius", 3, 8),
];

/// Global int32 settings: `(section, key)`, in packet order.
pub static INT32_SETTING_KEYS: [(&str, &str); INT32_COUNT] = [
    ("Bullet", "BulletDamageLevel"),
    ("Bomb", "BombDamageLevel"),
    ("Bullet", "BulletDamageUpgrade"),
    ("Burst", "BurstDamageLevel"),
    ("Shrapnel", "ShrapnelDamagePercent"),
    ("Prize", "EngineShutdownTime"),
    ("Door", "DoorDelay"),
    ("Toggle", "AntiWarpPixels"),
];

/// Global int16 settings: `(section, key)`, in packet order.
pub static INT16_SETTING_KEYS: [(&str, &str); INT16_COUNT] = [
    ("Latency", "SendRoutePercent"),
    ("Bomb", "BombExplodeDelay"),
    ("Misc", "SendPositionDelay"),
    ("Bomb", "BombExplodePixels"),
    ("Prize", "DeathPrizeTime"),
    ("Flag", "EnterGameFlaggingDelay"),
    ("Bullet", "BulletAliveTime"),
    ("Bomb", "BombAliveTime"),
    ("Misc", "DecoyAliveTime"),
    ("Misc", "SafetyLimit"),
    ("Misc", "FrequencyShift"),
    ("Misc", "MaxFrequency"),
    ("Prize", "PrizeFactor"),
    ("Prize", "PrizeDelay"),
    ("Prize", "MinimumVirtual"),
    ("Prize", "UpgradeVirtual"),
    ("Prize", "PrizeMaxExist"),
    ("Prize", "PrizeMinExist"),
    ("Prize", "PrizeNegativeFactor"),
    ("Radar", "MapZoomFactor"),
];

/// Global byte settings: `(section, key)`, in packet order.
pub static BYTE_SETTING_KEYS: [(&str, &str); BYTE_COUNT] = [
    ("Shrapnel", "Random"),
    ("Soccer", "BallBounce"),
    ("Soccer", "AllowBombs"),
    ("Soccer", "AllowGuns"),
    ("Soccer", "PassDelay"),
    ("Soccer", "Mode"),
    ("Team", "MaxPerTeam"),
    ("Team", "MaxPerPrivateTeam"),
    ("Mine", "TeamMaxMines"),
    ("Wormhole", "GravityBombs"),
    ("Bomb", "BombSafety"),
    ("Message", "MessageReliable"),
    ("Prize", "TakePrizeReliable"),
    ("Message", "AllowAudioMessages"),
    ("Prize", "PrizeHideCount"),
    ("Misc", "ExtraPositionData"),
    ("Misc", "SlowFrameCheck"),
    ("Flag", "CarryFlags"),
    ("Misc", "AllowSavedShips"),
    ("Radar", "RadarMode"),
];

/// Flag fields packed into the leading type/flags word:
/// `(section, key, bit offset, bit length)`.
pub static BITSET_FIELDS: [(&str, &str, u8, u8); 8] = [
    ("Bullet", "ExactDamage", 8, 1),
    ("Spectator", "HideFlags", 9, 1),
    ("Spectator", "NoXRadar", 10, 1),
    ("Misc", "SlowFrameRate", 11, 3),
    ("Misc", "DisableScreenshot", 14, 1),
    ("Misc", "MaxTimerDrift", 15, 3),
    ("Soccer", "DisableBallThroughWalls", 18, 1),
    ("Soccer", "DisableBallKilling", 19, 1),
];

/// Prize weight keys for prize ids 1..=28, in packet order.
/// Also the key list of the `DPrizeWeight` section (which adds `NullPrize`).
pub static PRIZE_WEIGHT_KEYS: [&str; PRIZE_WEIGHT_COUNT] = [
    "Recharge",
    "Energy",
    "Rotation",
    "Stealth",
    "Cloak",
    "XRadar",
    "Warp",
    "Gun",
    "Bomb",
    "BouncingBullets",
    "Thruster",
    "TopSpeed",
    "QuickCharge",
    "Glue",
    "MultiFire",
    "Proximity",
    "AllWeapons",
    "Shields",
    "Shrapnel",
    "AntiWarp",
    "Repel",
    "Burst",
    "Decoy",
    "Thor",
    "MultiPrize",
    "Brick",
    "Rocket",
    "Portal",
];

/// Parses a `Ship0`..`Ship7` section name to a ship index.
pub fn parse_ship_section(section: &str) -> Option<usize> {
    let rest = strip_prefix_ci(section, "Ship")?;
    if rest.len() != 1 {
        return None;
    }
    let idx = (rest.as_bytes()[0] as char).to_digit(10)? as usize;
    (idx < SHIP_COUNT).then_some(idx)
}

fn strip_prefix_ci<'k>(s: &'k str, prefix: &str) -> Option<&'k str> {
    if s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

fn resolve_ship_key(ship: usize, key: &str) -> Option<ClientSettingIdentifier> {
    let base = ship_offset(ship);
    for (i, k) in SHIP_INT32_KEYS.iter().enumerate() {
        if key.eq_ignore_ascii_case(k) {
            return Some(ClientSettingIdentifier::i32_at(base + SHIP_INT32_REL + 4 * i));
        }
    }
    for (i, k) in SHIP_INT16_KEYS.iter().enumerate() {
        if key.eq_ignore_ascii_case(k) {
            return Some(ClientSettingIdentifier::i16_at(base + SHIP_INT16_REL + 2 * i));
        }
    }
    for (i, k) in SHIP_BYTE_KEYS.iter().enumerate() {
        if key.eq_ignore_ascii_case(k) {
            return Some(ClientSettingIdentifier::u8_at(base + SHIP_BYTE_REL + i));
        }
    }
    for (k, bit, len) in SHIP_WEAPON_BITS.iter() {
        if key.eq_ignore_ascii_case(k) {
            return Some(ClientSettingIdentifier::bits32_at(base + SHIP_WEAPONS_REL, *bit, *len));
        }
    }
    for (k, bit, len) in SHIP_MISC_BITS.iter() {
        if key.eq_ignore_ascii_case(k) {
            return Some(ClientSettingIdentifier::bits32_at(base + SHIP_MISC_REL, *bit, *len));
        }
    }
    None
}

fn resolve_spawn_key(key: &str) -> Option<ClientSettingIdentifier> {
    let rest = strip_prefix_ci(key, "Team")?;
    let mut parts = rest.splitn(2, '-');
    let team: usize = parts.next()?.parse().ok()?;
    if team >= SPAWN_POSITION_COUNT {
        return None;
    }
    let offset = SPAWN_OFFSET + 4 * team;
    let field = parts.next()?;
    if field.eq_ignore_ascii_case("X") {
        return Some(ClientSettingIdentifier::bits32_at(offset, 0, 10));
    }
    if field.eq_ignore_ascii_case("Y") {
        return Some(ClientSettingIdentifier::bits32_at(offset, 10, 10));
    }
    if field.eq_ignore_ascii_case("Radius") {
        return Some(ClientSettingIdentifier::bits32_at(offset, 20, 9));
    }
    None
}

/// Resolves a config `(section, key)` pair to its location in the packet.
/// Returns `None` when the pair does not name a client setting.
pub fn resolve_identifier(section: &str, key: &str) -> Option<ClientSettingIdentifier> {
    if let Some(ship) = parse_ship_section(section) {
        return resolve_ship_key(ship, key);
    }
    if section.eq_ignore_ascii_case("Spawn") {
        return resolve_spawn_key(key);
    }
    if section.eq_ignore_ascii_case("PrizeWeight") {
        for (i, k) in PRIZE_WEIGHT_KEYS.iter().enumerate() {
            if key.eq_ignore_ascii_case(k) {
                return Some(ClientSettingIdentifier::u8_at(PRIZE_WEIGHT_OFFSET + i));
            }
        }
        return None;
    }
    for (s, k, bit, len) in BITSET_FIELDS.iter() {
        if section.eq_ignore_ascii_case(s) && key.eq_ignore_ascii_case(k) {
            return Some(ClientSettingIdentifier::bits32_at(BITSET_OFFSET, *bit, *len));
        }
    }
    for (i, (s, k)) in INT32_SETTING_KEYS.iter().enumerate() {
        if section.eq_ignore_ascii_case(s) && key.eq_ignore_ascii_case(k) {
            return Some(ClientSettingIdentifier::i32_at(INT32_OFFSET + 4 * i));
        }
    }
    for (i, (s, k)) in INT16_SETTING_KEYS.iter().enumerate() {
        if section.eq_ignore_ascii_case(s) && key.eq_ignore_ascii_case(k) {
            return Some(ClientSettingIdentifier::i16_at(INT16_OFFSET + 2 * i));
        }
    }
    for (i, (s, k)) in BYTE_SETTING_KEYS.iter().enumerate() {
        if section.eq_ignore_ascii_case(s) && key.eq_ignore_ascii_case(k) {
            return Some(ClientSettingIdentifier::u8_at(BYTE_OFFSET + i));
        }
    }
    None
}
