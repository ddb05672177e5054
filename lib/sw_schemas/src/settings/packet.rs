//! The fixed binary layout of the client settings packet and bit-precise
//! accessors over it.
//!
//! The packet is kept as one plain byte array rather than sixty nominal
//! structs; every logical field is addressed through a
//! [`ClientSettingIdentifier`](super::identifier::ClientSettingIdentifier)
//! naming its byte offset, bit offset and bit length. All multi-byte fields
//! are little-endian.

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;

use super::identifier::{ClientSettingIdentifier, SettingFieldKind};

/// The S2C packet type id of the settings packet.
pub const SETTINGS_PACKET_TYPE: u8 = 0x0F;

/// Total packet length in bytes.
pub const SETTINGS_PACKET_LEN: usize = 428;
/// Packet length in 32-bit words, the granularity of the override merge.
pub const SETTINGS_PACKET_WORDS: usize = SETTINGS_PACKET_LEN / 4;

/// Number of per-ship settings blocks.
pub const SHIP_COUNT: usize = 8;
/// Length of one per-ship settings block.
pub const SHIP_BLOCK_LEN: usize = 36;
/// int32 settings per ship block.
pub const SHIP_INT32_COUNT: usize = 2;
/// int16 settings per ship block.
pub const SHIP_INT16_COUNT: usize = 8;
/// byte settings per ship block.
pub const SHIP_BYTE_COUNT: usize = 4;

/// Global int32 settings.
pub const INT32_COUNT: usize = 8;
/// Global int16 settings.
pub const INT16_COUNT: usize = 20;
/// Global byte settings.
pub const BYTE_COUNT: usize = 20;
/// Per-team spawn position words.
pub const SPAWN_POSITION_COUNT: usize = 4;
/// Prize weight bytes (prize ids 1..=28).
pub const PRIZE_WEIGHT_COUNT: usize = 28;

/// Byte offset of the packed type/flags word.
pub const BITSET_OFFSET: usize = 0;
/// Byte offset of the first ship block.
pub const SHIPS_OFFSET: usize = 4;
/// Byte offset of the global int32 settings array.
pub const INT32_OFFSET: usize = SHIPS_OFFSET + SHIP_COUNT * SHIP_BLOCK_LEN;
/// Byte offset of the packed spawn position words.
pub const SPAWN_OFFSET: usize = INT32_OFFSET + 4 * INT32_COUNT;
/// Byte offset of the global int16 settings array.
pub const INT16_OFFSET: usize = SPAWN_OFFSET + 4 * SPAWN_POSITION_COUNT;
/// Byte offset of the global byte settings array.
pub const BYTE_OFFSET: usize = INT16_OFFSET + 2 * INT16_COUNT;
/// Byte offset of the prize weight array.
pub const PRIZE_WEIGHT_OFFSET: usize = BYTE_OFFSET + BYTE_COUNT;

// Offsets inside one ship block.
/// Ship-relative byte offset of the int32 settings.
pub const SHIP_INT32_REL: usize = 0;
/// Ship-relative byte offset of the int16 settings.
pub const SHIP_INT16_REL: usize = SHIP_INT32_REL + 4 * SHIP_INT32_COUNT;
/// Ship-relative byte offset of the byte settings.
pub const SHIP_BYTE_REL: usize = SHIP_INT16_REL + 2 * SHIP_INT16_COUNT;
/// Ship-relative byte offset of the `Weapons` bitfield word.
pub const SHIP_WEAPONS_REL: usize = SHIP_BYTE_REL + SHIP_BYTE_COUNT;
/// Ship-relative byte offset of the `MiscBits` bitfield word.
pub const SHIP_MISC_REL: usize = SHIP_WEAPONS_REL + 4;

// The client merges overrides in 32-bit words, so the layout must stay
// word-aligned and word-sized.
const_assert_eq!(SETTINGS_PACKET_LEN % 4, 0);
const_assert_eq!(SHIP_BLOCK_LEN % 4, 0);
const_assert_eq!(SHIP_MISC_REL + 4, SHIP_BLOCK_LEN);
const_assert_eq!(SHIPS_OFFSET % 4, 0);
const_assert_eq!(INT32_OFFSET % 4, 0);
const_assert_eq!(SPAWN_OFFSET % 4, 0);
const_assert_eq!(INT16_OFFSET % 2, 0);
const_assert_eq!(PRIZE_WEIGHT_OFFSET + PRIZE_WEIGHT_COUNT, SETTINGS_PACKET_LEN);

/// Byte offset of the given ship's settings block.
pub const fn ship_offset(ship: usize) -> usize {
    SHIPS_OFFSET + ship * SHIP_BLOCK_LEN
}

/// The settings packet payload as sent to the client.
///
/// A freshly zeroed packet is not valid to send; the packed type byte has to
/// be written first (the loader does this through [`Self::init_type`]).
#[repr(transparent)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct SettingsPacket([u8; SETTINGS_PACKET_LEN]);

impl Default for SettingsPacket {
    fn default() -> Self {
        Zeroable::zeroed()
    }
}

impl PartialEq for SettingsPacket {
    fn eq(&self, other: &Self) -> bool {
        self.0[..] == other.0[..]
    }
}

impl Eq for SettingsPacket {}

impl std::fmt::Debug for SettingsPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SettingsPacket[{} bytes]", SETTINGS_PACKET_LEN)
    }
}

impl SettingsPacket {
    /// Views the raw packet bytes.
    pub fn as_bytes(&self) -> &[u8; SETTINGS_PACKET_LEN] {
        &self.0
    }

    /// Mutable view of the raw packet bytes.
    pub fn as_bytes_mut(&mut self) -> &mut [u8; SETTINGS_PACKET_LEN] {
        &mut self.0
    }

    /// Writes the packet type id into the packed type/flags word.
    pub fn init_type(&mut self) {
        self.0[BITSET_OFFSET] = SETTINGS_PACKET_TYPE;
    }

    /// Reads the byte at `offset`.
    pub fn read_u8(&self, offset: usize) -> u8 {
        self.0[offset]
    }

    /// Writes the byte at `offset`.
    pub fn write_u8(&mut self, offset: usize, value: u8) {
        self.0[offset] = value;
    }

    /// Reads the little-endian u16 at `offset`.
    pub fn read_u16(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.0[offset], self.0[offset + 1]])
    }

    /// Writes the little-endian u16 at `offset`.
    pub fn write_u16(&mut self, offset: usize, value: u16) {
        self.0[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    /// Reads the little-endian u32 at `offset`.
    pub fn read_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes([
            self.0[offset],
            self.0[offset + 1],
            self.0[offset + 2],
            self.0[offset + 3],
        ])
    }

    /// Writes the little-endian u32 at `offset`.
    pub fn write_u32(&mut self, offset: usize, value: u32) {
        self.0[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Reads the `index`-th 32-bit merge word.
    pub fn word(&self, index: usize) -> u32 {
        self.read_u32(index * 4)
    }

    /// Writes the `index`-th 32-bit merge word.
    pub fn set_word(&mut self, index: usize, value: u32) {
        self.write_u32(index * 4, value);
    }

    // Typed writers used by the settings loader.

    /// Sets the `index`-th global int32 setting.
    pub fn set_int32_setting(&mut self, index: usize, value: i32) {
        debug_assert!(index < INT32_COUNT);
        self.write_u32(INT32_OFFSET + 4 * index, value as u32);
    }

    /// Reads the `index`-th global int32 setting.
    pub fn int32_setting(&self, index: usize) -> i32 {
        debug_assert!(index < INT32_COUNT);
        self.read_u32(INT32_OFFSET + 4 * index) as i32
    }

    /// Sets the `index`-th global int16 setting.
    pub fn set_int16_setting(&mut self, index: usize, value: i16) {
        debug_assert!(index < INT16_COUNT);
        self.write_u16(INT16_OFFSET + 2 * index, value as u16);
    }

    /// Reads the `index`-th global int16 setting.
    pub fn int16_setting(&self, index: usize) -> i16 {
        debug_assert!(index < INT16_COUNT);
        self.read_u16(INT16_OFFSET + 2 * index) as i16
    }

    /// Sets the `index`-th global byte setting.
    pub fn set_byte_setting(&mut self, index: usize, value: u8) {
        debug_assert!(index < BYTE_COUNT);
        self.write_u8(BYTE_OFFSET + index, value);
    }

    /// Sets the weight byte for prize id `prize` (1..=28).
    pub fn set_prize_weight(&mut self, prize: usize, value: u8) {
        debug_assert!((1..=PRIZE_WEIGHT_COUNT).contains(&prize));
        self.write_u8(PRIZE_WEIGHT_OFFSET + (prize - 1), value);
    }

    /// Packs one team's spawn position as `X:10 | Y:10 | Radius:9`.
    pub fn set_spawn_position(&mut self, team: usize, x: u16, y: u16, radius: u16) {
        debug_assert!(team < SPAWN_POSITION_COUNT);
        let packed =
            (x as u32 & 0x3ff) | ((y as u32 & 0x3ff) << 10) | ((radius as u32 & 0x1ff) << 20);
        self.write_u32(SPAWN_OFFSET + 4 * team, packed);
    }

    /// Reads the field addressed by `id`, sign-extending when the identifier
    /// is marked signed.
    pub fn read_field(&self, id: &ClientSettingIdentifier) -> i32 {
        let word = self.containing_word(id);
        let raw = (word >> id.bit_offset) & id.value_mask();
        // Shift the field's sign bit up to bit 31, then shift back down
        // arithmetically or logically depending on signedness.
        let shift = 32 - id.bit_length as u32;
        let up = raw.wrapping_shl(shift);
        if id.signed {
            (up as i32).wrapping_shr(shift)
        } else {
            up.wrapping_shr(shift) as i32
        }
    }

    /// Writes `value` into the field addressed by `id`, truncating it to the
    /// field's bit length.
    pub fn write_field(&mut self, id: &ClientSettingIdentifier, value: i32) {
        let mask = id.word_mask();
        let bits = ((value as u32) << id.bit_offset) & mask;
        let w = self.containing_word(id);
        self.set_containing_word(id, (w & !mask) | bits);
    }

    /// Reads the whole `Bit8`/`Bit16`/`Bit32` word the identifier lives in,
    /// zero-extended to 32 bits.
    pub fn containing_word(&self, id: &ClientSettingIdentifier) -> u32 {
        let offset = id.byte_offset as usize;
        match id.kind {
            SettingFieldKind::Bit8 => self.read_u8(offset) as u32,
            SettingFieldKind::Bit16 => self.read_u16(offset) as u32,
            SettingFieldKind::Bit32 => self.read_u32(offset),
        }
    }

    /// Writes the whole word the identifier lives in, truncated to its width.
    pub fn set_containing_word(&mut self, id: &ClientSettingIdentifier, value: u32) {
        let offset = id.byte_offset as usize;
        match id.kind {
            SettingFieldKind::Bit8 => self.write_u8(offset, value as u8),
            SettingFieldKind::Bit16 => self.write_u16(offset, value as u16),
            SettingFieldKind::Bit32 => self.write_u32(offset, value),
        }
    }

    /// Computes the packet checksum against the given seed: the wrapping sum
    /// of every 32-bit word xor'd with the seed. Must match the client's
    /// computation bit for bit.
    pub fn checksum(&self, seed: u32) -> u32 {
        let mut sum = 0u32;
        for i in 0..SETTINGS_PACKET_WORDS {
            sum = sum.wrapping_add(self.word(i) ^ seed);
        }
        sum
    }
}
