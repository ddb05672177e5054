//! Override layers: a `(data, mask)` buffer pair bitwise aligned to the
//! settings packet, and the masked merge that materializes the packet a
//! player actually receives.

use super::identifier::ClientSettingIdentifier;
use super::packet::{SettingsPacket, SETTINGS_PACKET_WORDS};

/// One override layer. A mask bit of 1 means "override active"; the data
/// buffer holds the override value at that bit. Arenas carry one layer for
/// everyone plus one per player.
#[derive(Copy, Clone, Default, Eq, PartialEq)]
pub struct OverrideLayer {
    data: SettingsPacket,
    mask: SettingsPacket,
}

impl OverrideLayer {
    /// Stages `value` as the override for the field addressed by `id` and
    /// marks the field's bits active.
    pub fn set(&mut self, id: &ClientSettingIdentifier, value: i32) {
        self.data.write_field(id, value);
        let mask_word = self.mask.containing_word(id);
        self.mask.set_containing_word(id, mask_word | id.word_mask());
    }

    /// Deactivates the override for the field addressed by `id`.
    /// The staged data bits are left behind; only the mask decides activity.
    pub fn clear(&mut self, id: &ClientSettingIdentifier) {
        let mask_word = self.mask.containing_word(id);
        self.mask.set_containing_word(id, mask_word & !id.word_mask());
    }

    /// The staged override value, or `None` unless every bit of the field is
    /// marked active.
    pub fn get(&self, id: &ClientSettingIdentifier) -> Option<i32> {
        let mask_word = self.mask.containing_word(id);
        if mask_word & id.word_mask() == id.word_mask() {
            Some(self.data.read_field(id))
        } else {
            None
        }
    }

    /// Deactivates every override in the layer.
    pub fn clear_all(&mut self) {
        self.mask = SettingsPacket::default();
    }

    /// Whether no override is active.
    pub fn is_empty(&self) -> bool {
        self.mask.as_bytes().iter().all(|&b| b == 0)
    }

    /// The raw mask buffer.
    pub fn mask(&self) -> &SettingsPacket {
        &self.mask
    }
}

/// Merges the base packet with the arena-wide and player-specific override
/// layers, one 32-bit word at a time. Player bits win over arena bits, arena
/// bits win over the base.
pub fn merge_settings(
    base: &SettingsPacket,
    arena: &OverrideLayer,
    player: &OverrideLayer,
) -> SettingsPacket {
    let mut out = SettingsPacket::default();
    for i in 0..SETTINGS_PACKET_WORDS {
        let src = base.word(i);
        let am = arena.mask.word(i);
        let ad = arena.data.word(i);
        let pm = player.mask.word(i);
        let pd = player.data.word(i);
        out.set_word(i, (((src & !am) | (ad & am)) & !pm) | (pd & pm));
    }
    out
}

#[cfg(test)]
mod test {
    use quickcheck_macros::quickcheck;

    use super::super::identifier::{
        resolve_identifier, ClientSettingIdentifier, BITSET_FIELDS, BYTE_SETTING_KEYS,
        INT16_SETTING_KEYS, INT32_SETTING_KEYS, SHIP_MISC_BITS, SHIP_WEAPON_BITS,
    };
    use super::*;

    fn every_identifier() -> Vec<ClientSettingIdentifier> {
        let mut out = Vec::new();
        for ship in 0..8 {
            let section = format!("Ship{ship}");
            for (k, _, _) in SHIP_WEAPON_BITS.iter().chain(SHIP_MISC_BITS.iter()) {
                out.push(resolve_identifier(&section, k).unwrap());
            }
            out.push(resolve_identifier(&section, "SuperTime").unwrap());
            out.push(resolve_identifier(&section, "MaximumEnergy").unwrap());
            out.push(resolve_identifier(&section, "MaxMines").unwrap());
        }
        for (s, k) in INT32_SETTING_KEYS
            .iter()
            .chain(INT16_SETTING_KEYS.iter())
            .chain(BYTE_SETTING_KEYS.iter())
        {
            out.push(resolve_identifier(s, k).unwrap());
        }
        for (s, k, _, _) in BITSET_FIELDS.iter() {
            out.push(resolve_identifier(s, k).unwrap());
        }
        for team in 0..4 {
            for f in ["X", "Y", "Radius"] {
                out.push(resolve_identifier("Spawn", &format!("Team{team}-{f}")).unwrap());
            }
        }
        out
    }

    /// Truncate-then-extend reference for what a round trip must produce.
    fn expected_round_trip(id: &ClientSettingIdentifier, value: i32) -> i32 {
        let shift = 32 - id.bit_length as u32;
        let up = ((value as u32) & id.value_mask()).wrapping_shl(shift);
        if id.signed {
            (up as i32).wrapping_shr(shift)
        } else {
            up.wrapping_shr(shift) as i32
        }
    }

    #[quickcheck]
    pub fn override_round_trips_modulo_width(which: usize, value: i32) -> bool {
        let ids = every_identifier();
        let id = ids[which % ids.len()];
        let mut layer = OverrideLayer::default();
        layer.set(&id, value);
        layer.get(&id) == Some(expected_round_trip(&id, value))
    }

    #[quickcheck]
    pub fn merge_obeys_the_mask_law(which: usize, base_v: i32, arena_v: i32, player_v: i32) -> bool {
        let ids = every_identifier();
        let id = ids[which % ids.len()];

        let mut base = SettingsPacket::default();
        base.write_field(&id, base_v);

        let mut arena = OverrideLayer::default();
        let mut player = OverrideLayer::default();

        // no overrides: base wins
        let none = merge_settings(&base, &arena, &player);
        if none.read_field(&id) != base.read_field(&id) {
            return false;
        }

        // arena override wins over base
        arena.set(&id, arena_v);
        let a = merge_settings(&base, &arena, &player);
        if a.read_field(&id) != expected_round_trip(&id, arena_v) {
            return false;
        }

        // player override wins over both
        player.set(&id, player_v);
        let p = merge_settings(&base, &arena, &player);
        p.read_field(&id) == expected_round_trip(&id, player_v)
    }

    #[test]
    pub fn unoverride_restores_the_base_value() {
        let id = resolve_identifier("Ship0", "InitialBombs").unwrap();
        let mut base = SettingsPacket::default();
        base.write_field(&id, 2);

        let mut arena = OverrideLayer::default();
        arena.set(&id, 3);
        assert_eq!(merge_settings(&base, &arena, &OverrideLayer::default()).read_field(&id), 3);

        arena.clear(&id);
        assert!(arena.is_empty());
        assert_eq!(merge_settings(&base, &arena, &OverrideLayer::default()).read_field(&id), 2);
        assert_eq!(arena.get(&id), None);
    }

    #[test]
    pub fn sibling_bitfields_are_untouched() {
        let bombs = resolve_identifier("Ship2", "InitialBombs").unwrap();
        let guns = resolve_identifier("Ship2", "InitialGuns").unwrap();
        let mut base = SettingsPacket::default();
        base.write_field(&guns, 1);
        base.write_field(&bombs, 2);

        let mut arena = OverrideLayer::default();
        arena.set(&bombs, 3);
        let merged = merge_settings(&base, &arena, &OverrideLayer::default());
        assert_eq!(merged.read_field(&bombs), 3);
        assert_eq!(merged.read_field(&guns), 1);
    }
}
