//! The client settings service: owns each arena's base settings packet plus
//! the arena-wide and per-player override layers, loads the packet from the
//! arena's config scope, and materializes the masked merge on demand.

use itertools::Itertools;
use rand::Rng;
use sw_schemas::settings::identifier::{
    resolve_identifier, ClientSettingIdentifier, BITSET_FIELDS, BYTE_SETTING_KEYS,
    INT16_SETTING_KEYS, INT32_SETTING_KEYS, PRIZE_WEIGHT_KEYS, SHIP_BYTE_KEYS, SHIP_INT16_KEYS,
    SHIP_INT32_KEYS, SHIP_MISC_BITS, SHIP_WEAPON_BITS,
};
use sw_schemas::settings::overrides::{merge_settings, OverrideLayer};
use sw_schemas::settings::packet::{
    SettingsPacket, PRIZE_WEIGHT_COUNT, SHIP_COUNT, SPAWN_POSITION_COUNT,
};
use sw_schemas::settings::prizes::PrizeWeights;
use tracing::{debug, info};

use crate::config::ConfigScope;
use crate::entity::{
    ArenaHandle, ArenaManager, ExtraData, ExtraSlotKey, PlayerHandle, PlayerManager, PlayerStatus,
};
use crate::net::{NetworkLink, SendFlags};
use crate::prelude::*;

/// The five damage fields the client expects pre-multiplied by 1000.
static DAMAGE_KEYS_SCALED: [(&str, &str); 5] = [
    ("Bullet", "BulletDamageLevel"),
    ("Bomb", "BombDamageLevel"),
    ("Bullet", "BulletDamageUpgrade"),
    ("Burst", "BurstDamageLevel"),
    ("Shrapnel", "ShrapnelDamagePercent"),
];

/// Settings that crash legacy clients at zero; loaded values are raised to 1.
static COERCED_NONZERO_KEYS: [(&str, &str); 3] = [
    ("Misc", "SendPositionDelay"),
    ("Radar", "MapZoomFactor"),
    ("Prize", "PrizeNegativeFactor"),
];

/// Per-arena settings state, kept in an arena extra-data slot.
#[derive(Default)]
pub struct ArenaSettingsData {
    base: SettingsPacket,
    overrides: OverrideLayer,
    prizes: PrizeWeights,
    loaded: bool,
    conf_rx: Option<AsyncWatchReceiver<ConfigScope>>,
}

impl ExtraData for ArenaSettingsData {
    fn try_reset(&mut self) -> bool {
        *self = Self::default();
        true
    }
}

/// Per-player settings state, kept in a player extra-data slot.
#[derive(Default)]
pub struct PlayerSettingsData {
    overrides: OverrideLayer,
    /// The last materialized (merged) packet sent to this player.
    current: Option<SettingsPacket>,
}

impl ExtraData for PlayerSettingsData {
    fn try_reset(&mut self) -> bool {
        *self = Self::default();
        true
    }
}

/// The settings service. All methods are called on the mainloop thread.
pub struct ClientSettings {
    arena_slot: ExtraSlotKey<ArenaSettingsData>,
    player_slot: ExtraSlotKey<PlayerSettingsData>,
    players: Arc<PlayerManager>,
    arenas: Arc<ArenaManager>,
    net: Arc<dyn NetworkLink>,
}

impl ClientSettings {
    /// Allocates the settings extra-data slots and wires the transport.
    pub fn new(
        players: Arc<PlayerManager>,
        arenas: Arc<ArenaManager>,
        net: Arc<dyn NetworkLink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            arena_slot: arenas.allocate_slot::<ArenaSettingsData>(),
            player_slot: players.allocate_slot::<PlayerSettingsData>(),
            players,
            arenas,
            net,
        })
    }

    /// Resolves a config `(section, key)` pair to its bit-precise location,
    /// `None` when the pair does not name a client setting.
    pub fn setting_identifier(&self, section: &str, key: &str) -> Option<ClientSettingIdentifier> {
        resolve_identifier(section, key)
    }

    /// Loads (or reloads) the arena's base packet and prize weights from its
    /// config scope. Called on arena creation.
    pub fn load_arena(&self, arena: &ArenaHandle) {
        let mut guard = arena.write().unwrap();
        // subscribe before reading so an update racing the load still shows
        // up on the next poll
        let conf_rx = guard.config.subscribe();
        let (packet, prizes) = {
            let scope = guard.config.current();
            build_packet(&scope)
        };
        let name = guard.name.clone();
        let Some(data) = guard.extra.get_mut(self.arena_slot) else {
            return;
        };
        data.base = packet;
        data.prizes = prizes;
        data.loaded = true;
        data.conf_rx = Some(conf_rx);
        info!(arena = %name, "client settings loaded");
    }

    /// Checks every arena's config subscription and reloads the ones that
    /// changed; driven by a mainloop timer.
    pub fn poll_config_changes(&self) {
        for arena in self.arenas.snapshot() {
            let changed = {
                let mut guard = arena.write().unwrap();
                match guard.extra.get_mut(self.arena_slot).and_then(|d| d.conf_rx.as_mut()) {
                    Some(rx) => {
                        let changed = rx.has_changed().unwrap_or(false);
                        if changed {
                            rx.mark_unchanged();
                        }
                        changed
                    }
                    None => false,
                }
            };
            if changed {
                self.arena_conf_changed(&arena);
            }
        }
    }

    /// Reloads the arena's packet after a config change. When the bytes
    /// actually differ and `Misc.SendUpdatedSettings` allows it, the new
    /// packet is pushed to every playing player in the arena.
    pub fn arena_conf_changed(&self, arena: &ArenaHandle) {
        let (differs, push) = {
            let mut guard = arena.write().unwrap();
            let (packet, prizes) = {
                let scope = guard.config.current();
                build_packet(&scope)
            };
            let push = guard.config.current().get_bool("Misc", "SendUpdatedSettings", true);
            let Some(data) = guard.extra.get_mut(self.arena_slot) else {
                return;
            };
            let differs = !data.loaded || data.base != packet;
            data.base = packet;
            data.prizes = prizes;
            data.loaded = true;
            (differs, push)
        };
        if !(differs && push) {
            return;
        }

        let targets = self
            .players
            .snapshot()
            .into_iter()
            .filter(|p| {
                let guard = p.read().unwrap();
                guard.status == PlayerStatus::Playing
                    && guard.arena.as_ref().is_some_and(|a| Arc::ptr_eq(a, arena))
            })
            .collect_vec();
        for player in targets {
            self.send_to_player(&player);
        }
    }

    /// Materializes `merge(base, arena override, player override)` for the
    /// player and transmits it reliably. No-op for players outside an arena
    /// whose settings have loaded.
    pub fn send_to_player(&self, player: &PlayerHandle) {
        let mut pguard = player.write().unwrap();
        let player_id = pguard.id;
        let Some(arena) = pguard.arena.clone() else {
            return;
        };
        let aguard = arena.read().unwrap();
        let Some(adata) = aguard.extra.get(self.arena_slot) else {
            return;
        };
        if !adata.loaded {
            debug!(player = %player_id, "settings not loaded yet, send skipped");
            return;
        }
        let Some(pdata) = pguard.extra.get_mut(self.player_slot) else {
            return;
        };
        let merged = merge_settings(&adata.base, &adata.overrides, &pdata.overrides);
        pdata.current = Some(merged);
        self.net
            .send_to_player(player_id, merged.as_bytes(), SendFlags::RELIABLE);
    }

    /// Checksum of the player's last-materialized settings against `seed`,
    /// `None` before the first send.
    pub fn checksum(&self, player: &PlayerHandle, seed: u32) -> Option<u32> {
        let guard = player.read().unwrap();
        let data = guard.extra.get(self.player_slot)?;
        data.current.as_ref().map(|packet| packet.checksum(seed))
    }

    /// Draws a weighted random prize id for the arena.
    pub fn random_prize(&self, arena: &ArenaHandle) -> u8 {
        let guard = arena.read().unwrap();
        match guard.extra.get(self.arena_slot) {
            Some(data) => data.prizes.sample(&mut rand::thread_rng()),
            None => 0,
        }
    }

    /// Variant of [`Self::random_prize`] with a caller-supplied generator.
    pub fn random_prize_with<R: Rng + ?Sized>(&self, arena: &ArenaHandle, rng: &mut R) -> u8 {
        let guard = arena.read().unwrap();
        match guard.extra.get(self.arena_slot) {
            Some(data) => data.prizes.sample(rng),
            None => 0,
        }
    }

    /// Stages an arena-wide override. Affects packets materialized after the
    /// next send.
    pub fn override_arena_setting(
        &self,
        arena: &ArenaHandle,
        id: &ClientSettingIdentifier,
        value: i32,
    ) -> bool {
        let mut guard = arena.write().unwrap();
        match guard.extra.get_mut(self.arena_slot) {
            Some(data) => {
                data.overrides.set(id, value);
                true
            }
            None => false,
        }
    }

    /// Removes an arena-wide override.
    pub fn unoverride_arena_setting(&self, arena: &ArenaHandle, id: &ClientSettingIdentifier) -> bool {
        let mut guard = arena.write().unwrap();
        match guard.extra.get_mut(self.arena_slot) {
            Some(data) => {
                data.overrides.clear(id);
                true
            }
            None => false,
        }
    }

    /// The staged arena override value, if active.
    pub fn arena_setting_override(
        &self,
        arena: &ArenaHandle,
        id: &ClientSettingIdentifier,
    ) -> Option<i32> {
        let guard = arena.read().unwrap();
        guard.extra.get(self.arena_slot)?.overrides.get(id)
    }

    /// Stages a player-specific override.
    pub fn override_player_setting(
        &self,
        player: &PlayerHandle,
        id: &ClientSettingIdentifier,
        value: i32,
    ) -> bool {
        let mut guard = player.write().unwrap();
        match guard.extra.get_mut(self.player_slot) {
            Some(data) => {
                data.overrides.set(id, value);
                true
            }
            None => false,
        }
    }

    /// Removes a player-specific override.
    pub fn unoverride_player_setting(
        &self,
        player: &PlayerHandle,
        id: &ClientSettingIdentifier,
    ) -> bool {
        let mut guard = player.write().unwrap();
        match guard.extra.get_mut(self.player_slot) {
            Some(data) => {
                data.overrides.clear(id);
                true
            }
            None => false,
        }
    }

    /// The staged player override value, if active.
    pub fn player_setting_override(
        &self,
        player: &PlayerHandle,
        id: &ClientSettingIdentifier,
    ) -> Option<i32> {
        let guard = player.read().unwrap();
        guard.extra.get(self.player_slot)?.overrides.get(id)
    }

    /// The effective value the arena serves for `id` (base plus arena
    /// override), before any player layer.
    pub fn arena_setting(&self, arena: &ArenaHandle, id: &ClientSettingIdentifier) -> Option<i32> {
        let guard = arena.read().unwrap();
        let data = guard.extra.get(self.arena_slot)?;
        Some(match data.overrides.get(id) {
            Some(value) => value,
            None => data.base.read_field(id),
        })
    }

    /// The effective value of `id` in the player's last-materialized packet
    /// (or a fresh merge when none has been sent yet).
    pub fn player_setting(&self, player: &PlayerHandle, id: &ClientSettingIdentifier) -> Option<i32> {
        let pguard = player.read().unwrap();
        let pdata = pguard.extra.get(self.player_slot)?;
        if let Some(current) = &pdata.current {
            return Some(current.read_field(id));
        }
        let arena = pguard.arena.clone()?;
        let aguard = arena.read().unwrap();
        let adata = aguard.extra.get(self.arena_slot)?;
        Some(merge_settings(&adata.base, &adata.overrides, &pdata.overrides).read_field(id))
    }
}

fn ship_value(scope: &ConfigScope, ship_section: &str, key: &str) -> i32 {
    // per-ship value, falling back to the [All] section
    match scope.get_str(ship_section, key) {
        Some(raw) => raw.trim().parse().unwrap_or(0),
        None => scope.get_int("All", key, 0),
    }
}

/// Builds the base packet and prize table from one config scope.
fn build_packet(scope: &ConfigScope) -> (SettingsPacket, PrizeWeights) {
    let mut packet = SettingsPacket::default();
    packet.init_type();

    for &(section, key, _, _) in BITSET_FIELDS.iter() {
        if let Some(id) = resolve_identifier(section, key) {
            packet.write_field(&id, scope.get_int(section, key, 0));
        }
    }

    for ship in 0..SHIP_COUNT {
        let section = format!("Ship{ship}");
        let plain_keys = SHIP_INT32_KEYS
            .iter()
            .chain(SHIP_INT16_KEYS.iter())
            .chain(SHIP_BYTE_KEYS.iter());
        for key in plain_keys {
            if let Some(id) = resolve_identifier(&section, key) {
                packet.write_field(&id, ship_value(scope, &section, key));
            }
        }
        for &(key, _, _) in SHIP_WEAPON_BITS.iter().chain(SHIP_MISC_BITS.iter()) {
            if let Some(id) = resolve_identifier(&section, key) {
                packet.write_field(&id, ship_value(scope, &section, key));
            }
        }
    }

    for (index, &(section, key)) in INT32_SETTING_KEYS.iter().enumerate() {
        let mut value = scope.get_int(section, key, 0);
        if DAMAGE_KEYS_SCALED.contains(&(section, key)) {
            value = value.saturating_mul(1000);
        }
        packet.set_int32_setting(index, value);
    }

    for (index, &(section, key)) in INT16_SETTING_KEYS.iter().enumerate() {
        let mut value = scope.get_int(section, key, 0);
        if COERCED_NONZERO_KEYS.contains(&(section, key)) {
            value = value.max(1);
        }
        packet.set_int16_setting(index, value as i16);
    }

    for (index, &(section, key)) in BYTE_SETTING_KEYS.iter().enumerate() {
        packet.set_byte_setting(index, scope.get_int(section, key, 0) as u8);
    }

    for team in 0..SPAWN_POSITION_COUNT {
        let x = scope.get_int("Spawn", &format!("Team{team}-X"), 0) as u16;
        let y = scope.get_int("Spawn", &format!("Team{team}-Y"), 0) as u16;
        let radius = scope.get_int("Spawn", &format!("Team{team}-Radius"), 0) as u16;
        packet.set_spawn_position(team, x, y, radius);
    }

    let mut packet_weights = [0u8; PRIZE_WEIGHT_COUNT];
    for (index, key) in PRIZE_WEIGHT_KEYS.iter().enumerate() {
        packet_weights[index] = scope.get_int("PrizeWeight", key, 0) as u8;
        packet.set_prize_weight(index + 1, packet_weights[index]);
    }

    let prizes = if scope.get_bool("Prize", "UseDeathPrizeWeights", false) {
        let null_weight = scope.get_int("DPrizeWeight", "NullPrize", 0).max(0) as u32;
        let mut death_weights = [0u8; PRIZE_WEIGHT_COUNT];
        for (index, key) in PRIZE_WEIGHT_KEYS.iter().enumerate() {
            death_weights[index] = scope.get_int("DPrizeWeight", key, 0) as u8;
        }
        PrizeWeights::from_weights(null_weight, &death_weights)
    } else {
        PrizeWeights::from_weights(0, &packet_weights)
    };

    (packet, prizes)
}

#[cfg(test)]
mod test {
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use sw_schemas::settings::identifier::SettingFieldKind;
    use sw_schemas::settings::packet::{SETTINGS_PACKET_LEN, SETTINGS_PACKET_TYPE};

    use super::*;
    use crate::config::ConfigHandle;
    use crate::entity::ArenaStatus;
    use crate::net::RecordingLink;

    struct Fixture {
        players: Arc<PlayerManager>,
        arenas: Arc<ArenaManager>,
        net: Arc<RecordingLink>,
        settings: Arc<ClientSettings>,
    }

    impl Fixture {
        fn new() -> Self {
            let players = PlayerManager::new();
            let arenas = ArenaManager::new();
            let net = Arc::new(RecordingLink::default());
            let settings = ClientSettings::new(
                Arc::clone(&players),
                Arc::clone(&arenas),
                Arc::clone(&net) as Arc<dyn NetworkLink>,
            );
            Self {
                players,
                arenas,
                net,
                settings,
            }
        }

        fn arena(&self, scope: ConfigScope) -> ArenaHandle {
            let arena = self.arenas.create("turf", ConfigHandle::new(scope));
            arena.write().unwrap().status = ArenaStatus::Running;
            self.settings.load_arena(&arena);
            arena
        }

        fn playing_player(&self, name: &str, arena: &ArenaHandle) -> PlayerHandle {
            let player = self.players.connect(name, true);
            {
                let mut guard = player.write().unwrap();
                guard.status = PlayerStatus::Playing;
                guard.arena = Some(Arc::clone(arena));
            }
            player
        }
    }

    #[test]
    pub fn settings_round_trip_with_overrides() {
        let fixture = Fixture::new();
        let mut scope = ConfigScope::new();
        scope.set("Ship0", "InitialBombs", "2");
        let arena = fixture.arena(scope);
        let player = fixture.playing_player("Alpha", &arena);

        let id = fixture.settings.setting_identifier("Ship0", "InitialBombs").unwrap();
        assert!(!id.signed);
        assert_eq!(id.kind, SettingFieldKind::Bit32);
        assert_eq!((id.byte_offset, id.bit_offset, id.bit_length), (32, 22, 2));

        fixture.settings.send_to_player(&player);
        assert_eq!(fixture.settings.player_setting(&player, &id), Some(2));

        assert!(fixture.settings.override_player_setting(&player, &id, 3));
        fixture.settings.send_to_player(&player);
        assert_eq!(fixture.settings.player_setting(&player, &id), Some(3));
        assert_eq!(fixture.settings.player_setting_override(&player, &id), Some(3));

        assert!(fixture.settings.unoverride_player_setting(&player, &id));
        fixture.settings.send_to_player(&player);
        assert_eq!(fixture.settings.player_setting(&player, &id), Some(2));
        assert_eq!(fixture.settings.player_setting_override(&player, &id), None);

        // three sends, each a full reliable settings packet
        let sent = fixture.net.drain();
        assert_eq!(sent.len(), 3);
        for (_, bytes, flags) in &sent {
            assert_eq!(bytes.len(), SETTINGS_PACKET_LEN);
            assert_eq!(bytes[0], SETTINGS_PACKET_TYPE);
            assert!(flags.contains(SendFlags::RELIABLE));
        }
    }

    #[test]
    pub fn arena_overrides_lose_to_player_overrides() {
        let fixture = Fixture::new();
        let mut scope = ConfigScope::new();
        scope.set("Ship1", "MaxGuns", "1");
        let arena = fixture.arena(scope);
        let player = fixture.playing_player("Alpha", &arena);
        let id = fixture.settings.setting_identifier("Ship1", "MaxGuns").unwrap();

        fixture.settings.override_arena_setting(&arena, &id, 2);
        fixture.settings.send_to_player(&player);
        assert_eq!(fixture.settings.player_setting(&player, &id), Some(2));
        assert_eq!(fixture.settings.arena_setting(&arena, &id), Some(2));

        fixture.settings.override_player_setting(&player, &id, 3);
        fixture.settings.send_to_player(&player);
        assert_eq!(fixture.settings.player_setting(&player, &id), Some(3));

        fixture.settings.unoverride_arena_setting(&arena, &id);
        assert_eq!(fixture.settings.arena_setting(&arena, &id), Some(1));
    }

    #[test]
    pub fn damage_fields_scale_and_zero_crashers_coerce() {
        let fixture = Fixture::new();
        let mut scope = ConfigScope::new();
        scope.set("Bullet", "BulletDamageLevel", "5");
        let arena = fixture.arena(scope);

        let damage = fixture
            .settings
            .setting_identifier("Bullet", "BulletDamageLevel")
            .unwrap();
        assert_eq!(fixture.settings.arena_setting(&arena, &damage), Some(5000));

        // unset zero-crash fields come out as 1, not 0
        for (section, key) in COERCED_NONZERO_KEYS.iter() {
            let id = fixture.settings.setting_identifier(section, key).unwrap();
            assert_eq!(fixture.settings.arena_setting(&arena, &id), Some(1), "{section}:{key}");
        }
    }

    #[test]
    pub fn config_change_pushes_updated_settings() {
        let fixture = Fixture::new();
        let arena = fixture.arena(ConfigScope::new());
        let player = fixture.playing_player("Alpha", &arena);
        fixture.settings.send_to_player(&player);
        fixture.net.drain();

        let config = arena.read().unwrap().config.clone();
        config.update(|scope| scope.set("Bomb", "BombDamageLevel", "9"));
        fixture.settings.poll_config_changes();

        let sent = fixture.net.drain();
        assert_eq!(sent.len(), 1, "one playing player gets the new packet");
        let id = fixture.settings.setting_identifier("Bomb", "BombDamageLevel").unwrap();
        assert_eq!(fixture.settings.player_setting(&player, &id), Some(9000));

        // an update that leaves the packet bytes identical pushes nothing
        config.update(|scope| scope.set("Bomb", "BombDamageLevel", "9"));
        fixture.settings.poll_config_changes();
        assert!(fixture.net.drain().is_empty());
    }

    #[test]
    pub fn checksum_tracks_the_materialized_packet() {
        let fixture = Fixture::new();
        let arena = fixture.arena(ConfigScope::new());
        let player = fixture.playing_player("Alpha", &arena);

        assert_eq!(fixture.settings.checksum(&player, 7), None);
        fixture.settings.send_to_player(&player);
        let before = fixture.settings.checksum(&player, 7).unwrap();

        let id = fixture.settings.setting_identifier("Ship0", "MaxBombs").unwrap();
        fixture.settings.override_player_setting(&player, &id, 3);
        fixture.settings.send_to_player(&player);
        assert_ne!(fixture.settings.checksum(&player, 7).unwrap(), before);
    }

    #[test]
    pub fn prize_draws_follow_the_arena_weights() {
        let fixture = Fixture::new();
        let mut scope = ConfigScope::new();
        // prize id 3 is the third entry of the table
        scope.set("PrizeWeight", PRIZE_WEIGHT_KEYS[2], "7");
        scope.set("PrizeWeight", PRIZE_WEIGHT_KEYS[9], "3");
        let arena = fixture.arena(scope);

        let mut rng = StdRng::seed_from_u64(0xfeed);
        let mut hits = [0u32; 29];
        for _ in 0..10_000 {
            hits[fixture.settings.random_prize_with(&arena, &mut rng) as usize] += 1;
        }
        for (id, &count) in hits.iter().enumerate() {
            match id {
                3 | 10 => assert!(count > 0),
                _ => assert_eq!(count, 0, "prize id {id}"),
            }
        }
        let frac3 = hits[3] as f64 / 10_000.0;
        assert!((frac3 - 0.7).abs() < 0.02);
    }
}
