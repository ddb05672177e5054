//! The synchronous relational backing store for persistent scores.
//!
//! One SQLite file holds arena groups, their interval *generations* and the
//! opaque data blobs keyed by `(player?, generation, key)`. Every method
//! here is called from the single persist worker thread; statements go
//! through the connection's prepared-statement cache, so each SQL text is
//! prepared once and reset after use.

use std::io::{Read, Write};
use std::path::Path;

use rusqlite::{params, Connection, DatabaseName, OptionalExtension};
use sw_schemas::persist::{PersistInterval, PersistKey};

use crate::prelude::*;

/// File name of the zone database inside the data directory.
pub static DATABASE_FILE_NAME: &str = "subwar.db";

/// Records at or below this size are bound inline; larger ones go through
/// `zeroblob` plus incremental blob I/O.
const BLOB_INLINE_MAX: usize = 512;

/// One row of `ArenaGroupInterval`: a time-bounded generation of a
/// `(group, interval)` pair.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IntervalGeneration {
    /// Generation id (`ArenaGroupIntervalId`).
    pub id: i64,
    /// Unix seconds the generation started.
    pub start_timestamp: i64,
    /// Unix seconds the generation was closed, `None` while current.
    pub end_timestamp: Option<i64>,
}

/// The SQLite-backed persist datastore.
pub struct PersistDatastore {
    conn: Connection,
}

impl PersistDatastore {
    /// Opens (creating the directory, database file and schema as needed)
    /// the zone database under `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("creating data directory {}", data_dir.display()))?;
        let path = data_dir.join(DATABASE_FILE_NAME);
        let conn = Connection::open(&path)
            .with_context(|| format!("opening zone database {}", path.display()))?;
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA_SQL).context("initializing the zone database schema")?;
        Ok(Self { conn })
    }

    /// Finalizes cached statements and releases the connection.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_conn, error)| error.into())
    }

    /// Opens an explicit transaction; the caller batches request handling
    /// inside it.
    pub fn begin_transaction(&self) -> Result<()> {
        self.conn.execute_batch("BEGIN IMMEDIATE").context("beginning a transaction")
    }

    /// Commits the open transaction.
    pub fn commit(&self) -> Result<()> {
        self.conn.execute_batch("COMMIT").context("committing a transaction")
    }

    /// Rolls the open transaction back.
    pub fn rollback(&self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK").context("rolling back a transaction")
    }

    fn group_id(&self, group: &str) -> Result<i64> {
        let mut select = self
            .conn
            .prepare_cached("SELECT ArenaGroupId FROM ArenaGroup WHERE GroupName = ?1")?;
        if let Some(id) = select.query_row([group], |row| row.get(0)).optional()? {
            return Ok(id);
        }
        let mut insert = self
            .conn
            .prepare_cached("INSERT INTO ArenaGroup (GroupName) VALUES (?1)")?;
        insert.execute([group])?;
        Ok(self.conn.last_insert_rowid())
    }

    fn player_id(&self, player_name: &str) -> Result<i64> {
        let mut select = self
            .conn
            .prepare_cached("SELECT PersistPlayerId FROM Player WHERE PlayerName = ?1")?;
        if let Some(id) = select.query_row([player_name], |row| row.get(0)).optional()? {
            return Ok(id);
        }
        let mut insert = self
            .conn
            .prepare_cached("INSERT INTO Player (PlayerName) VALUES (?1)")?;
        insert.execute([player_name])?;
        Ok(self.conn.last_insert_rowid())
    }

    /// The current generation id for `(group, interval)`, creating the
    /// group row and an open generation on demand.
    fn current_generation_id(&self, group: &str, interval: PersistInterval, now: i64) -> Result<i64> {
        let group_id = self.group_id(group)?;
        let mut select = self.conn.prepare_cached(
            "SELECT ArenaGroupIntervalId FROM CurrentArenaGroupInterval \
             WHERE ArenaGroupId = ?1 AND Interval = ?2",
        )?;
        if let Some(id) = select
            .query_row(params![group_id, interval.code()], |row| row.get(0))
            .optional()?
        {
            return Ok(id);
        }
        self.open_generation(group_id, interval, now)
    }

    /// Inserts a fresh generation starting at `now` and makes it current.
    fn open_generation(&self, group_id: i64, interval: PersistInterval, now: i64) -> Result<i64> {
        let mut insert = self.conn.prepare_cached(
            "INSERT INTO ArenaGroupInterval (ArenaGroupId, Interval, StartTimestamp) \
             VALUES (?1, ?2, ?3)",
        )?;
        insert.execute(params![group_id, interval.code(), now])?;
        let generation_id = self.conn.last_insert_rowid();
        let mut upsert = self.conn.prepare_cached(
            "INSERT INTO CurrentArenaGroupInterval (ArenaGroupId, Interval, ArenaGroupIntervalId) \
             VALUES (?1, ?2, ?3) \
             ON CONFLICT (ArenaGroupId, Interval) \
             DO UPDATE SET ArenaGroupIntervalId = excluded.ArenaGroupIntervalId",
        )?;
        upsert.execute(params![group_id, interval.code(), generation_id])?;
        Ok(generation_id)
    }

    /// Closes the current generation of `(group, interval)` at `now` and
    /// opens its successor starting at the same instant, all part of the
    /// caller's transaction. Returns the new generation id.
    pub fn create_interval_and_make_current(
        &self,
        group: &str,
        interval: PersistInterval,
        now: i64,
    ) -> Result<i64> {
        let group_id = self.group_id(group)?;
        let mut close = self.conn.prepare_cached(
            "UPDATE ArenaGroupInterval SET EndTimestamp = ?1 \
             WHERE ArenaGroupIntervalId = \
               (SELECT ArenaGroupIntervalId FROM CurrentArenaGroupInterval \
                WHERE ArenaGroupId = ?2 AND Interval = ?3)",
        )?;
        close.execute(params![now, group_id, interval.code()])?;
        self.open_generation(group_id, interval, now)
    }

    /// Reads one player record into `out` (cleared first).
    /// Returns whether a record existed.
    pub fn get_player_data(
        &self,
        player_name: &str,
        group: &str,
        interval: PersistInterval,
        key: PersistKey,
        now: i64,
        out: &mut Vec<u8>,
    ) -> Result<bool> {
        out.clear();
        let player_id = self.player_id(player_name)?;
        let generation_id = self.current_generation_id(group, interval, now)?;
        let mut select = self.conn.prepare_cached(
            "SELECT rowid FROM PlayerData \
             WHERE PersistPlayerId = ?1 AND ArenaGroupIntervalId = ?2 AND DataKey = ?3",
        )?;
        let rowid: Option<i64> = select
            .query_row(params![player_id, generation_id, key.0], |row| row.get(0))
            .optional()?;
        let Some(rowid) = rowid else {
            return Ok(false);
        };
        let mut blob = self
            .conn
            .blob_open(DatabaseName::Main, "PlayerData", "Data", rowid, true)?;
        blob.read_to_end(out)?;
        Ok(true)
    }

    /// Writes (inserting or replacing) one player record.
    pub fn set_player_data(
        &self,
        player_name: &str,
        group: &str,
        interval: PersistInterval,
        key: PersistKey,
        now: i64,
        data: &[u8],
    ) -> Result<()> {
        let player_id = self.player_id(player_name)?;
        let generation_id = self.current_generation_id(group, interval, now)?;
        if data.len() <= BLOB_INLINE_MAX {
            let mut upsert = self.conn.prepare_cached(
                "INSERT OR REPLACE INTO PlayerData \
                 (PersistPlayerId, ArenaGroupIntervalId, DataKey, Data) \
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            upsert.execute(params![player_id, generation_id, key.0, data])?;
        } else {
            let mut upsert = self.conn.prepare_cached(
                "INSERT OR REPLACE INTO PlayerData \
                 (PersistPlayerId, ArenaGroupIntervalId, DataKey, Data) \
                 VALUES (?1, ?2, ?3, zeroblob(?4))",
            )?;
            upsert.execute(params![player_id, generation_id, key.0, data.len()])?;
            let rowid = self.conn.last_insert_rowid();
            let mut blob = self
                .conn
                .blob_open(DatabaseName::Main, "PlayerData", "Data", rowid, false)?;
            blob.write_all(data)?;
        }
        Ok(())
    }

    /// Deletes one player record if present.
    pub fn delete_player_data(
        &self,
        player_name: &str,
        group: &str,
        interval: PersistInterval,
        key: PersistKey,
        now: i64,
    ) -> Result<()> {
        let player_id = self.player_id(player_name)?;
        let generation_id = self.current_generation_id(group, interval, now)?;
        let mut delete = self.conn.prepare_cached(
            "DELETE FROM PlayerData \
             WHERE PersistPlayerId = ?1 AND ArenaGroupIntervalId = ?2 AND DataKey = ?3",
        )?;
        delete.execute(params![player_id, generation_id, key.0])?;
        Ok(())
    }

    /// Reads one arena record into `out` (cleared first).
    /// Returns whether a record existed.
    pub fn get_arena_data(
        &self,
        group: &str,
        interval: PersistInterval,
        key: PersistKey,
        now: i64,
        out: &mut Vec<u8>,
    ) -> Result<bool> {
        out.clear();
        let generation_id = self.current_generation_id(group, interval, now)?;
        let mut select = self.conn.prepare_cached(
            "SELECT rowid FROM ArenaData WHERE ArenaGroupIntervalId = ?1 AND DataKey = ?2",
        )?;
        let rowid: Option<i64> = select
            .query_row(params![generation_id, key.0], |row| row.get(0))
            .optional()?;
        let Some(rowid) = rowid else {
            return Ok(false);
        };
        let mut blob = self
            .conn
            .blob_open(DatabaseName::Main, "ArenaData", "Data", rowid, true)?;
        blob.read_to_end(out)?;
        Ok(true)
    }

    /// Writes (inserting or replacing) one arena record.
    pub fn set_arena_data(
        &self,
        group: &str,
        interval: PersistInterval,
        key: PersistKey,
        now: i64,
        data: &[u8],
    ) -> Result<()> {
        let generation_id = self.current_generation_id(group, interval, now)?;
        if data.len() <= BLOB_INLINE_MAX {
            let mut upsert = self.conn.prepare_cached(
                "INSERT OR REPLACE INTO ArenaData (ArenaGroupIntervalId, DataKey, Data) \
                 VALUES (?1, ?2, ?3)",
            )?;
            upsert.execute(params![generation_id, key.0, data])?;
        } else {
            let mut upsert = self.conn.prepare_cached(
                "INSERT OR REPLACE INTO ArenaData (ArenaGroupIntervalId, DataKey, Data) \
                 VALUES (?1, ?2, zeroblob(?3))",
            )?;
            upsert.execute(params![generation_id, key.0, data.len()])?;
            let rowid = self.conn.last_insert_rowid();
            let mut blob = self
                .conn
                .blob_open(DatabaseName::Main, "ArenaData", "Data", rowid, false)?;
            blob.write_all(data)?;
        }
        Ok(())
    }

    /// Deletes one arena record if present.
    pub fn delete_arena_data(
        &self,
        group: &str,
        interval: PersistInterval,
        key: PersistKey,
        now: i64,
    ) -> Result<()> {
        let generation_id = self.current_generation_id(group, interval, now)?;
        let mut delete = self.conn.prepare_cached(
            "DELETE FROM ArenaData WHERE ArenaGroupIntervalId = ?1 AND DataKey = ?2",
        )?;
        delete.execute(params![generation_id, key.0])?;
        Ok(())
    }

    /// Deletes every arena and player record bound to the current `Game`
    /// generation of the group.
    pub fn reset_game_interval(&self, group: &str, now: i64) -> Result<()> {
        let generation_id = self.current_generation_id(group, PersistInterval::Game, now)?;
        let mut arena = self
            .conn
            .prepare_cached("DELETE FROM ArenaData WHERE ArenaGroupIntervalId = ?1")?;
        arena.execute([generation_id])?;
        let mut player = self
            .conn
            .prepare_cached("DELETE FROM PlayerData WHERE ArenaGroupIntervalId = ?1")?;
        player.execute([generation_id])?;
        Ok(())
    }

    /// The current generation of `(group, interval)`, if one exists.
    pub fn current_generation(
        &self,
        group: &str,
        interval: PersistInterval,
    ) -> Result<Option<IntervalGeneration>> {
        let mut select = self.conn.prepare_cached(
            "SELECT agi.ArenaGroupIntervalId, agi.StartTimestamp, agi.EndTimestamp \
             FROM CurrentArenaGroupInterval cur \
             JOIN ArenaGroupInterval agi USING (ArenaGroupIntervalId) \
             JOIN ArenaGroup ag ON ag.ArenaGroupId = cur.ArenaGroupId \
             WHERE ag.GroupName = ?1 AND cur.Interval = ?2",
        )?;
        Ok(select
            .query_row(params![group, interval.code()], |row| {
                Ok(IntervalGeneration {
                    id: row.get(0)?,
                    start_timestamp: row.get(1)?,
                    end_timestamp: row.get(2)?,
                })
            })
            .optional()?)
    }

    /// Looks one generation up by id.
    pub fn generation(&self, id: i64) -> Result<Option<IntervalGeneration>> {
        let mut select = self.conn.prepare_cached(
            "SELECT ArenaGroupIntervalId, StartTimestamp, EndTimestamp \
             FROM ArenaGroupInterval WHERE ArenaGroupIntervalId = ?1",
        )?;
        Ok(select
            .query_row([id], |row| {
                Ok(IntervalGeneration {
                    id: row.get(0)?,
                    start_timestamp: row.get(1)?,
                    end_timestamp: row.get(2)?,
                })
            })
            .optional()?)
    }
}

static SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS ArenaGroup (
    ArenaGroupId INTEGER PRIMARY KEY,
    GroupName TEXT NOT NULL UNIQUE COLLATE NOCASE
);
CREATE TABLE IF NOT EXISTS ArenaGroupInterval (
    ArenaGroupIntervalId INTEGER PRIMARY KEY,
    ArenaGroupId INTEGER NOT NULL REFERENCES ArenaGroup (ArenaGroupId),
    Interval INTEGER NOT NULL,
    StartTimestamp INTEGER NOT NULL,
    EndTimestamp INTEGER
);
CREATE INDEX IF NOT EXISTS IX_ArenaGroupInterval_ArenaGroupId
    ON ArenaGroupInterval (ArenaGroupId);
CREATE TABLE IF NOT EXISTS CurrentArenaGroupInterval (
    ArenaGroupId INTEGER NOT NULL REFERENCES ArenaGroup (ArenaGroupId),
    Interval INTEGER NOT NULL,
    ArenaGroupIntervalId INTEGER NOT NULL REFERENCES ArenaGroupInterval (ArenaGroupIntervalId),
    PRIMARY KEY (ArenaGroupId, Interval)
);
CREATE INDEX IF NOT EXISTS IX_CurrentArenaGroupInterval_ArenaGroupIntervalId
    ON CurrentArenaGroupInterval (ArenaGroupIntervalId);
CREATE TABLE IF NOT EXISTS Player (
    PersistPlayerId INTEGER PRIMARY KEY,
    PlayerName TEXT NOT NULL UNIQUE COLLATE NOCASE
);
CREATE TABLE IF NOT EXISTS ArenaData (
    ArenaGroupIntervalId INTEGER NOT NULL REFERENCES ArenaGroupInterval (ArenaGroupIntervalId),
    DataKey INTEGER NOT NULL,
    Data BLOB NOT NULL,
    PRIMARY KEY (ArenaGroupIntervalId, DataKey)
);
CREATE TABLE IF NOT EXISTS PlayerData (
    PersistPlayerId INTEGER NOT NULL REFERENCES Player (PersistPlayerId),
    ArenaGroupIntervalId INTEGER NOT NULL REFERENCES ArenaGroupInterval (ArenaGroupIntervalId),
    DataKey INTEGER NOT NULL,
    Data BLOB NOT NULL,
    PRIMARY KEY (PersistPlayerId, ArenaGroupIntervalId, DataKey)
);
CREATE INDEX IF NOT EXISTS IX_PlayerData_ArenaGroupIntervalId
    ON PlayerData (ArenaGroupIntervalId);
";
