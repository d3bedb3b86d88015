//! Tile storage for the Merkle audit tree.
//!
//! A tile is a contiguous run of up to 256 leaf hashes. The store is a
//! get/put capability so verifiers and tests can run in memory while the
//! session persists through SQLite.

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;

/// Get/put capability over tile blobs keyed by tile index.
pub trait TileStore {
    fn get(&self, tile_index: u64) -> Result<Option<Vec<u8>>>;
    fn put(&mut self, tile_index: u64, bytes: &[u8]) -> Result<()>;
}

/// In-memory tile store for tests and ephemeral sessions.
#[derive(Clone, Debug, Default)]
pub struct InMemoryTileStore {
    tiles: BTreeMap<u64, Vec<u8>>,
}

impl TileStore for InMemoryTileStore {
    fn get(&self, tile_index: u64) -> Result<Option<Vec<u8>>> {
        Ok(self.tiles.get(&tile_index).cloned())
    }

    fn put(&mut self, tile_index: u64, bytes: &[u8]) -> Result<()> {
        self.tiles.insert(tile_index, bytes.to_vec());
        Ok(())
    }
}

/// SQLite-backed tile store.
pub struct SqliteTileStore {
    conn: Connection,
}

impl SqliteTileStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS merkle_tiles (
              tile_index INTEGER PRIMARY KEY,
              bytes BLOB NOT NULL
            );
            "#,
        )?;
        Ok(())
    }
}

impl TileStore for SqliteTileStore {
    fn get(&self, tile_index: u64) -> Result<Option<Vec<u8>>> {
        let tile_index = i64::try_from(tile_index)
            .map_err(|_| anyhow!("tile_index exceeds i64 range: {}", tile_index))?;
        let mut stmt = self
            .conn
            .prepare("SELECT bytes FROM merkle_tiles WHERE tile_index = ?1")?;
        let bytes: Option<Vec<u8>> = stmt
            .query_row(params![tile_index], |row| row.get(0))
            .optional()?;
        Ok(bytes)
    }

    fn put(&mut self, tile_index: u64, bytes: &[u8]) -> Result<()> {
        let tile_index = i64::try_from(tile_index)
            .map_err(|_| anyhow!("tile_index exceeds i64 range: {}", tile_index))?;
        self.conn.execute(
            "INSERT INTO merkle_tiles(tile_index, bytes) VALUES (?1, ?2)
             ON CONFLICT(tile_index) DO UPDATE SET bytes = excluded.bytes",
            params![tile_index, bytes],
        )?;
        Ok(())
    }
}
