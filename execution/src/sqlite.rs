use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

use crate::state::{Key, Memory, State, Status, Value};

/// SQLite-backed [`State`]. Each applied change set is one transaction.
pub struct Sqlite {
    conn: Connection,
}

impl Sqlite {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("open state db")?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory state db")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        init_schema_sqlite(&conn)?;
        Ok(Self { conn })
    }
}

fn init_schema_sqlite(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         CREATE TABLE IF NOT EXISTS state (
             key TEXT PRIMARY KEY,
             value TEXT NOT NULL
         );",
    )
    .context("init state schema")?;
    Ok(())
}

fn encode_key(key: &Key) -> Result<String> {
    serde_json::to_string(key).context("encode key")
}

impl State for Sqlite {
    fn get(&self, key: &Key) -> Result<Option<Value>> {
        let encoded = encode_key(key)?;
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM state WHERE key = ?",
                params![encoded],
                |row| row.get(0),
            )
            .optional()
            .context("read state row")?;
        raw.map(|raw| serde_json::from_str(&raw).context("decode state value"))
            .transpose()
    }

    fn insert(&mut self, key: Key, value: Value) -> Result<()> {
        let encoded = encode_key(&key)?;
        let value = serde_json::to_string(&value).context("encode state value")?;
        self.conn
            .execute(
                "INSERT OR REPLACE INTO state (key, value) VALUES (?, ?)",
                params![encoded, value],
            )
            .context("write state row")?;
        Ok(())
    }

    fn delete(&mut self, key: &Key) -> Result<()> {
        let encoded = encode_key(key)?;
        self.conn
            .execute("DELETE FROM state WHERE key = ?", params![encoded])
            .context("delete state row")?;
        Ok(())
    }

    fn apply(&mut self, changes: Vec<(Key, Status)>) -> Result<()> {
        let tx = self.conn.transaction().context("begin state transaction")?;
        for (key, status) in changes {
            let encoded = encode_key(&key)?;
            match status {
                Status::Update(value) => {
                    let value = serde_json::to_string(&value).context("encode state value")?;
                    tx.execute(
                        "INSERT OR REPLACE INTO state (key, value) VALUES (?, ?)",
                        params![encoded, value],
                    )
                    .context("write state row")?;
                }
                Status::Delete => {
                    tx.execute("DELETE FROM state WHERE key = ?", params![encoded])
                        .context("delete state row")?;
                }
            }
        }
        tx.commit().context("commit state transaction")?;
        Ok(())
    }
}

/// Storage selected at runtime by the service configuration.
pub enum Backend {
    Memory(Memory),
    Sqlite(Sqlite),
}

impl State for Backend {
    fn get(&self, key: &Key) -> Result<Option<Value>> {
        match self {
            Backend::Memory(state) => state.get(key),
            Backend::Sqlite(state) => state.get(key),
        }
    }

    fn insert(&mut self, key: Key, value: Value) -> Result<()> {
        match self {
            Backend::Memory(state) => state.insert(key, value),
            Backend::Sqlite(state) => state.insert(key, value),
        }
    }

    fn delete(&mut self, key: &Key) -> Result<()> {
        match self {
            Backend::Memory(state) => state.delete(key),
            Backend::Sqlite(state) => state.delete(key),
        }
    }

    fn apply(&mut self, changes: Vec<(Key, Status)>) -> Result<()> {
        match self {
            Backend::Memory(state) => state.apply(changes),
            Backend::Sqlite(state) => state.apply(changes),
        }
    }
}
