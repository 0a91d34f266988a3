//! The ref store: the only mutable state in a hoard.
//!
//! One root ref (`HEAD`) plus three per-cave refs (`current`, `staging`,
//! `desired`), each naming an immutable tree in the
//! [object store](crate::store). Single writer; every reconciliation
//! step commits all of its ref moves in one transaction, `HEAD` last.

use anyhow::{Context, Result};
use camino::Utf8Path;
use jiff::Timestamp;
use rusqlite::{Connection, OptionalExtension};
use rustc_hash::FxHashMap;

use crate::hashing::ObjectId;

/// The three per-cave pointers.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct CaveRefs {
    /// What the cave physically has, last time the engine observed it
    pub current: Option<ObjectId>,
    /// What the cave's scanner last reported
    pub staging: Option<ObjectId>,
    /// What the engine wants the cave to eventually hold
    pub desired: Option<ObjectId>,
}

/// Everything the store knows about one cave.
#[derive(Debug, Default, Clone)]
pub struct CaveState {
    pub refs: CaveRefs,
    /// Last accepted scanner epoch; pulls that don't advance it are skipped
    pub epoch: u64,
    /// The staging ID the last accepted pull saw
    pub last_pulled: Option<ObjectId>,
    /// When the last accepted pull happened
    pub updated: Option<Timestamp>,
}

/// A consistent point-in-time read of every ref, taken at plan start.
#[derive(Debug, Default, Clone)]
pub struct RefSnapshot {
    pub head: Option<ObjectId>,
    pub caves: FxHashMap<String, CaveState>,
}

impl RefSnapshot {
    pub fn cave(&self, uuid: &str) -> CaveState {
        self.caves.get(uuid).cloned().unwrap_or_default()
    }
}

#[derive(Debug)]
pub struct RefStore {
    conn: Connection,
}

const HEAD: &str = "HEAD";

impl RefStore {
    pub fn open(path: &Utf8Path) -> Result<Self> {
        let conn =
            Connection::open(path).with_context(|| format!("Couldn't open ref store {path}"))?;
        let jm: String = conn.query_row("PRAGMA journal_mode=wal", (), |r| r.get(0))?;
        assert_eq!(jm, "wal");
        Self::new(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    fn new(mut conn: Connection) -> Result<Self> {
        let tx = conn.transaction()?;
        let ver: i32 = tx.query_row("PRAGMA user_version", (), |r| r.get(0))?;
        if ver < 1 {
            tx.execute(
                "CREATE TABLE refs (
                    name TEXT NOT NULL PRIMARY KEY,
                    id BLOB NOT NULL
                ) STRICT",
                (),
            )?;
            tx.execute(
                "CREATE TABLE caves (
                    uuid TEXT NOT NULL PRIMARY KEY,
                    epoch INTEGER NOT NULL DEFAULT 0,
                    last_pulled BLOB,
                    updated TEXT
                ) STRICT",
                (),
            )?;
        }
        tx.execute("PRAGMA user_version=1", ())?;
        tx.commit()?;
        Ok(Self { conn })
    }

    fn read_ref(&self, name: &str) -> Result<Option<ObjectId>> {
        let id: Option<Vec<u8>> = self
            .conn
            .query_row("SELECT id FROM refs WHERE name = ?1", [name], |r| r.get(0))
            .optional()?;
        id.map(|bytes| ObjectId::from_bytes(&bytes)).transpose()
    }

    pub fn head(&self) -> Result<Option<ObjectId>> {
        self.read_ref(HEAD)
    }

    pub fn cave_refs(&self, uuid: &str) -> Result<CaveRefs> {
        Ok(CaveRefs {
            current: self.read_ref(&format!("{uuid}.current"))?,
            staging: self.read_ref(&format!("{uuid}.staging"))?,
            desired: self.read_ref(&format!("{uuid}.desired"))?,
        })
    }

    pub fn cave_state(&self, uuid: &str) -> Result<CaveState> {
        let row: Option<(u64, Option<Vec<u8>>, Option<String>)> = self
            .conn
            .query_row(
                "SELECT epoch, last_pulled, updated FROM caves WHERE uuid = ?1",
                [uuid],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;
        let (epoch, last_pulled, updated) = row.unwrap_or_default();
        Ok(CaveState {
            refs: self.cave_refs(uuid)?,
            epoch,
            last_pulled: last_pulled
                .map(|bytes| ObjectId::from_bytes(&bytes))
                .transpose()?,
            updated: updated.map(|s| s.parse()).transpose()?,
        })
    }

    /// Reads every cave in one go so a whole plan works off one view.
    pub fn snapshot<'a>(&self, uuids: impl IntoIterator<Item = &'a str>) -> Result<RefSnapshot> {
        let mut caves = FxHashMap::default();
        for uuid in uuids {
            caves.insert(uuid.to_owned(), self.cave_state(uuid)?);
        }
        Ok(RefSnapshot {
            head: self.head()?,
            caves,
        })
    }

    pub fn transaction(&mut self) -> Result<RefTxn<'_>> {
        let tx = self.conn.transaction()?;
        Ok(RefTxn { tx, head: None })
    }
}

/// Groups ref moves; everything lands atomically on [`RefTxn::commit`],
/// with `HEAD` written last.
pub struct RefTxn<'a> {
    tx: rusqlite::Transaction<'a>,
    head: Option<Option<ObjectId>>,
}

impl RefTxn<'_> {
    fn write_ref(&self, name: &str, id: Option<ObjectId>) -> Result<()> {
        match id {
            Some(id) => {
                self.tx.execute(
                    "REPLACE INTO refs(name, id) VALUES (?1, ?2)",
                    (name, id.as_bytes()),
                )?;
            }
            None => {
                self.tx.execute("DELETE FROM refs WHERE name = ?1", [name])?;
            }
        }
        Ok(())
    }

    pub fn set_head(&mut self, id: ObjectId) {
        self.head = Some(Some(id));
    }

    pub fn set_current(&self, uuid: &str, id: Option<ObjectId>) -> Result<()> {
        self.write_ref(&format!("{uuid}.current"), id)
    }

    pub fn set_staging(&self, uuid: &str, id: Option<ObjectId>) -> Result<()> {
        self.write_ref(&format!("{uuid}.staging"), id)
    }

    pub fn set_desired(&self, uuid: &str, id: Option<ObjectId>) -> Result<()> {
        self.write_ref(&format!("{uuid}.desired"), id)
    }

    /// Bumps just the epoch; the cave side uses this to version scans.
    pub fn set_epoch(&self, uuid: &str, epoch: u64) -> Result<()> {
        self.tx.execute(
            "INSERT INTO caves(uuid, epoch) VALUES (?1, ?2)
             ON CONFLICT(uuid) DO UPDATE SET epoch = excluded.epoch",
            (uuid, epoch),
        )?;
        Ok(())
    }

    pub fn record_pull(&self, uuid: &str, epoch: u64, staging: ObjectId) -> Result<()> {
        self.tx.execute(
            "REPLACE INTO caves(uuid, epoch, last_pulled, updated) VALUES (?1, ?2, ?3, ?4)",
            (
                uuid,
                epoch,
                staging.as_bytes(),
                Timestamp::now().to_string(),
            ),
        )?;
        Ok(())
    }

    pub fn commit(self) -> Result<()> {
        if let Some(head) = self.head {
            self.write_ref(HEAD, head)?;
        }
        self.tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn refs_move_atomically() -> Result<()> {
        let mut store = RefStore::in_memory()?;
        let a = ObjectId::hash(b"a");
        let b = ObjectId::hash(b"b");

        {
            let mut txn = store.transaction()?;
            txn.set_current("u1", Some(a))?;
            txn.set_desired("u1", Some(b))?;
            txn.set_head(b);
            txn.commit()?;
        }
        assert_eq!(store.head()?, Some(b));
        let refs = store.cave_refs("u1")?;
        assert_eq!(refs.current, Some(a));
        assert_eq!(refs.desired, Some(b));
        assert_eq!(refs.staging, None);

        // An aborted transaction moves nothing.
        {
            let mut txn = store.transaction()?;
            txn.set_current("u1", None)?;
            txn.set_head(a);
            // Dropped.
        }
        assert_eq!(store.head()?, Some(b));
        assert_eq!(store.cave_refs("u1")?.current, Some(a));
        Ok(())
    }

    #[test]
    fn epochs_default_to_zero() -> Result<()> {
        let mut store = RefStore::in_memory()?;
        assert_eq!(store.cave_state("nobody")?.epoch, 0);

        let staging = ObjectId::hash(b"staging");
        let txn = store.transaction()?;
        txn.record_pull("u1", 3, staging)?;
        txn.commit()?;

        let state = store.cave_state("u1")?;
        assert_eq!(state.epoch, 3);
        assert_eq!(state.last_pulled, Some(staging));
        assert!(state.updated.is_some());
        Ok(())
    }
}
