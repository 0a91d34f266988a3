//! The object store: an append-only, content-addressed map of
//! [`ObjectId`] to [`Object`].
//!
//! Objects never change once written, so concurrent readers are always
//! consistent. The only thing that ever removes an ID is the
//! [GC sweep](crate::gc), which proves unreachability first.

use anyhow::{Context, Result, anyhow};
use camino::Utf8Path;
use rusqlite::{Connection, OptionalExtension};
use tracing::*;

use crate::hashing::ObjectId;
use crate::object::{FileEntry, Object, Tree};

#[derive(Debug)]
pub struct ObjectStore {
    conn: Connection,
}

impl ObjectStore {
    /// Opens (creating if needed) the store at the given path.
    pub fn open(path: &Utf8Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Couldn't open object store {path}"))?;
        let jm: String = conn.query_row("PRAGMA journal_mode=wal", (), |r| r.get(0))?;
        assert_eq!(jm, "wal");
        Self::new(conn)
    }

    /// An in-memory store, mostly for tests.
    pub fn in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    fn new(mut conn: Connection) -> Result<Self> {
        let tx = conn.transaction()?;
        let ver: i32 = tx.query_row("PRAGMA user_version", (), |r| r.get(0))?;
        if ver < 1 {
            tx.execute(
                "CREATE TABLE objects (
                    id BLOB NOT NULL PRIMARY KEY,
                    data BLOB NOT NULL
                ) STRICT",
                (),
            )?;
        }
        tx.execute("PRAGMA user_version=1", ())?;
        tx.commit()?;
        Ok(Self { conn })
    }

    /// Idempotently writes an object, returning its ID.
    pub fn put(&self, object: &Object) -> Result<ObjectId> {
        let (encoded, id) = object.encode_and_id();
        self.put_encoded(id, &encoded)
    }

    fn put_encoded(&self, id: ObjectId, encoded: &[u8]) -> Result<ObjectId> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO objects(id, data) VALUES (?1, ?2)",
            (id.as_bytes(), encoded),
        )?;
        if inserted > 0 {
            trace!("wrote {id}");
        }
        Ok(id)
    }

    pub fn get(&self, id: &ObjectId) -> Result<Option<Object>> {
        let data: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT data FROM objects WHERE id = ?1",
                [id.as_bytes()],
                |r| r.get(0),
            )
            .optional()?;
        match data {
            None => Ok(None),
            Some(data) => {
                let object =
                    Object::decode(&data).with_context(|| format!("Couldn't decode {id}"))?;
                Ok(Some(object))
            }
        }
    }

    pub fn has(&self, id: &ObjectId) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM objects WHERE id = ?1",
                [id.as_bytes()],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Reads a tree, failing loudly if the ID refers to anything else.
    ///
    /// A ref pointing at a missing object means the store was corrupted
    /// (or GC is buggy); nothing good comes from continuing.
    pub fn read_tree(&self, id: &ObjectId) -> Result<Tree> {
        match self.get(id)? {
            Some(Object::Tree(t)) => Ok(t),
            Some(Object::File(_)) => Err(anyhow!("{id} is a file entry, expected a tree")),
            None => Err(crate::error::HoardError::BrokenRef(*id).into()),
        }
    }

    pub fn read_file(&self, id: &ObjectId) -> Result<FileEntry> {
        match self.get(id)? {
            Some(Object::File(f)) => Ok(f),
            Some(Object::Tree(_)) => Err(anyhow!("{id} is a tree, expected a file entry")),
            None => Err(crate::error::HoardError::BrokenRef(*id).into()),
        }
    }

    /// Every (id, encoded size) pair in the store.
    pub fn ids_and_sizes(&self) -> Result<Vec<(ObjectId, u64)>> {
        let mut stmt = self.conn.prepare("SELECT id, length(data) FROM objects")?;
        let rows = stmt
            .query_map((), |r| {
                let id: Vec<u8> = r.get(0)?;
                let len: u64 = r.get(1)?;
                Ok((id, len))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(id, len)| Ok((ObjectId::from_bytes(&id)?, len)))
            .collect()
    }

    /// Groups writes; nothing becomes visible until [`Txn::commit`].
    pub fn transaction(&mut self) -> Result<Txn<'_>> {
        let tx = self.conn.transaction()?;
        Ok(Txn { tx })
    }

    /// Removes the given IDs. Only [`crate::gc`] gets to call this,
    /// after proving they are unreachable.
    pub(crate) fn remove(&mut self, ids: &[ObjectId]) -> Result<()> {
        let tx = self.conn.transaction()?;
        for id in ids {
            tx.execute("DELETE FROM objects WHERE id = ?1", [id.as_bytes()])?;
        }
        tx.commit()?;
        Ok(())
    }
}

/// A write transaction; dropped without [`Txn::commit`], it rolls back.
pub struct Txn<'a> {
    tx: rusqlite::Transaction<'a>,
}

impl Txn<'_> {
    pub fn put(&self, object: &Object) -> Result<ObjectId> {
        let (encoded, id) = object.encode_and_id();
        self.put_encoded(id, &encoded)
    }

    pub fn put_encoded(&self, id: ObjectId, encoded: &[u8]) -> Result<ObjectId> {
        self.tx.execute(
            "INSERT OR IGNORE INTO objects(id, data) VALUES (?1, ?2)",
            (id.as_bytes(), encoded),
        )?;
        Ok(id)
    }

    pub fn commit(self) -> Result<()> {
        self.tx.commit()?;
        Ok(())
    }
}
