//! The two kinds of immutable objects a hoard is made of, and their
//! canonical encodings.
//!
//! Trees map entry names to child object IDs, and file entries pair a
//! content hash with a size. The encodings are bit-exact by construction
//! so that caves built independently converge on identical IDs.

use std::collections::BTreeMap;

use anyhow::{Result, bail, ensure};

use crate::hashing::{ID_LENGTH, ObjectId};

/// Discriminates tree entries (and whole objects - it doubles as the
/// leading byte of every encoding).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub enum Kind {
    Tree = 0,
    File = 1,
}

/// A single tree entry: the ID of a subtree or of a [`FileEntry`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Node {
    pub kind: Kind,
    pub id: ObjectId,
}

impl Node {
    pub fn tree(id: ObjectId) -> Self {
        Self {
            kind: Kind::Tree,
            id,
        }
    }

    pub fn file(id: ObjectId) -> Self {
        Self {
            kind: Kind::File,
            id,
        }
    }
}

/// A tree represents a single directory, addressed by entry name.
///
/// Names are single path components; the BTreeMap keeps them in the
/// sorted order the canonical encoding demands.
pub type Tree = BTreeMap<String, Node>;

/// What identifies a file: its content hash and size.
/// Timestamps are deliberately not part of identity.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FileEntry {
    pub hash: ObjectId,
    pub size: u64,
}

/// Anything the object store holds.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Object {
    Tree(Tree),
    File(FileEntry),
}

impl Object {
    pub fn kind(&self) -> Kind {
        match self {
            Object::Tree(_) => Kind::Tree,
            Object::File(_) => Kind::File,
        }
    }

    /// Serialize to the canonical encoding.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Object::Tree(tree) => {
                let mut buf = vec![Kind::Tree as u8];
                for (name, node) in tree {
                    put_uvarint(&mut buf, name.len() as u64);
                    buf.extend_from_slice(name.as_bytes());
                    buf.push(node.kind as u8);
                    buf.extend_from_slice(node.id.as_bytes());
                }
                buf
            }
            Object::File(entry) => {
                let mut buf = vec![Kind::File as u8];
                put_uvarint(&mut buf, entry.size);
                put_uvarint(&mut buf, ID_LENGTH as u64);
                buf.extend_from_slice(entry.hash.as_bytes());
                buf
            }
        }
    }

    /// The inverse of [`Object::encode`]
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let Some((&kind, mut rest)) = buf.split_first() else {
            bail!("Empty object");
        };
        match kind {
            0 => {
                let mut tree = Tree::new();
                let mut previous_name: Option<String> = None;
                while !rest.is_empty() {
                    let name_len = take_uvarint(&mut rest)? as usize;
                    ensure!(rest.len() >= name_len, "Truncated tree entry name");
                    let (name, after_name) = rest.split_at(name_len);
                    let name = std::str::from_utf8(name)?.to_owned();
                    ensure!(
                        previous_name.as_deref().is_none_or(|p| p < name.as_str()),
                        "Tree entries out of order at {name}"
                    );
                    let Some((&kind_byte, after_kind)) = after_name.split_first() else {
                        bail!("Tree entry {name} is missing its kind");
                    };
                    let kind = match kind_byte {
                        0 => Kind::Tree,
                        1 => Kind::File,
                        wut => bail!("Unknown entry kind {wut} at {name}"),
                    };
                    ensure!(after_kind.len() >= ID_LENGTH, "Truncated ID at {name}");
                    let (id, after_id) = after_kind.split_at(ID_LENGTH);
                    let id = ObjectId::from_bytes(id)?;
                    tree.insert(name.clone(), Node { kind, id });
                    previous_name = Some(name);
                    rest = after_id;
                }
                Ok(Object::Tree(tree))
            }
            1 => {
                let size = take_uvarint(&mut rest)?;
                let hash_len = take_uvarint(&mut rest)? as usize;
                ensure!(hash_len == ID_LENGTH, "Unexpected hash length {hash_len}");
                ensure!(rest.len() == ID_LENGTH, "Truncated file entry");
                let hash = ObjectId::from_bytes(rest)?;
                Ok(Object::File(FileEntry { hash, size }))
            }
            wut => bail!("Unknown object kind {wut}"),
        }
    }

    /// Encodes the object and hashes the result.
    pub fn encode_and_id(&self) -> (Vec<u8>, ObjectId) {
        let buf = self.encode();
        let id = ObjectId::hash(&buf);
        (buf, id)
    }

    pub fn id(&self) -> ObjectId {
        self.encode_and_id().1
    }
}

/// The fixed ID every empty tree canonicalizes to
pub fn empty_tree_id() -> ObjectId {
    Object::Tree(Tree::new()).id()
}

fn put_uvarint(buf: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        buf.push((v as u8) | 0x80);
        v >>= 7;
    }
    buf.push(v as u8);
}

fn take_uvarint(buf: &mut &[u8]) -> Result<u64> {
    let mut v: u64 = 0;
    let mut shift = 0;
    loop {
        let Some((&byte, rest)) = buf.split_first() else {
            bail!("Truncated uvarint");
        };
        *buf = rest;
        ensure!(shift < 64, "uvarint overflows a u64");
        v |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(v);
        }
        shift += 7;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    /// IDs and encodings remain stable from build to build.
    fn stability() {
        assert_eq!(
            empty_tree_id().to_string(),
            "6e340b9cffb37a989ca544e6bb780a2c78901d3f"
        );

        let entry = FileEntry {
            hash: ObjectId::hash(b"One small step"),
            size: 14,
        };
        let (encoded, id) = Object::File(entry).encode_and_id();
        assert_eq!(
            encoded,
            hex_literal::hex!("010e14b8f8513c6aace093049e4ce2e8a89305f31ddf4b")
        );
        assert_eq!(id.to_string(), "f07ade13f12e95f12bf88d765a9602e075450be5");

        let mut tree = Tree::new();
        tree.insert("tranquility".to_owned(), Node::file(id));
        let (_, tree_id) = Object::Tree(tree).encode_and_id();
        assert_eq!(tree_id.to_string(), "753385125d447a445407afcbd0f723cee7190429");
    }

    #[test]
    fn round_trip() -> Result<()> {
        let file = Object::File(FileEntry {
            hash: ObjectId::hash(b"contents"),
            size: 8,
        });
        assert_eq!(Object::decode(&file.encode())?, file);

        let mut tree = Tree::new();
        tree.insert("a-file".to_owned(), Node::file(file.id()));
        tree.insert("z-dir".to_owned(), Node::tree(empty_tree_id()));
        let tree = Object::Tree(tree);
        assert_eq!(Object::decode(&tree.encode())?, tree);
        Ok(())
    }

    #[test]
    fn uvarint_round_trip() -> Result<()> {
        for v in [0u64, 1, 127, 128, 300, u64::MAX] {
            let mut buf = Vec::new();
            put_uvarint(&mut buf, v);
            let mut s = buf.as_slice();
            assert_eq!(take_uvarint(&mut s)?, v);
            assert!(s.is_empty());
        }
        Ok(())
    }

    #[test]
    fn rejects_garbage() {
        assert!(Object::decode(&[]).is_err());
        assert!(Object::decode(&[42]).is_err());
        // A tree entry with a name but no kind or ID.
        assert!(Object::decode(&[0, 1, b'x']).is_err());
    }
}
