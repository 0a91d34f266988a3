//! Tools for hashing everything we care about into a unique [`ObjectId`]

use std::fmt;
use std::io;
use std::io::prelude::*;

use anyhow::{Context, Result, ensure};
use data_encoding::HEXLOWER;
use sha2::{Digest, Sha256};

/// Number of bytes in an [`ObjectId`].
///
/// A truncated SHA256 - plenty for a personal fleet,
/// and it keeps tree encodings compact.
pub const ID_LENGTH: usize = 20;

/// The hash used to identify all objects in our system.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ObjectId {
    digest: [u8; ID_LENGTH],
}

impl ObjectId {
    /// Calculates an ID from the given bytes
    pub fn hash(bytes: &[u8]) -> Self {
        let full = Sha256::digest(bytes);
        let mut digest = [0; ID_LENGTH];
        digest.copy_from_slice(&full[..ID_LENGTH]);
        Self { digest }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ensure!(
            bytes.len() == ID_LENGTH,
            "Expected a {ID_LENGTH} byte ID, got {} bytes",
            bytes.len()
        );
        let mut digest = [0; ID_LENGTH];
        digest.copy_from_slice(bytes);
        Ok(Self { digest })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.digest
    }

    /// Gets a git-like shortened version of the hash that's unique enough
    /// for most UI uses.
    pub fn short_name(&self) -> String {
        let mut full = format!("{self}");
        let _rest = full.split_off(8);
        full
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ digest: {} }}", HEXLOWER.encode(&self.digest))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", HEXLOWER.encode(&self.digest))
    }
}

impl std::str::FromStr for ObjectId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = HEXLOWER
            .decode(s.as_bytes())
            .with_context(|| format!("Couldn't decode {s} as hex"))?;
        Self::from_bytes(&bytes)
    }
}

/// Hashes everything read through it, mostly so we can fingerprint files
/// as the scanner streams them off the disk.
pub struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    pub fn finalize(self) -> (ObjectId, R) {
        let full = self.hasher.finalize();
        let mut digest = [0; ID_LENGTH];
        digest.copy_from_slice(&full[..ID_LENGTH]);
        (ObjectId { digest }, self.inner)
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = self.inner.read(buf)?;
        self.hasher.update(&buf[..count]);
        Ok(count)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const DEVELOPERS: &[u8] = b"Developers, developers, developers, developers!".as_slice();

    const EXPECTED: &[u8] =
        &hex_literal::hex!("2cca07b57ec9bb130e3f1f6f1d7e5c3eb468a0fe1c4c4a7a9f0a331f");

    #[test]
    fn smoke() {
        let id = ObjectId::hash(DEVELOPERS);
        assert_eq!(id.as_bytes(), &EXPECTED[..ID_LENGTH]);
    }

    #[test]
    fn reader() -> Result<()> {
        let mut r = HashingReader::new(DEVELOPERS);
        io::copy(&mut r, &mut io::sink())?;
        assert_eq!(r.finalize().0.as_bytes(), &EXPECTED[..ID_LENGTH]);
        Ok(())
    }

    #[test]
    fn round_trips_through_hex() -> Result<()> {
        let id = ObjectId::hash(DEVELOPERS);
        let reparsed: ObjectId = format!("{id}").parse()?;
        assert_eq!(id, reparsed);
        Ok(())
    }
}
