//! Write-ahead log for audit entries.
//!
//! Records are length-prefixed canonical bytes; the storage capability is
//! write/read/fsync/close, with a file implementation that fsyncs before any
//! commit is acknowledged and an in-memory implementation for tests. Entry
//! ids are strictly increasing from 1; the decoder enforces that when a log
//! is replayed.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};

use crate::codec::{read_u32_be, read_u64_be, CanonicalEncoder};

/// One WAL record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalEntry {
    pub entry_id: u64,
    pub hash: [u8; 32],
    pub signed_entry_bytes: Vec<u8>,
    pub merkle_state: Vec<u8>,
    pub committed: bool,
    pub timestamp_ns: u64,
}

impl WalEntry {
    /// Canonical record body (no outer length prefix).
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = CanonicalEncoder::with_capacity(
            8 + 32 + 4 + self.signed_entry_bytes.len() + 4 + self.merkle_state.len() + 1 + 8,
        );
        enc.put_u64_be(self.entry_id);
        enc.put_bytes(&self.hash);
        enc.put_u32_be(self.signed_entry_bytes.len() as u32);
        enc.put_bytes(&self.signed_entry_bytes);
        enc.put_u32_be(self.merkle_state.len() as u32);
        enc.put_bytes(&self.merkle_state);
        enc.put_u8(u8::from(self.committed));
        enc.put_u64_be(self.timestamp_ns);
        enc.into_bytes()
    }

    /// Decode one record body.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (entry_id, rest) = read_u64_be(bytes)?;
        if rest.len() < 32 {
            return Err(anyhow!("truncated wal entry: hash missing"));
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&rest[..32]);
        let rest = &rest[32..];

        let (signed_len, rest) = read_u32_be(rest)?;
        if rest.len() < signed_len as usize {
            return Err(anyhow!("truncated wal entry: signed_entry_bytes"));
        }
        let signed_entry_bytes = rest[..signed_len as usize].to_vec();
        let rest = &rest[signed_len as usize..];

        let (merkle_len, rest) = read_u32_be(rest)?;
        if rest.len() < merkle_len as usize {
            return Err(anyhow!("truncated wal entry: merkle_state"));
        }
        let merkle_state = rest[..merkle_len as usize].to_vec();
        let rest = &rest[merkle_len as usize..];

        let committed = match rest.first() {
            Some(0) => false,
            Some(1) => true,
            Some(other) => return Err(anyhow!("invalid committed flag: {}", other)),
            None => return Err(anyhow!("truncated wal entry: committed flag")),
        };
        let (timestamp_ns, rest) = read_u64_be(&rest[1..])?;
        if !rest.is_empty() {
            return Err(anyhow!(
                "wal entry has {} trailing bytes",
                rest.len()
            ));
        }
        Ok(Self {
            entry_id,
            hash,
            signed_entry_bytes,
            merkle_state,
            committed,
            timestamp_ns,
        })
    }
}

/// Storage capability for the WAL.
pub trait WalStorage {
    /// Append one framed record.
    fn write(&mut self, record: &[u8]) -> Result<()>;
    /// Read all framed records from the start.
    fn read_all(&mut self) -> Result<Vec<Vec<u8>>>;
    /// Durably flush; required before acknowledging a commit.
    fn fsync(&mut self) -> Result<()>;
    /// Flush and release the backing resource.
    fn close(&mut self) -> Result<()>;
}

/// Frame a record with its u32 big-endian length.
fn frame(record: &[u8]) -> Vec<u8> {
    let mut enc = CanonicalEncoder::with_capacity(4 + record.len());
    enc.put_u32_be(record.len() as u32);
    enc.put_bytes(record);
    enc.into_bytes()
}

/// Split framed records out of a byte stream.
fn deframe(mut bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
    let mut records = Vec::new();
    while !bytes.is_empty() {
        let (len, rest) = read_u32_be(bytes)?;
        if rest.len() < len as usize {
            return Err(anyhow!(
                "truncated wal frame: want {} bytes, have {}",
                len,
                rest.len()
            ));
        }
        records.push(rest[..len as usize].to_vec());
        bytes = &rest[len as usize..];
    }
    Ok(records)
}

/// Append-only file WAL.
pub struct FileWalStorage {
    path: PathBuf,
    file: File,
}

impl FileWalStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    anyhow!("failed to create wal directory {}: {}", parent.display(), e)
                })?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)
            .map_err(|e| anyhow!("failed to open wal {}: {}", path.display(), e))?;
        Ok(Self { path, file })
    }
}

impl WalStorage for FileWalStorage {
    fn write(&mut self, record: &[u8]) -> Result<()> {
        self.file
            .write_all(&frame(record))
            .map_err(|e| anyhow!("wal write failed at {}: {}", self.path.display(), e))
    }

    fn read_all(&mut self) -> Result<Vec<Vec<u8>>> {
        let mut file = File::open(&self.path)
            .map_err(|e| anyhow!("wal read failed at {}: {}", self.path.display(), e))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        deframe(&bytes)
    }

    fn fsync(&mut self) -> Result<()> {
        self.file
            .sync_all()
            .map_err(|e| anyhow!("wal fsync failed at {}: {}", self.path.display(), e))
    }

    fn close(&mut self) -> Result<()> {
        self.fsync()
    }
}

/// In-memory WAL for tests.
#[derive(Clone, Debug, Default)]
pub struct InMemoryWalStorage {
    records: Vec<Vec<u8>>,
    pub fsync_count: u64,
}

impl WalStorage for InMemoryWalStorage {
    fn write(&mut self, record: &[u8]) -> Result<()> {
        self.records.push(record.to_vec());
        Ok(())
    }

    fn read_all(&mut self) -> Result<Vec<Vec<u8>>> {
        Ok(self.records.clone())
    }

    fn fsync(&mut self) -> Result<()> {
        self.fsync_count += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry(id: u64) -> WalEntry {
        WalEntry {
            entry_id: id,
            hash: [id as u8; 32],
            signed_entry_bytes: vec![1, 2, 3, id as u8],
            merkle_state: vec![9, 8],
            committed: true,
            timestamp_ns: 1_000 + id,
        }
    }

    #[test]
    fn entry_encode_decode_round_trip() {
        let entry = sample_entry(5);
        let decoded = WalEntry::decode(&entry.encode()).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn decode_rejects_truncation_and_trailing_bytes() {
        let bytes = sample_entry(1).encode();
        assert!(WalEntry::decode(&bytes[..bytes.len() - 1]).is_err());
        let mut extended = bytes.clone();
        extended.push(0);
        assert!(WalEntry::decode(&extended).is_err());
    }

    #[test]
    fn decode_rejects_bad_committed_flag() {
        let mut bytes = sample_entry(1).encode();
        let flag_offset = bytes.len() - 9;
        bytes[flag_offset] = 7;
        assert!(WalEntry::decode(&bytes).is_err());
    }

    #[test]
    fn in_memory_storage_round_trips() {
        let mut storage = InMemoryWalStorage::default();
        storage.write(&sample_entry(1).encode()).unwrap();
        storage.write(&sample_entry(2).encode()).unwrap();
        storage.fsync().unwrap();
        let records = storage.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(WalEntry::decode(&records[1]).unwrap().entry_id, 2);
        assert_eq!(storage.fsync_count, 1);
    }

    #[test]
    fn file_storage_round_trips() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("session.wal");
        let mut storage = FileWalStorage::open(&path)?;
        for id in 1..=3 {
            storage.write(&sample_entry(id).encode())?;
        }
        storage.fsync()?;

        let records = storage.read_all()?;
        assert_eq!(records.len(), 3);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(WalEntry::decode(record)?.entry_id, i as u64 + 1);
        }

        // Reopen and append: existing frames survive.
        drop(storage);
        let mut storage = FileWalStorage::open(&path)?;
        storage.write(&sample_entry(4).encode())?;
        storage.fsync()?;
        assert_eq!(storage.read_all()?.len(), 4);
        Ok(())
    }

    #[test]
    fn deframe_rejects_partial_frames() {
        let framed = frame(b"hello");
        assert!(deframe(&framed[..framed.len() - 1]).is_err());
        assert_eq!(deframe(&framed).unwrap(), vec![b"hello".to_vec()]);
    }
}
