//! Durable key-value checkpoint store
//!
//! All persisted coordinator state goes through [`MetaStore`]: small named
//! byte blobs written durably. The file-backed implementation keeps two
//! physical slots per key and alternates writes between them, so a crash in
//! the middle of a write can corrupt at most the slot being written; the
//! previous slot always holds an intact copy.
//!
//! ## Slot format
//!
//! ```text
//! +----------+--------------+----------+---------+
//! | crc32 u32| timestamp i64| len u32  | payload |
//! +----------+--------------+----------+---------+
//! ```
//!
//! A slot is valid when the header parses, `len` matches the remaining
//! bytes, and the CRC32 of the payload matches. `read` prefers slot 0 unless
//! it is invalid or slot 1 is valid with a strictly newer timestamp.
//!
//! If neither slot holds a valid copy of a key that was ever written, the
//! coordinator is in an unrecoverable state and `read` fails with
//! [`Error::Corrupt`]; this is never papered over.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use lattice_core::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Durable store for small named byte blobs.
///
/// `write` must not return until the value is durable. `read` returns the
/// most recently written value that survived intact.
pub trait MetaStore: Send + Sync {
    /// Whether any copy of `key` has ever been written (and not deleted).
    fn exists(&self, key: &str) -> bool;

    /// Read the latest valid copy of `key`.
    fn read(&self, key: &str) -> Result<Vec<u8>>;

    /// Durably persist `bytes` under `key`.
    fn write(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Remove every copy of `key`.
    fn delete(&self, key: &str) -> Result<()>;
}

const SLOT_HEADER_LEN: usize = 4 + 8 + 4;

fn encode_slot(timestamp: i64, bytes: &[u8]) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(SLOT_HEADER_LEN + bytes.len());
    buf.write_u32::<LittleEndian>(crc32fast::hash(bytes))?;
    buf.write_i64::<LittleEndian>(timestamp)?;
    buf.write_u32::<LittleEndian>(bytes.len() as u32)?;
    buf.extend_from_slice(bytes);
    Ok(buf)
}

/// Decoded slot contents: write timestamp plus payload. `None` means the
/// slot is absent, truncated, or fails its checksum.
fn decode_slot(data: &[u8]) -> Option<(i64, Vec<u8>)> {
    if data.len() < SLOT_HEADER_LEN {
        return None;
    }
    let mut cursor = Cursor::new(data);
    let crc = cursor.read_u32::<LittleEndian>().ok()?;
    let timestamp = cursor.read_i64::<LittleEndian>().ok()?;
    let len = cursor.read_u32::<LittleEndian>().ok()? as usize;
    let payload = &data[SLOT_HEADER_LEN..];
    if payload.len() != len {
        return None;
    }
    if crc32fast::hash(payload) != crc {
        return None;
    }
    Some((timestamp, payload.to_vec()))
}

#[derive(Default, Clone, Copy)]
struct WriteCursor {
    /// Slot the next write targets. Defaults to 0 for a key this process
    /// has not written yet.
    next_slot: u8,
    /// Timestamp of the last write, to keep per-key timestamps strictly
    /// increasing even within one clock tick.
    last_timestamp: i64,
}

/// File-backed [`MetaStore`]: one directory, two files per key
/// (`<key>.0` and `<key>.1`).
pub struct FileMetaStore {
    dir: PathBuf,
    cursors: Mutex<HashMap<String, WriteCursor>>,
}

impl FileMetaStore {
    /// Open (creating if needed) a meta store rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(FileMetaStore {
            dir,
            cursors: Mutex::new(HashMap::new()),
        })
    }

    fn slot_path(&self, key: &str, slot: u8) -> PathBuf {
        self.dir.join(format!("{}.{}", key, slot))
    }

    fn load_slot(&self, key: &str, slot: u8) -> Option<(i64, Vec<u8>)> {
        let data = fs::read(self.slot_path(key, slot)).ok()?;
        decode_slot(&data)
    }
}

impl MetaStore for FileMetaStore {
    fn exists(&self, key: &str) -> bool {
        self.slot_path(key, 0).exists() || self.slot_path(key, 1).exists()
    }

    fn read(&self, key: &str) -> Result<Vec<u8>> {
        let slot0 = self.load_slot(key, 0);
        let slot1 = self.load_slot(key, 1);
        match (slot0, slot1) {
            (Some((ts0, bytes0)), Some((ts1, bytes1))) => {
                if ts1 > ts0 {
                    Ok(bytes1)
                } else {
                    Ok(bytes0)
                }
            }
            (Some((_, bytes0)), None) => Ok(bytes0),
            (None, Some((_, bytes1))) => Ok(bytes1),
            (None, None) => {
                if self.exists(key) {
                    Err(Error::Corrupt(format!("no valid slot for key {}", key)))
                } else {
                    Err(Error::NotFound(format!("meta key {}", key)))
                }
            }
        }
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let mut cursors = self.cursors.lock();
        let cursor = cursors.entry(key.to_string()).or_default();
        let timestamp = chrono::Utc::now()
            .timestamp_micros()
            .max(cursor.last_timestamp + 1);
        let buf = encode_slot(timestamp, bytes)?;

        let path = self.slot_path(key, cursor.next_slot);
        let mut file = File::create(&path)?;
        file.write_all(&buf)?;
        file.sync_all()?;

        debug!(key, slot = cursor.next_slot, len = bytes.len(), "meta write");
        cursor.next_slot = 1 - cursor.next_slot;
        cursor.last_timestamp = timestamp;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        for slot in [0u8, 1u8] {
            let path = self.slot_path(key, slot);
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        self.cursors.lock().remove(key);
        Ok(())
    }
}

/// In-memory [`MetaStore`] for tests and ephemeral deployments. No crash
/// safety; a value is simply the last one written.
#[derive(Default)]
pub struct MemoryMetaStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryMetaStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetaStore for MemoryMetaStore {
    fn exists(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    fn read(&self, key: &str) -> Result<Vec<u8>> {
        self.entries
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("meta key {}", key)))
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.entries.lock().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store() -> (tempfile::TempDir, FileMetaStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileMetaStore::open(dir.path()).unwrap();
        (dir, store)
    }

    // ========================================================================
    // Basic contract
    // ========================================================================

    #[test]
    fn read_missing_key_is_not_found() {
        let (_dir, store) = open_store();
        assert!(!store.exists("nope"));
        assert!(matches!(store.read("nope"), Err(Error::NotFound(_))));
    }

    #[test]
    fn write_then_read_roundtrips() {
        let (_dir, store) = open_store();
        store.write("k", b"hello").unwrap();
        assert!(store.exists("k"));
        assert_eq!(store.read("k").unwrap(), b"hello");
    }

    #[test]
    fn latest_write_wins() {
        let (_dir, store) = open_store();
        for i in 0..5u32 {
            store.write("k", &i.to_le_bytes()).unwrap();
        }
        assert_eq!(store.read("k").unwrap(), 4u32.to_le_bytes());
    }

    #[test]
    fn delete_removes_both_slots() {
        let (dir, store) = open_store();
        store.write("k", b"a").unwrap();
        store.write("k", b"b").unwrap();
        store.delete("k").unwrap();
        assert!(!store.exists("k"));
        assert!(dir.path().read_dir().unwrap().next().is_none());
    }

    // ========================================================================
    // Crash safety
    // ========================================================================

    #[test]
    fn writes_alternate_between_slots() {
        let (dir, store) = open_store();
        store.write("k", b"a").unwrap();
        assert!(dir.path().join("k.0").exists());
        assert!(!dir.path().join("k.1").exists());
        store.write("k", b"b").unwrap();
        assert!(dir.path().join("k.1").exists());
    }

    #[test]
    fn torn_write_falls_back_to_previous_slot() {
        let (dir, store) = open_store();
        store.write("k", b"v1").unwrap(); // slot 0
        store.write("k", b"v2").unwrap(); // slot 1

        // Crash mid-write of v3: slot 0 gets garbage.
        fs::write(dir.path().join("k.0"), b"\x01\x02partial").unwrap();

        let reopened = FileMetaStore::open(dir.path()).unwrap();
        assert_eq!(reopened.read("k").unwrap(), b"v2");
    }

    #[test]
    fn newer_slot_one_wins_over_valid_slot_zero() {
        let (dir, store) = open_store();
        store.write("k", b"old").unwrap(); // slot 0
        store.write("k", b"new").unwrap(); // slot 1, strictly newer timestamp

        let reopened = FileMetaStore::open(dir.path()).unwrap();
        assert_eq!(reopened.read("k").unwrap(), b"new");
    }

    #[test]
    fn both_slots_invalid_is_corrupt_not_default() {
        let (dir, store) = open_store();
        store.write("k", b"v1").unwrap();
        store.write("k", b"v2").unwrap();
        fs::write(dir.path().join("k.0"), b"junk").unwrap();
        fs::write(dir.path().join("k.1"), b"junk").unwrap();

        assert!(matches!(store.read("k"), Err(Error::Corrupt(_))));
    }

    #[test]
    fn reopened_process_resumes_from_latest_copy() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileMetaStore::open(dir.path()).unwrap();
            store.write("k", b"v1").unwrap();
            store.write("k", b"v2").unwrap();
            store.write("k", b"v3").unwrap(); // slot 0 again
        }
        // New process: write cursor is forgotten, reads still see v3.
        let store = FileMetaStore::open(dir.path()).unwrap();
        assert_eq!(store.read("k").unwrap(), b"v3");
    }

    #[test]
    fn checksum_mismatch_invalidates_slot() {
        let (dir, store) = open_store();
        store.write("k", b"payload").unwrap();
        // Flip one payload byte in place; header still parses.
        let path = dir.path().join("k.0");
        let mut data = fs::read(&path).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xff;
        fs::write(&path, data).unwrap();

        assert!(matches!(store.read("k"), Err(Error::Corrupt(_))));
    }

    // ========================================================================
    // Memory store
    // ========================================================================

    #[test]
    fn memory_store_contract() {
        let store = MemoryMetaStore::new();
        assert!(!store.exists("k"));
        store.write("k", b"v").unwrap();
        assert_eq!(store.read("k").unwrap(), b"v");
        store.delete("k").unwrap();
        assert!(matches!(store.read("k"), Err(Error::NotFound(_))));
    }
}
