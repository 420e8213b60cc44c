//! Cursor persistence.
//!
//! The cursor is the last history token whose transactions have been handed
//! to the propagation engine. It is stored as one opaque blob; absence means
//! "never processed".
//!
//! # Blob format
//!
//! CBOR map `{ "v": 1, "token": <u64> }`. Any other version, or bytes that do
//! not decode, yield [`CoreError::DecodeFailure`].

use crate::error::{CoreError, CoreResult};
use crate::types::HistoryToken;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

const CURSOR_VERSION: u16 = 1;

#[derive(Serialize, Deserialize)]
struct CursorBlob {
    v: u16,
    token: u64,
}

/// Encodes a cursor into its persisted blob.
pub fn encode_cursor(token: HistoryToken) -> CoreResult<Vec<u8>> {
    let blob = CursorBlob {
        v: CURSOR_VERSION,
        token: token.as_u64(),
    };
    let mut out = Vec::with_capacity(16);
    ciborium::ser::into_writer(&blob, &mut out)
        .map_err(|e| CoreError::encode_failure(e.to_string()))?;
    Ok(out)
}

/// Decodes a persisted cursor blob.
pub fn decode_cursor(bytes: &[u8]) -> CoreResult<HistoryToken> {
    let blob: CursorBlob = ciborium::de::from_reader(bytes)
        .map_err(|e| CoreError::decode_failure(format!("cursor blob: {e}")))?;
    if blob.v != CURSOR_VERSION {
        return Err(CoreError::decode_failure(format!(
            "unsupported cursor version {}",
            blob.v
        )));
    }
    Ok(HistoryToken::new(blob.token))
}

/// Durable storage for the cursor blob.
///
/// Implementations must read and write the blob atomically.
pub trait CursorStore: Send + Sync {
    /// Loads the blob, or `None` if nothing was ever saved.
    fn load(&self) -> CoreResult<Option<Vec<u8>>>;

    /// Replaces the blob.
    fn save(&self, blob: &[u8]) -> CoreResult<()>;

    /// Removes the blob, returning the store to "never processed".
    fn clear(&self) -> CoreResult<()>;
}

/// An in-memory cursor store.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    blob: Mutex<Option<Vec<u8>>>,
}

impl MemoryCursorStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding the given raw blob.
    ///
    /// Useful for testing recovery from corrupted blobs.
    #[must_use]
    pub fn with_blob(blob: Vec<u8>) -> Self {
        Self {
            blob: Mutex::new(Some(blob)),
        }
    }
}

impl CursorStore for MemoryCursorStore {
    fn load(&self) -> CoreResult<Option<Vec<u8>>> {
        Ok(self.blob.lock().clone())
    }

    fn save(&self, blob: &[u8]) -> CoreResult<()> {
        *self.blob.lock() = Some(blob.to_vec());
        Ok(())
    }

    fn clear(&self) -> CoreResult<()> {
        *self.blob.lock() = None;
        Ok(())
    }
}

/// A cursor store backed by a single file.
///
/// Saves use the write-then-rename pattern:
/// 1. Write to a temporary sibling file
/// 2. Sync it to disk
/// 3. Rename over the cursor file
/// 4. Sync the directory (Unix)
#[derive(Debug)]
pub struct FileCursorStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileCursorStore {
    /// Creates a store for the given path. The file need not exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Returns the cursor file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> CoreResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            File::open(parent)?.sync_all()?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> CoreResult<()> {
        Ok(())
    }
}

impl CursorStore for FileCursorStore {
    fn load(&self) -> CoreResult<Option<Vec<u8>>> {
        let _guard = self.lock.lock();
        match fs::read(&self.path) {
            Ok(data) if data.is_empty() => Ok(None),
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, blob: &[u8]) -> CoreResult<()> {
        let _guard = self.lock.lock();
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let temp_path = self.temp_path();
        let mut file = File::create(&temp_path)?;
        file.write_all(blob)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &self.path)?;
        self.sync_directory()
    }

    fn clear(&self) -> CoreResult<()> {
        let _guard = self.lock.lock();
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn encode_decode() {
        let blob = encode_cursor(HistoryToken::new(42)).unwrap();
        assert_eq!(decode_cursor(&blob).unwrap(), HistoryToken::new(42));
    }

    #[test]
    fn garbage_is_decode_failure() {
        let err = decode_cursor(&[0xff, 0x00, 0x13]).unwrap_err();
        assert!(matches!(err, CoreError::DecodeFailure { .. }));
    }

    #[test]
    fn unknown_version_is_decode_failure() {
        let mut out = Vec::new();
        ciborium::ser::into_writer(&CursorBlob { v: 9, token: 1 }, &mut out).unwrap();
        assert!(matches!(
            decode_cursor(&out),
            Err(CoreError::DecodeFailure { .. })
        ));
    }

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryCursorStore::new();
        assert!(store.load().unwrap().is_none());
        store.save(b"abc").unwrap();
        assert_eq!(store.load().unwrap(), Some(b"abc".to_vec()));
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn file_store_persists_across_instances() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("cursor.bin");

        let store = FileCursorStore::new(&path);
        assert!(store.load().unwrap().is_none());
        store
            .save(&encode_cursor(HistoryToken::new(7)).unwrap())
            .unwrap();

        let reopened = FileCursorStore::new(&path);
        let blob = reopened.load().unwrap().unwrap();
        assert_eq!(decode_cursor(&blob).unwrap(), HistoryToken::new(7));
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn file_store_clear_missing_is_ok() {
        let dir = TempDir::new().unwrap();
        let store = FileCursorStore::new(dir.path().join("cursor.bin"));
        store.clear().unwrap();
    }
}
