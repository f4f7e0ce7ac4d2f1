//! File-backed [`StorageBackend`]: a blob get/put trait is assumed
//! elsewhere in the crate, and this module provides one trivial
//! file-backed implementation of it.
//!
//! Each key maps to one file under `root`. The version is written as a
//! 4-byte little-endian prefix ahead of the opaque payload bytes so the
//! backend itself never has to parse the payload's own framing.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use hc_error::{Error, Result};
use hc_core::backend::StorageBackend;

pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| Error::StoreIo(e.to_string()))?;
        Ok(FileStorage { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys are fixed, code-chosen strings (persist::bmodel_key etc.),
        // never user input, so a direct join is safe.
        self.root.join(format!("{key}.bin"))
    }
}

impl StorageBackend for FileStorage {
    fn dump(&self, key: &str, version: u32, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("bin.tmp");
        let mut file = fs::File::create(&tmp).map_err(|e| Error::StoreIo(e.to_string()))?;
        file.write_all(&version.to_le_bytes()).map_err(|e| Error::StoreIo(e.to_string()))?;
        file.write_all(bytes).map_err(|e| Error::StoreIo(e.to_string()))?;
        file.sync_all().map_err(|e| Error::StoreIo(e.to_string()))?;
        fs::rename(&tmp, &path).map_err(|e| Error::StoreIo(e.to_string()))?;
        Ok(())
    }

    fn fetch(&self, key: &str) -> Result<(u32, Vec<u8>)> {
        let path = self.path_for(key);
        let raw = fs::read(&path).map_err(|_| Error::NotFound(key.to_string()))?;
        if raw.len() < 4 {
            return Err(Error::Store(format!("truncated record for {key}")));
        }
        let version = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        Ok((version, raw[4..].to_vec()))
    }
}

pub fn default_root() -> PathBuf {
    std::env::var_os("HEARTHCTL_STATE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| Path::new("/var/lib/hearthctl").to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_a_blob() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStorage::new(dir.path()).unwrap();
        store.dump("widget", 3, b"hello").unwrap();
        let (version, bytes) = store.fetch("widget").unwrap();
        assert_eq!(version, 3);
        assert_eq!(bytes, b"hello");
    }

    #[test]
    fn missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStorage::new(dir.path()).unwrap();
        assert!(matches!(store.fetch("nope"), Err(Error::NotFound(_))));
    }
}
