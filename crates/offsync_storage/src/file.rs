//! Directory-backed key-value store for persistent storage.
//!
//! Layout:
//!
//! ```text
//! <root>/
//! ├─ LOCK                  # Advisory lock for single-writer
//! ├─ <partition>/
//! │  ├─ <key>              # One file per value
//! │  └─ .<key>.tmp         # In-flight write (removed on open after a crash)
//! └─ ...
//! ```

use crate::error::{StorageError, StorageResult};
use crate::store::{validate_name, KvStore};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const TEMP_SUFFIX: &str = ".tmp";

/// A directory-backed key-value store.
///
/// Each partition is a subdirectory and each key a file inside it. Data
/// survives process restarts.
///
/// # Durability
///
/// `set` uses the write-then-rename pattern:
/// 1. Write to a hidden temporary file
/// 2. `sync_all` the temporary file
/// 3. Rename it over the target
/// 4. Fsync the partition directory
///
/// A reader therefore sees either the previous value or the new one.
///
/// # Thread Safety
///
/// Mutations are serialized by an internal mutex; reads take no lock.
/// The store holds an exclusive lock on `<root>/LOCK`, so only one process
/// can open a given directory at a time.
///
/// # Example
///
/// ```no_run
/// use offsync_storage::{FileStore, KvStore};
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("offsync-data")).unwrap();
/// store.set("pending-writes", "pw-1", b"payload").unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    write_lock: Mutex<()>,
    _lock_file: File,
}

impl FileStore {
    /// Opens or creates a store rooted at `path`.
    ///
    /// Leftover temporary files from an interrupted write are removed.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - Another process holds the lock (returns [`StorageError::Locked`])
    /// - I/O errors occur
    pub fn open(path: &Path) -> StorageResult<Self> {
        fs::create_dir_all(path)?;

        if !path.is_dir() {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("path is not a directory: {}", path.display()),
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }

        let store = Self {
            root: path.to_path_buf(),
            write_lock: Mutex::new(()),
            _lock_file: lock_file,
        };
        store.remove_stale_temp_files()?;
        Ok(store)
    }

    /// Returns the root directory of the store.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.root
    }

    fn partition_dir(&self, partition: &str) -> PathBuf {
        self.root.join(partition)
    }

    fn temp_path(dir: &Path, key: &str) -> PathBuf {
        dir.join(format!(".{key}{TEMP_SUFFIX}"))
    }

    fn remove_stale_temp_files(&self) -> StorageResult<()> {
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            for file in fs::read_dir(entry.path())? {
                let file = file?;
                let name = file.file_name();
                let name = name.to_string_lossy();
                if name.starts_with('.') && name.ends_with(TEMP_SUFFIX) {
                    tracing::warn!(path = %file.path().display(), "removing interrupted write");
                    fs::remove_file(file.path())?;
                }
            }
        }
        Ok(())
    }

    #[cfg(unix)]
    fn sync_dir(dir: &Path) -> StorageResult<()> {
        File::open(dir)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_dir(_dir: &Path) -> StorageResult<()> {
        // NTFS journaling covers rename durability
        Ok(())
    }
}

impl KvStore for FileStore {
    fn get(&self, partition: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_name(partition)?;
        validate_name(key)?;
        match fs::read(self.partition_dir(partition).join(key)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, partition: &str, key: &str, value: &[u8]) -> StorageResult<()> {
        validate_name(partition)?;
        validate_name(key)?;

        let _guard = self.write_lock.lock();
        let dir = self.partition_dir(partition);
        fs::create_dir_all(&dir)?;

        let temp_path = Self::temp_path(&dir, key);
        let mut file = File::create(&temp_path)?;
        file.write_all(value)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, dir.join(key))?;
        Self::sync_dir(&dir)
    }

    fn delete(&self, partition: &str, key: &str) -> StorageResult<()> {
        validate_name(partition)?;
        validate_name(key)?;

        let _guard = self.write_lock.lock();
        let dir = self.partition_dir(partition);
        match fs::remove_file(dir.join(key)) {
            Ok(()) => Self::sync_dir(&dir),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self, partition: &str) -> StorageResult<Vec<String>> {
        validate_name(partition)?;

        let entries = match fs::read_dir(self.partition_dir(partition)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !name.starts_with('.') {
                keys.push(name);
            }
        }
        keys.sort();
        Ok(keys)
    }
}
