//! Block storage backends.
//!
//! `BlockStore` is the seam over the removable-media driver: a flat namespace
//! of `/name` objects with existence check, create, append, read, size and
//! remove. `DirBlockStore` maps it onto a directory, `MemoryBlockStore` keeps
//! everything in memory and can simulate a full or write-protected card.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::StorageError;

pub trait BlockStore {
    fn exists(&self, path: &str) -> bool;

    /// Create or truncate.
    fn create(&mut self, path: &str) -> Result<(), StorageError>;

    /// Returns the number of bytes accepted, which may be short.
    fn append(&mut self, path: &str, bytes: &[u8]) -> Result<usize, StorageError>;

    fn read(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    fn size(&self, path: &str) -> Result<u64, StorageError>;

    fn remove(&mut self, path: &str) -> Result<(), StorageError>;

    fn describe(&self) -> String;
}

/// Strip the leading `/` and reject anything that is not a single flat name.
fn object_name(path: &str) -> Result<&str, StorageError> {
    let name = path.strip_prefix('/').unwrap_or(path);
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
    {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    Ok(name)
}

pub struct DirBlockStore {
    root: PathBuf,
}

impl DirBlockStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        if !root.is_dir() {
            return Err(StorageError::InvalidPath(root.display().to_string()));
        }
        Ok(Self { root })
    }

    /// Retry `open` up to `attempts` times, `retry_delay` apart.
    pub fn mount(
        root: impl Into<PathBuf>,
        attempts: u32,
        retry_delay: Duration,
    ) -> Result<Self, StorageError> {
        let root = root.into();
        let attempts = attempts.max(1);
        let mut last_err = None;
        for attempt in 1..=attempts {
            match Self::open(&root) {
                Ok(store) => {
                    log::info!("storage mounted at {} (attempt {attempt})", root.display());
                    return Ok(store);
                }
                Err(err) => {
                    log::warn!("storage mount attempt {attempt}/{attempts} failed: {err}");
                    last_err = Some(err);
                    if attempt < attempts {
                        std::thread::sleep(retry_delay);
                    }
                }
            }
        }
        Err(last_err.unwrap_or(StorageError::Absent))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, path: &str) -> Result<PathBuf, StorageError> {
        Ok(self.root.join(object_name(path)?))
    }
}

impl BlockStore for DirBlockStore {
    fn exists(&self, path: &str) -> bool {
        self.full_path(path).map(|p| p.is_file()).unwrap_or(false)
    }

    fn create(&mut self, path: &str) -> Result<(), StorageError> {
        File::create(self.full_path(path)?)?;
        Ok(())
    }

    fn append(&mut self, path: &str, bytes: &[u8]) -> Result<usize, StorageError> {
        let mut file = OpenOptions::new().append(true).open(self.full_path(path)?)?;
        let mut written = 0;
        while written < bytes.len() {
            match file.write(&bytes[written..]) {
                Ok(0) => break,
                Ok(n) => written += n,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
        file.sync_all()?;
        Ok(written)
    }

    fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let mut file = File::open(self.full_path(path)?)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn size(&self, path: &str) -> Result<u64, StorageError> {
        Ok(fs::metadata(self.full_path(path)?)?.len())
    }

    fn remove(&mut self, path: &str) -> Result<(), StorageError> {
        fs::remove_file(self.full_path(path)?)?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("directory {}", self.root.display())
    }
}

#[derive(Default)]
pub struct MemoryBlockStore {
    objects: BTreeMap<String, Vec<u8>>,
    capacity: Option<usize>,
    read_only: bool,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total byte budget across all objects. Appends beyond it are short.
    pub fn with_capacity_limit(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    fn used(&self) -> usize {
        self.objects.values().map(Vec::len).sum()
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.read_only {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "write-protected",
            )
            .into());
        }
        Ok(())
    }

    fn not_found(path: &str) -> StorageError {
        std::io::Error::new(std::io::ErrorKind::NotFound, path.to_string()).into()
    }
}

impl BlockStore for MemoryBlockStore {
    fn exists(&self, path: &str) -> bool {
        object_name(path)
            .map(|name| self.objects.contains_key(name))
            .unwrap_or(false)
    }

    fn create(&mut self, path: &str) -> Result<(), StorageError> {
        self.check_writable()?;
        let name = object_name(path)?.to_string();
        self.objects.insert(name, Vec::new());
        Ok(())
    }

    fn append(&mut self, path: &str, bytes: &[u8]) -> Result<usize, StorageError> {
        self.check_writable()?;
        let name = object_name(path)?;
        let room = match self.capacity {
            Some(cap) => cap.saturating_sub(self.used()),
            None => bytes.len(),
        };
        let object = self
            .objects
            .get_mut(name)
            .ok_or_else(|| Self::not_found(path))?;
        let n = bytes.len().min(room);
        object.extend_from_slice(&bytes[..n]);
        Ok(n)
    }

    fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        self.objects
            .get(object_name(path)?)
            .cloned()
            .ok_or_else(|| Self::not_found(path))
    }

    fn size(&self, path: &str) -> Result<u64, StorageError> {
        self.objects
            .get(object_name(path)?)
            .map(|o| o.len() as u64)
            .ok_or_else(|| Self::not_found(path))
    }

    fn remove(&mut self, path: &str) -> Result<(), StorageError> {
        self.check_writable()?;
        self.objects
            .remove(object_name(path)?)
            .map(|_| ())
            .ok_or_else(|| Self::not_found(path))
    }

    fn describe(&self) -> String {
        format!("memory ({} objects)", self.objects.len())
    }
}
