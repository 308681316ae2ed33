//! Sequential-id image store.
//!
//! Objects are named `/<id><ext>` with ids starting at 1. The next id is the
//! smallest one with no backing object. Listing and bulk delete walk the same
//! range and, under the default `ScanPolicy::StopAtGap`, stop at the first
//! missing id once at least one object has been seen: an object past a gap
//! is not listed or deleted.

use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::storage::BlockStore;

/// Upper bound of the identity scan.
pub const MAX_IDENTITY: u32 = 10_000;

pub const IMAGE_EXTENSION: &str = ".jpg";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPolicy {
    #[default]
    StopAtGap,
    /// Walk the whole id range regardless of gaps.
    FullRange,
}

impl std::str::FromStr for ScanPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stop_at_gap" => Ok(ScanPolicy::StopAtGap),
            "full_range" => Ok(ScanPolicy::FullRange),
            other => Err(format!(
                "unknown scan policy '{other}'; expected stop_at_gap or full_range"
            )),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StoredImage {
    pub number: u32,
    pub filename: String,
    pub size: u64,
}

pub struct FileStore {
    backend: Option<Box<dyn BlockStore>>,
    scan: ScanPolicy,
}

pub fn object_path(identity: u32, extension: &str) -> String {
    format!("/{identity}{extension}")
}

impl FileStore {
    pub fn new(backend: Box<dyn BlockStore>, scan: ScanPolicy) -> Self {
        Self {
            backend: Some(backend),
            scan,
        }
    }

    /// A store with no media behind it. Every write fails with `Absent`.
    pub fn absent(scan: ScanPolicy) -> Self {
        Self {
            backend: None,
            scan,
        }
    }

    pub fn is_present(&self) -> bool {
        self.backend.is_some()
    }

    pub fn scan_policy(&self) -> ScanPolicy {
        self.scan
    }

    pub fn describe(&self) -> String {
        match &self.backend {
            Some(backend) => backend.describe(),
            None => "absent".to_string(),
        }
    }

    fn backend(&self) -> Result<&dyn BlockStore, StorageError> {
        self.backend.as_deref().ok_or(StorageError::Absent)
    }

    fn backend_mut(&mut self) -> Result<&mut (dyn BlockStore + 'static), StorageError> {
        self.backend.as_deref_mut().ok_or(StorageError::Absent)
    }

    /// Smallest free id. Does not reserve it.
    pub fn next_identity(&self, extension: &str) -> Result<u32, StorageError> {
        let backend = self.backend()?;
        (1..=MAX_IDENTITY)
            .find(|id| !backend.exists(&object_path(*id, extension)))
            .ok_or(StorageError::Exhausted { max: MAX_IDENTITY })
    }

    /// Write `bytes` as image `identity`. A failed or short write leaves no object behind.
    pub fn write(&mut self, identity: u32, bytes: &[u8]) -> Result<(), StorageError> {
        let path = object_path(identity, IMAGE_EXTENSION);
        let backend = self.backend_mut()?;
        backend.create(&path)?;
        let result = match backend.append(&path, bytes) {
            Ok(written) if written == bytes.len() => Ok(()),
            Ok(written) => Err(StorageError::ShortWrite {
                expected: bytes.len(),
                written,
            }),
            Err(err) => Err(err),
        };
        if result.is_err() {
            if let Err(err) = backend.remove(&path) {
                log::warn!("could not remove partial {path}: {err}");
            }
        }
        result
    }

    /// `Ok(None)` when there is no such image.
    pub fn read(&self, identity: u32) -> Result<Option<Vec<u8>>, StorageError> {
        let backend = self.backend()?;
        let path = object_path(identity, IMAGE_EXTENSION);
        if !backend.exists(&path) {
            return Ok(None);
        }
        backend.read(&path).map(Some)
    }

    pub fn enumerate(&self) -> Enumerate<'_> {
        Enumerate {
            backend: self.backend.as_deref(),
            scan: self.scan,
            next: 1,
            found: 0,
        }
    }

    /// Remove every image the scan reaches. Returns the number removed.
    pub fn delete_all(&mut self) -> usize {
        let scan = self.scan;
        let Some(backend) = self.backend.as_deref_mut() else {
            return 0;
        };
        let mut seen = 0usize;
        let mut deleted = 0usize;
        for id in 1..=MAX_IDENTITY {
            let path = object_path(id, IMAGE_EXTENSION);
            if backend.exists(&path) {
                seen += 1;
                match backend.remove(&path) {
                    Ok(()) => deleted += 1,
                    Err(err) => log::warn!("failed to delete {path}: {err}"),
                }
            } else if scan == ScanPolicy::StopAtGap && seen > 0 {
                break;
            }
        }
        deleted
    }
}

/// Lazy walk over stored images in increasing id order.
pub struct Enumerate<'a> {
    backend: Option<&'a dyn BlockStore>,
    scan: ScanPolicy,
    next: u32,
    found: usize,
}

impl Iterator for Enumerate<'_> {
    type Item = StoredImage;

    fn next(&mut self) -> Option<StoredImage> {
        let backend = self.backend?;
        while self.next <= MAX_IDENTITY {
            let id = self.next;
            self.next += 1;
            let path = object_path(id, IMAGE_EXTENSION);
            if backend.exists(&path) {
                self.found += 1;
                return Some(StoredImage {
                    number: id,
                    filename: format!("{id}{IMAGE_EXTENSION}"),
                    size: backend.size(&path).unwrap_or(0),
                });
            }
            if self.scan == ScanPolicy::StopAtGap && self.found > 0 {
                self.next = MAX_IDENTITY + 1;
            }
        }
        None
    }
}
