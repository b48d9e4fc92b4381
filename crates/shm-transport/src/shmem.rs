//! Named shared-memory regions
//!
//! Regions are file-backed maps under the user runtime dir (a tmpfs on
//! Linux). The creator owns the backing file and unlinks it on drop; the
//! opener only unmaps. Nothing inside the region synchronizes access;
//! callers coordinate through the control channel.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use memmap2::MmapMut;
use tracing::{debug, warn};

use crate::{TransportError, TransportResult};

/// A byte region shared between the capture and recorder processes
pub struct SharedMemory {
    map: MmapMut,
    path: PathBuf,
    owner: bool,
}

impl SharedMemory {
    /// Create a new region of exactly `size` bytes.
    ///
    /// Fails if the backing file already exists (name collision) or the
    /// filesystem refuses the allocation.
    pub fn create(path: &Path, size: usize) -> TransportResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        file.set_len(size as u64)?;

        let map = unsafe { MmapMut::map_mut(&file)? };
        debug!(path = %path.display(), size, "created shared memory region");

        Ok(Self {
            map,
            path: path.to_path_buf(),
            owner: true,
        })
    }

    /// Map an existing region, verifying it holds at least `size` bytes.
    pub fn open(path: &Path, size: usize) -> TransportResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        let actual = file.metadata()?.len() as usize;
        if actual < size {
            return Err(TransportError::RegionSize {
                expected: size,
                actual,
            });
        }

        let map = unsafe { MmapMut::map_mut(&file)? };
        debug!(path = %path.display(), size, "opened shared memory region");

        Ok(Self {
            map,
            path: path.to_path_buf(),
            owner: false,
        })
    }

    /// Filesystem path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Region size in bytes
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.map
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.map
    }
}

impl Drop for SharedMemory {
    fn drop(&mut self) {
        if self.owner {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), "failed to unlink shared memory: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unique_region_path;

    #[test]
    fn test_create_then_open_sees_same_bytes() {
        let path = unique_region_path("shm-test");
        let mut writer = SharedMemory::create(&path, 4096).unwrap();
        writer.as_mut_slice()[100] = 0xAB;

        let reader = SharedMemory::open(&path, 4096).unwrap();
        assert_eq!(reader.len(), 4096);
        assert_eq!(reader.as_slice()[100], 0xAB);
    }

    #[test]
    fn test_create_refuses_collision() {
        let path = unique_region_path("shm-collide");
        let _first = SharedMemory::create(&path, 64).unwrap();
        assert!(SharedMemory::create(&path, 64).is_err());
    }

    #[test]
    fn test_open_rejects_short_region() {
        let path = unique_region_path("shm-short");
        let _region = SharedMemory::create(&path, 64).unwrap();
        assert!(matches!(
            SharedMemory::open(&path, 128),
            Err(TransportError::RegionSize { .. })
        ));
    }

    #[test]
    fn test_owner_unlinks_on_drop() {
        let path = unique_region_path("shm-unlink");
        {
            let _region = SharedMemory::create(&path, 64).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }
}
