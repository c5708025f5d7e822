//! CapacityProbe の実装

use std::path::PathBuf;

use tracing::debug;

use crate::ports::CapacityProbe;

/// Always reports the same total.
#[derive(Debug, Clone, Copy)]
pub struct FixedCapacity(pub u64);

impl CapacityProbe for FixedCapacity {
    fn capacity(&self) -> Option<u64> {
        Some(self.0)
    }
}

/// Never knows; the oracle falls back to its default total.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnknownCapacity;

impl CapacityProbe for UnknownCapacity {
    fn capacity(&self) -> Option<u64> {
        None
    }
}

/// Size of the filesystem holding `path`.
#[derive(Debug, Clone)]
pub struct FilesystemCapacityProbe {
    path: PathBuf,
}

impl FilesystemCapacityProbe {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CapacityProbe for FilesystemCapacityProbe {
    fn capacity(&self) -> Option<u64> {
        match fs4::total_space(&self.path) {
            Ok(total) if total > 0 => Some(total),
            Ok(_) => None,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "filesystem size unavailable");
                None
            }
        }
    }
}
