//! Free-space queries for the backup destination.

#![allow(missing_docs)]

use std::path::Path;

use crate::core::errors::Result;
#[cfg(unix)]
use crate::core::errors::SweepError;

/// Source of "bytes available to an unprivileged writer" for a path.
pub trait SpaceProbe: Send + Sync {
    fn available_bytes(&self, path: &Path) -> Result<u64>;
}

/// `statvfs`-backed probe for the live filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsSpaceProbe;

impl SpaceProbe for FsSpaceProbe {
    #[cfg(unix)]
    fn available_bytes(&self, path: &Path) -> Result<u64> {
        let stat = nix::sys::statvfs::statvfs(path)
            .map_err(|errno| SweepError::io(path, std::io::Error::from(errno)))?;
        Ok(stat.blocks_available().saturating_mul(stat.fragment_size()))
    }

    #[cfg(not(unix))]
    fn available_bytes(&self, _path: &Path) -> Result<u64> {
        Ok(u64::MAX)
    }
}

/// Probe reporting a fixed figure; used to exercise the space gate.
#[derive(Debug, Clone, Copy)]
pub struct FixedSpaceProbe(pub u64);

impl SpaceProbe for FixedSpaceProbe {
    fn available_bytes(&self, _path: &Path) -> Result<u64> {
        Ok(self.0)
    }
}
