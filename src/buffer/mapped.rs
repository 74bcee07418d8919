//! Windows over memory-mapped file pages.

use std::fmt;

use super::{Cursor, Region, Window};
use crate::error::{Error, Result};

/// How a file region is mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapMode {
    /// Writes through the window fail with `AccessViolation`.
    ReadOnly,
    /// Writes land in the file and are visible to other openers.
    ReadWrite,
    /// Writes stay private to this mapping (copy-on-write).
    Private,
}

/// A window whose storage is a mapped region of a file.
///
/// Obtained from [`FileChannel::map`](crate::channel::FileChannel::map).
/// The mapping stays valid after the channel that created it is closed.
pub struct MappedWindow {
    region: Region,
    cursor: Cursor,
    mode: MapMode,
}

impl MappedWindow {
    pub(crate) fn new(region: Region, mode: MapMode) -> Self {
        let cursor = Cursor::new(region.len());
        Self {
            region,
            cursor,
            mode,
        }
    }

    pub fn mode(&self) -> MapMode {
        self.mode
    }

    /// Force modified pages of a read-write mapping to storage.
    pub fn flush(&self) -> Result<()> {
        if self.mode == MapMode::ReadWrite {
            self.region.flush()?;
        }
        Ok(())
    }
}

impl Window for MappedWindow {
    fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    fn cursor_mut(&mut self) -> &mut Cursor {
        &mut self.cursor
    }

    fn storage(&self) -> &[u8] {
        self.region.as_slice()
    }

    fn storage_mut(&mut self) -> Result<&mut [u8]> {
        self.region
            .as_mut_slice()
            .ok_or(Error::AccessViolation("read-only mapping"))
    }

    fn is_direct(&self) -> bool {
        true
    }
}

impl fmt::Debug for MappedWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedWindow")
            .field("mode", &self.mode)
            .field("cursor", &self.cursor)
            .finish()
    }
}
