//! Byte windows backed by heap or direct storage.

use std::fmt;

use super::{Cursor, Region, Window};
use crate::error::{Error, Result};

/// Where a window's bytes live.
///
/// Both strategies behave identically through [`Window`]; only the
/// storage differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Allocation {
    /// Boxed slice on the process heap.
    #[default]
    Heap,
    /// Page-aligned anonymous mapping outside the allocator.
    Direct,
}

enum Backing {
    Heap(Box<[u8]>),
    Direct(Region),
}

/// A fixed-capacity byte window.
///
/// # Example
///
/// ```
/// use ferry::buffer::{ByteWindow, Window};
///
/// let mut buf = ByteWindow::allocate(1024).unwrap();
/// buf.put(b"abcde").unwrap();
/// buf.flip();
///
/// assert_eq!(buf.get(2).unwrap(), b"ab");
/// buf.mark();
/// buf.get(2).unwrap();
/// buf.reset().unwrap();
/// assert_eq!(buf.position(), 2);
/// assert_eq!(buf.remaining(), 3);
/// ```
pub struct ByteWindow {
    backing: Backing,
    cursor: Cursor,
}

impl ByteWindow {
    /// Allocate a heap window of `capacity` bytes.
    pub fn allocate(capacity: usize) -> Result<Self> {
        Self::with_allocation(capacity, Allocation::Heap)
    }

    /// Allocate a direct window of `capacity` bytes.
    pub fn allocate_direct(capacity: usize) -> Result<Self> {
        Self::with_allocation(capacity, Allocation::Direct)
    }

    pub fn with_allocation(capacity: usize, allocation: Allocation) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidCapacity(capacity));
        }
        let backing = match allocation {
            Allocation::Heap => Backing::Heap(vec![0u8; capacity].into_boxed_slice()),
            Allocation::Direct => Backing::Direct(Region::anonymous(capacity)?),
        };
        Ok(Self {
            backing,
            cursor: Cursor::new(capacity),
        })
    }

    /// Wrap existing bytes. The window is immediately drainable over all of
    /// them.
    pub fn wrap(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into().into_boxed_slice();
        let cursor = Cursor::new(bytes.len());
        Self {
            backing: Backing::Heap(bytes),
            cursor,
        }
    }

    pub fn allocation(&self) -> Allocation {
        match self.backing {
            Backing::Heap(_) => Allocation::Heap,
            Backing::Direct(_) => Allocation::Direct,
        }
    }
}

impl Window for ByteWindow {
    fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    fn cursor_mut(&mut self) -> &mut Cursor {
        &mut self.cursor
    }

    fn storage(&self) -> &[u8] {
        match &self.backing {
            Backing::Heap(bytes) => &bytes[..],
            Backing::Direct(region) => region.as_slice(),
        }
    }

    fn storage_mut(&mut self) -> Result<&mut [u8]> {
        match &mut self.backing {
            Backing::Heap(bytes) => Ok(&mut bytes[..]),
            Backing::Direct(region) => region
                .as_mut_slice()
                .ok_or(Error::AccessViolation("direct window is read-only")),
        }
    }

    fn is_direct(&self) -> bool {
        matches!(self.backing, Backing::Direct(_))
    }
}

impl fmt::Debug for ByteWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteWindow")
            .field("allocation", &self.allocation())
            .field("cursor", &self.cursor)
            .finish()
    }
}
