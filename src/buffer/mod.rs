//! Buffer windows: fixed-capacity byte regions with explicit cursors.
//!
//! Every window carries the same four attributes:
//!
//! ```text
//! 0 <= mark <= position <= limit <= capacity
//! ```
//!
//! - `capacity`: fixed at creation
//! - `limit`: end of the region that may be read or written
//! - `position`: next byte to read or write
//! - `mark`: optional saved position restored by `reset`
//!
//! A freshly allocated window is *fillable* (limit == capacity). After
//! `flip` it is *drainable*: limit marks the end of valid data and position
//! starts over at zero. The mode is implied by the cursor state and never
//! stored.
//!
//! The cursor contract lives in [`Cursor`]; concrete windows compose a cursor
//! with a backing region and implement [`Window`]:
//!
//! - [`ByteWindow`]: heap or direct (anonymous mapping) storage
//! - [`MappedWindow`]: pages of a file mapped by `FileChannel::map`

mod mapped;
mod region;
mod window;

pub use mapped::{MapMode, MappedWindow};
pub use window::{Allocation, ByteWindow};

pub(crate) use region::Region;

use crate::error::{Error, Result};

/// Position, limit, capacity and mark of a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    capacity: usize,
    limit: usize,
    position: usize,
    mark: Option<usize>,
}

impl Cursor {
    /// Create a fillable cursor over `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            limit: capacity,
            position: 0,
            mark: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn mark_position(&self) -> Option<usize> {
        self.mark
    }

    /// Bytes between position and limit.
    pub fn remaining(&self) -> usize {
        self.limit - self.position
    }

    pub fn has_remaining(&self) -> bool {
        self.remaining() > 0
    }

    /// Switch from filling to draining: limit = position, position = 0.
    pub fn flip(&mut self) {
        self.limit = self.position;
        self.position = 0;
        self.mark = None;
    }

    /// Restart draining the same data: position = 0, limit unchanged.
    pub fn rewind(&mut self) {
        self.position = 0;
        self.mark = None;
    }

    /// Make the whole capacity fillable again. Stored bytes are not erased.
    pub fn clear(&mut self) {
        self.position = 0;
        self.limit = self.capacity;
        self.mark = None;
    }

    pub fn mark(&mut self) {
        self.mark = Some(self.position);
    }

    /// Restore the position saved by [`Cursor::mark`].
    pub fn reset(&mut self) -> Result<()> {
        let mark = self.mark.ok_or(Error::InvalidMark)?;
        self.position = mark;
        Ok(())
    }

    /// Move the position. A mark beyond the new position is discarded.
    pub fn set_position(&mut self, position: usize) -> Result<()> {
        if position > self.limit {
            return Err(Error::InvalidPosition {
                position,
                limit: self.limit,
            });
        }
        self.position = position;
        if self.mark.is_some_and(|m| m > position) {
            self.mark = None;
        }
        Ok(())
    }

    /// Move the limit, pulling position and mark back inside it.
    pub fn set_limit(&mut self, limit: usize) -> Result<()> {
        if limit > self.capacity {
            return Err(Error::InvalidLimit {
                limit,
                capacity: self.capacity,
            });
        }
        self.limit = limit;
        if self.position > limit {
            self.position = limit;
        }
        if self.mark.is_some_and(|m| m > limit) {
            self.mark = None;
        }
        Ok(())
    }

    /// Advance the position by `n` bytes that were just read or written.
    pub(crate) fn advance(&mut self, n: usize) -> Result<()> {
        if n > self.remaining() {
            return Err(Error::Underflow {
                requested: n,
                remaining: self.remaining(),
            });
        }
        self.position += n;
        Ok(())
    }
}

/// Common contract for all buffer windows.
///
/// Implementors only expose their cursor and backing bytes; every cursor
/// operation and data accessor is provided on top of those.
pub trait Window {
    fn cursor(&self) -> &Cursor;

    fn cursor_mut(&mut self) -> &mut Cursor;

    /// The full backing region, `capacity` bytes long.
    fn storage(&self) -> &[u8];

    /// Mutable access to the backing region.
    ///
    /// Read-only views return [`Error::AccessViolation`].
    fn storage_mut(&mut self) -> Result<&mut [u8]>;

    /// Whether the storage lives outside the process heap.
    fn is_direct(&self) -> bool {
        false
    }

    fn capacity(&self) -> usize {
        self.cursor().capacity()
    }

    fn limit(&self) -> usize {
        self.cursor().limit()
    }

    fn position(&self) -> usize {
        self.cursor().position()
    }

    fn remaining(&self) -> usize {
        self.cursor().remaining()
    }

    fn has_remaining(&self) -> bool {
        self.cursor().has_remaining()
    }

    fn flip(&mut self) {
        self.cursor_mut().flip();
    }

    fn rewind(&mut self) {
        self.cursor_mut().rewind();
    }

    fn clear(&mut self) {
        self.cursor_mut().clear();
    }

    fn mark(&mut self) {
        self.cursor_mut().mark();
    }

    fn reset(&mut self) -> Result<()> {
        self.cursor_mut().reset()
    }

    fn set_position(&mut self, position: usize) -> Result<()> {
        self.cursor_mut().set_position(position)
    }

    fn set_limit(&mut self, limit: usize) -> Result<()> {
        self.cursor_mut().set_limit(limit)
    }

    /// Copy `src` in at the position and advance past it.
    fn put(&mut self, src: &[u8]) -> Result<()> {
        let position = self.position();
        let remaining = self.remaining();
        let storage = self.storage_mut()?;
        if src.len() > remaining {
            return Err(Error::Overflow {
                requested: src.len(),
                remaining,
            });
        }
        storage[position..position + src.len()].copy_from_slice(src);
        self.cursor_mut().advance(src.len())
    }

    fn put_u8(&mut self, byte: u8) -> Result<()> {
        self.put(&[byte])
    }

    /// Read `n` bytes from the position into a new vector.
    fn get(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; n];
        self.get_into(&mut out, 0, n)?;
        Ok(out)
    }

    fn get_u8(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.get_into(&mut byte, 0, 1)?;
        Ok(byte[0])
    }

    /// Read `length` bytes into `dst[offset..offset + length]`.
    fn get_into(&mut self, dst: &mut [u8], offset: usize, length: usize) -> Result<()> {
        let end = offset
            .checked_add(length)
            .filter(|&end| end <= dst.len())
            .ok_or(Error::OutOfBounds {
                offset,
                length,
                len: dst.len(),
            })?;
        if length > self.remaining() {
            return Err(Error::Underflow {
                requested: length,
                remaining: self.remaining(),
            });
        }
        let position = self.position();
        dst[offset..end].copy_from_slice(&self.storage()[position..position + length]);
        self.cursor_mut().advance(length)
    }

    /// The bytes between position and limit.
    fn as_slice(&self) -> &[u8] {
        let cursor = self.cursor();
        &self.storage()[cursor.position()..cursor.limit()]
    }

    /// Mutable view of the region between position and limit, for filling.
    fn spare_mut(&mut self) -> Result<&mut [u8]> {
        let position = self.position();
        let limit = self.limit();
        Ok(&mut self.storage_mut()?[position..limit])
    }

    /// Record `n` bytes as consumed or produced at the position.
    fn advance(&mut self, n: usize) -> Result<()> {
        self.cursor_mut().advance(n)
    }

    /// Move unread bytes to the front and make the rest fillable.
    fn compact(&mut self) -> Result<()> {
        let position = self.position();
        let limit = self.limit();
        let remaining = limit - position;
        self.storage_mut()?.copy_within(position..limit, 0);
        let cursor = self.cursor_mut();
        cursor.clear();
        cursor.advance(remaining)
    }
}
