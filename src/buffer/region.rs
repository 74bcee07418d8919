//! Memory regions obtained directly from the kernel with `mmap`.
//!
//! Used for direct window storage (anonymous mappings) and for file
//! mappings. The region unmaps itself on drop.

use std::io;
use std::os::unix::io::RawFd;
use std::ptr::NonNull;

/// An owned `mmap` region.
///
/// `ptr` may sit past `base` when a file mapping starts at an offset that is
/// not page aligned; `delta` records the gap so the whole mapping can be
/// released.
pub(crate) struct Region {
    base: *mut libc::c_void,
    ptr: NonNull<u8>,
    len: usize,
    delta: usize,
    writable: bool,
}

// The region is exclusively owned; nothing else holds the pointer.
unsafe impl Send for Region {}

impl Region {
    /// Map `len` bytes of zeroed anonymous memory.
    pub(crate) fn anonymous(len: usize) -> io::Result<Self> {
        if len == 0 {
            return Ok(Self::empty(true));
        }
        // SAFETY: a fresh private anonymous mapping aliases nothing.
        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        Self::from_raw(base, 0, len, true)
    }

    /// Map `len` bytes of the file behind `fd`, starting at `offset`.
    ///
    /// `shared` selects `MAP_SHARED` (changes reach the file) over
    /// `MAP_PRIVATE` (copy-on-write).
    pub(crate) fn file(
        fd: RawFd,
        offset: u64,
        len: usize,
        writable: bool,
        shared: bool,
    ) -> io::Result<Self> {
        if len == 0 {
            return Ok(Self::empty(writable));
        }

        let page = page_size() as u64;
        let aligned = offset - offset % page;
        let delta = (offset - aligned) as usize;
        let map_offset = libc::off_t::try_from(aligned)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset too large"))?;

        let prot = if writable {
            libc::PROT_READ | libc::PROT_WRITE
        } else {
            libc::PROT_READ
        };
        let flags = if shared {
            libc::MAP_SHARED
        } else {
            libc::MAP_PRIVATE
        };

        // SAFETY: the kernel validates fd, offset and protection; the result
        // is checked against MAP_FAILED before use.
        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len + delta,
                prot,
                flags,
                fd,
                map_offset,
            )
        };
        Self::from_raw(base, delta, len, writable)
    }

    fn from_raw(
        base: *mut libc::c_void,
        delta: usize,
        len: usize,
        writable: bool,
    ) -> io::Result<Self> {
        if base == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: delta is inside the mapping, which is at least len + delta long.
        let ptr = unsafe { (base as *mut u8).add(delta) };
        let ptr = NonNull::new(ptr).ok_or_else(|| io::Error::other("mmap returned null"))?;
        Ok(Self {
            base,
            ptr,
            len,
            delta,
            writable,
        })
    }

    fn empty(writable: bool) -> Self {
        Self {
            base: std::ptr::null_mut(),
            ptr: NonNull::dangling(),
            len: 0,
            delta: 0,
            writable,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for len readable bytes for the life of self.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Mutable view, or `None` for a read-only mapping.
    pub(crate) fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        if !self.writable {
            return None;
        }
        // SAFETY: the mapping is writable and uniquely borrowed through self.
        Some(unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) })
    }

    /// Synchronously write dirty pages back to the mapped file.
    pub(crate) fn flush(&self) -> io::Result<()> {
        if self.len == 0 {
            return Ok(());
        }
        // SAFETY: base/len + delta describe exactly the live mapping.
        let rc = unsafe { libc::msync(self.base, self.len + self.delta, libc::MS_SYNC) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        if self.len == 0 {
            return;
        }
        // SAFETY: the mapping is owned by self and no borrows outlive it.
        unsafe {
            libc::munmap(self.base, self.len + self.delta);
        }
    }
}

fn page_size() -> usize {
    // SAFETY: sysconf has no memory-safety preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        4096
    }
}
