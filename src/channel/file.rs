//! File-backed channels.

use std::fs::{File, OpenOptions};
use std::io::{self, IoSlice, IoSliceMut, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::FileExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use super::{retry, Channel, Handle, ReadOutcome, ReadableChannel, WritableChannel};
use crate::buffer::{ByteWindow, MapMode, MappedWindow, Region, Window};
use crate::error::{Error, Result};

/// Upper bound on bytes moved by one `transfer_to` / `transfer_from` call.
const TRANSFER_CHUNK: u64 = 64 * 1024;

/// Flags accepted by [`FileChannel::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOption {
    Read,
    Write,
    /// Create the file if it does not exist. Requires `Write` or `Append`.
    Create,
    /// Create the file, failing if it already exists.
    CreateNew,
    /// Truncate an existing file to zero length. Requires `Write`.
    Truncate,
    /// Every write goes to the end of the file.
    Append,
}

/// A seekable channel over an open file.
///
/// Reads and writes advance the channel position. Positional transfers and
/// mappings leave it untouched.
#[derive(Debug)]
pub struct FileChannel {
    file: Handle<File>,
    path: PathBuf,
    readable: bool,
    writable: bool,
    append: bool,
}

impl FileChannel {
    /// Open `path` with the given flags.
    ///
    /// With no flags the file is opened for reading.
    pub fn open(path: impl AsRef<Path>, options: &[OpenOption]) -> Result<Self> {
        let path = path.as_ref();
        let mut opts = OpenOptions::new();
        let mut readable = options.is_empty();
        let mut writable = false;
        let mut append = false;

        for option in options {
            match option {
                OpenOption::Read => {
                    readable = true;
                    opts.read(true);
                }
                OpenOption::Write => {
                    writable = true;
                    opts.write(true);
                }
                OpenOption::Create => {
                    opts.create(true);
                }
                OpenOption::CreateNew => {
                    opts.create_new(true);
                }
                OpenOption::Truncate => {
                    opts.truncate(true);
                }
                OpenOption::Append => {
                    writable = true;
                    append = true;
                    opts.append(true);
                }
            }
        }
        if readable {
            opts.read(true);
        }

        let file = opts.open(path)?;
        debug!(path = %path.display(), readable, writable, "Opened file channel");

        Ok(Self {
            file: Handle::new(file),
            path: path.to_path_buf(),
            readable,
            writable,
            append,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size of the file in bytes.
    pub fn size(&self) -> Result<u64> {
        Ok(self.file.get()?.metadata()?.len())
    }

    /// Current channel position.
    pub fn position(&mut self) -> Result<u64> {
        Ok(self.file.get_mut()?.stream_position()?)
    }

    /// Move the channel position. Positions past the end are allowed; a
    /// later write fills the gap with zeros.
    pub fn set_position(&mut self, position: u64) -> Result<()> {
        self.file.get_mut()?.seek(SeekFrom::Start(position))?;
        Ok(())
    }

    /// Shrink the file to `size` bytes. A larger `size` leaves the file
    /// unchanged. The position is pulled back if it lies past the new end.
    pub fn truncate(&mut self, size: u64) -> Result<()> {
        if !self.writable {
            return Err(Error::AccessViolation("channel not opened for writing"));
        }
        if size < self.size()? {
            self.file.get()?.set_len(size)?;
        }
        if self.position()? > size {
            self.set_position(size)?;
        }
        Ok(())
    }

    /// Flush file contents and metadata to storage.
    pub fn force(&mut self) -> Result<()> {
        self.file.get()?.sync_all()?;
        Ok(())
    }

    /// Copy up to `count` bytes starting at `offset` of this file into `sink`.
    ///
    /// One call moves at most one internal chunk; the return value is the
    /// amount actually moved and callers loop until their target is met.
    /// Returns 0 when `offset` is at or past the end of the file.
    pub fn transfer_to<S: WritableChannel + ?Sized>(
        &mut self,
        offset: u64,
        count: u64,
        sink: &mut S,
    ) -> Result<u64> {
        if !self.readable {
            return Err(Error::AccessViolation("channel not opened for reading"));
        }
        let size = self.size()?;
        if offset >= size || count == 0 {
            return Ok(0);
        }

        let want = count.min(size - offset).min(TRANSFER_CHUNK) as usize;
        let mut chunk = vec![0u8; want];
        let file = self.file.get()?;
        let n = retry(|| file.read_at(&mut chunk, offset))?;
        if n == 0 {
            return Ok(0);
        }
        chunk.truncate(n);

        let mut window = ByteWindow::wrap(chunk);
        let written = sink.write(&mut window)?;
        trace!(offset, written, "transfer_to");
        Ok(written as u64)
    }

    /// Copy up to `count` bytes read from `source` into this file at `offset`.
    ///
    /// One call moves at most one internal chunk. Returns 0 when `offset` is
    /// past the end of the file or the source is exhausted. Append-only
    /// channels cannot honor `offset` and are rejected.
    pub fn transfer_from<S: ReadableChannel + ?Sized>(
        &mut self,
        source: &mut S,
        offset: u64,
        count: u64,
    ) -> Result<u64> {
        if !self.writable {
            return Err(Error::AccessViolation("channel not opened for writing"));
        }
        if self.append {
            return Err(Error::AccessViolation("positional write on append-only channel"));
        }
        if offset > self.size()? || count == 0 {
            return Ok(0);
        }

        let want = count.min(TRANSFER_CHUNK) as usize;
        let mut window = ByteWindow::allocate(want)?;
        let n = match source.read(&mut window)? {
            ReadOutcome::Read(n) => n,
            ReadOutcome::EndOfStream => return Ok(0),
        };
        window.flip();

        let file = self.file.get()?;
        retry(|| file.write_all_at(window.as_slice(), offset))?;
        trace!(offset, read = n, "transfer_from");
        Ok(n as u64)
    }

    /// Map `length` bytes starting at `offset` into memory.
    ///
    /// A `ReadWrite` mapping that reaches past the end of the file grows it.
    /// Read-only and private mappings must lie within the file. A zero
    /// length yields an empty window and leaves the file alone.
    pub fn map(&mut self, mode: MapMode, offset: u64, length: usize) -> Result<MappedWindow> {
        let file = self.file.get()?;
        if !self.readable {
            return Err(Error::AccessViolation("channel not opened for reading"));
        }
        if mode == MapMode::ReadWrite && !self.writable {
            return Err(Error::AccessViolation("channel not opened for writing"));
        }

        let end = offset
            .checked_add(length as u64)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "mapping overflows"))?;
        let size = file.metadata()?.len();
        if length > 0 && end > size {
            if mode != MapMode::ReadWrite {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "mapping extends past end of file",
                )
                .into());
            }
            file.set_len(end)?;
        }

        let region = Region::file(
            file.as_raw_fd(),
            offset,
            length,
            mode != MapMode::ReadOnly,
            mode == MapMode::ReadWrite,
        )?;
        debug!(path = %self.path.display(), ?mode, offset, length, "Mapped file region");
        Ok(MappedWindow::new(region, mode))
    }
}

impl Channel for FileChannel {
    fn is_open(&self) -> bool {
        self.file.is_open()
    }

    fn close(&mut self) -> Result<()> {
        if self.file.take().is_some() {
            debug!(path = %self.path.display(), "Closed file channel");
        }
        Ok(())
    }
}

impl ReadableChannel for FileChannel {
    fn read_raw(&mut self, dst: &mut [u8]) -> Result<usize> {
        let file = self.file.get_mut()?;
        Ok(retry(|| file.read(dst))?)
    }

    fn read_raw_vectored(&mut self, dst: &mut [IoSliceMut<'_>]) -> Result<usize> {
        let file = self.file.get_mut()?;
        Ok(retry(|| file.read_vectored(dst))?)
    }
}

impl WritableChannel for FileChannel {
    fn write_raw(&mut self, src: &[u8]) -> Result<usize> {
        let file = self.file.get_mut()?;
        Ok(retry(|| file.write(src))?)
    }

    fn write_raw_vectored(&mut self, src: &[IoSlice<'_>]) -> Result<usize> {
        let file = self.file.get_mut()?;
        Ok(retry(|| file.write_vectored(src))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn test_read_until_end_of_stream() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "in.bin", b"hello");

        let mut channel = FileChannel::open(&path, &[OpenOption::Read]).unwrap();
        let mut buf = ByteWindow::allocate(1024).unwrap();

        assert_eq!(channel.read(&mut buf).unwrap(), ReadOutcome::Read(5));
        buf.flip();
        assert_eq!(buf.as_slice(), b"hello");

        buf.clear();
        for _ in 0..3 {
            assert_eq!(channel.read(&mut buf).unwrap(), ReadOutcome::EndOfStream);
        }
        assert_eq!(buf.position(), 0);
    }

    #[test]
    fn test_read_into_full_window() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "in.bin", b"hello");

        let mut channel = FileChannel::open(&path, &[]).unwrap();
        let mut buf = ByteWindow::allocate(2).unwrap();
        buf.put(b"xy").unwrap();

        assert_eq!(channel.read(&mut buf).unwrap(), ReadOutcome::Read(0));
        assert_eq!(channel.position().unwrap(), 0);
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "in.bin", b"data");

        let mut channel = FileChannel::open(&path, &[OpenOption::Read]).unwrap();
        assert!(channel.is_open());
        channel.close().unwrap();
        channel.close().unwrap();
        assert!(!channel.is_open());

        let mut buf = ByteWindow::allocate(16).unwrap();
        assert!(matches!(channel.read(&mut buf), Err(Error::ClosedChannel)));
        assert!(matches!(channel.size(), Err(Error::ClosedChannel)));
    }

    #[test]
    fn test_scatter_fills_in_order() {
        let dir = TempDir::new().unwrap();
        let data: Vec<u8> = (0..150u8).collect();
        let path = write_file(&dir, "in.bin", &data);

        let mut channel = FileChannel::open(&path, &[OpenOption::Read]).unwrap();
        let mut bufs = vec![
            ByteWindow::allocate(100).unwrap(),
            ByteWindow::allocate(1024).unwrap(),
        ];

        assert_eq!(channel.scatter(&mut bufs).unwrap(), ReadOutcome::Read(150));
        for buf in bufs.iter_mut() {
            buf.flip();
        }
        assert_eq!(bufs[0].limit(), 100);
        assert_eq!(bufs[0].as_slice(), &data[..100]);
        assert_eq!(bufs[1].limit(), 50);
        assert_eq!(bufs[1].as_slice(), &data[100..]);

        for buf in bufs.iter_mut() {
            buf.clear();
        }
        assert_eq!(channel.scatter(&mut bufs).unwrap(), ReadOutcome::EndOfStream);
    }

    #[test]
    fn test_gather_writes_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.bin");

        let mut channel =
            FileChannel::open(&path, &[OpenOption::Write, OpenOption::Create]).unwrap();
        let mut bufs = vec![ByteWindow::wrap(b"first ".to_vec()), ByteWindow::wrap(b"second".to_vec())];

        assert_eq!(channel.gather(&mut bufs).unwrap(), 12);
        assert!(bufs.iter().all(|b| !b.has_remaining()));
        channel.close().unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"first second");
    }

    #[test]
    fn test_position_and_truncate() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "f.bin", b"0123456789");

        let mut channel =
            FileChannel::open(&path, &[OpenOption::Read, OpenOption::Write]).unwrap();
        channel.set_position(8).unwrap();
        channel.truncate(4).unwrap();
        assert_eq!(channel.size().unwrap(), 4);
        assert_eq!(channel.position().unwrap(), 4);

        let mut readonly = FileChannel::open(&path, &[OpenOption::Read]).unwrap();
        assert!(matches!(
            readonly.truncate(0),
            Err(Error::AccessViolation(_))
        ));
    }

    #[test]
    fn test_transfer_to_and_from() {
        let dir = TempDir::new().unwrap();
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let src = write_file(&dir, "src.bin", &data);
        let dst = dir.path().join("dst.bin");

        let mut input = FileChannel::open(&src, &[OpenOption::Read]).unwrap();
        let mut output = FileChannel::open(
            &dst,
            &[OpenOption::Read, OpenOption::Write, OpenOption::Create],
        )
        .unwrap();

        // A single call moves at most one chunk
        let size = input.size().unwrap();
        let first = input.transfer_to(0, size, &mut output).unwrap();
        assert_eq!(first, TRANSFER_CHUNK);
        assert_eq!(input.position().unwrap(), 0);

        let mut offset = first;
        while offset < size {
            offset += input.transfer_to(offset, size - offset, &mut output).unwrap();
        }
        assert_eq!(input.transfer_to(size, 10, &mut output).unwrap(), 0);
        assert_eq!(fs::read(&dst).unwrap(), data);

        // transfer_from reads from the source's own position
        let copy = dir.path().join("copy.bin");
        let mut sink = FileChannel::open(&copy, &[OpenOption::Write, OpenOption::Create]).unwrap();
        let mut source = FileChannel::open(&src, &[OpenOption::Read]).unwrap();
        let mut at = 0;
        loop {
            let n = sink.transfer_from(&mut source, at, size).unwrap();
            if n == 0 {
                break;
            }
            at += n;
        }
        assert_eq!(at, size);
        assert_eq!(sink.position().unwrap(), 0);
        assert_eq!(fs::read(&copy).unwrap(), data);
    }

    #[test]
    fn test_transfer_from_past_end() {
        let dir = TempDir::new().unwrap();
        let src = write_file(&dir, "src.bin", b"abc");
        let dst = write_file(&dir, "dst.bin", b"x");

        let mut source = FileChannel::open(&src, &[OpenOption::Read]).unwrap();
        let mut sink = FileChannel::open(&dst, &[OpenOption::Write]).unwrap();
        assert_eq!(sink.transfer_from(&mut source, 5, 3).unwrap(), 0);
        assert_eq!(source.position().unwrap(), 0);
    }

    #[test]
    fn test_map_read_only() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "in.bin", b"mapped contents");

        let mut channel = FileChannel::open(&path, &[OpenOption::Read]).unwrap();
        let mut window = channel.map(MapMode::ReadOnly, 0, 15).unwrap();
        channel.close().unwrap();

        assert_eq!(window.mode(), MapMode::ReadOnly);
        assert_eq!(window.limit(), 15);
        assert_eq!(window.get(6).unwrap(), b"mapped");
        assert!(matches!(
            window.put(b"x"),
            Err(Error::AccessViolation(_))
        ));

        let mut channel = FileChannel::open(&path, &[OpenOption::Read]).unwrap();
        assert!(channel.map(MapMode::ReadOnly, 0, 100).is_err());
        assert!(matches!(
            channel.map(MapMode::ReadWrite, 0, 4),
            Err(Error::AccessViolation(_))
        ));
    }

    #[test]
    fn test_map_unaligned_offset() {
        let dir = TempDir::new().unwrap();
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 256) as u8).collect();
        let path = write_file(&dir, "in.bin", &data);

        let mut channel = FileChannel::open(&path, &[OpenOption::Read]).unwrap();
        let window = channel.map(MapMode::ReadOnly, 5000, 100).unwrap();
        assert_eq!(window.as_slice(), &data[5000..5100]);
    }

    #[test]
    fn test_map_read_write_is_visible_and_grows() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "out.bin", b"");

        let mut channel =
            FileChannel::open(&path, &[OpenOption::Read, OpenOption::Write]).unwrap();
        let mut window = channel.map(MapMode::ReadWrite, 0, 11).unwrap();
        assert_eq!(channel.size().unwrap(), 11);

        window.put(b"hello world").unwrap();
        // Visible to another opener without an explicit flush
        assert_eq!(fs::read(&path).unwrap(), b"hello world");
        window.flush().unwrap();
    }

    #[test]
    fn test_map_private_does_not_write_through() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "in.bin", b"original");

        let mut channel = FileChannel::open(&path, &[OpenOption::Read]).unwrap();
        let mut window = channel.map(MapMode::Private, 0, 8).unwrap();
        window.put(b"modified").unwrap();
        window.flip();
        assert_eq!(window.as_slice(), b"modified");
        assert_eq!(fs::read(&path).unwrap(), b"original");
    }

    #[test]
    fn test_map_empty_past_end_keeps_size() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "small.bin", b"abc");

        let mut channel =
            FileChannel::open(&path, &[OpenOption::Read, OpenOption::Write]).unwrap();
        let window = channel.map(MapMode::ReadWrite, 1_000_000, 0).unwrap();
        assert_eq!(window.capacity(), 0);
        assert_eq!(channel.size().unwrap(), 3);

        let window = channel.map(MapMode::ReadOnly, 1_000_000, 0).unwrap();
        assert_eq!(window.capacity(), 0);
    }

    #[test]
    fn test_transfer_from_rejects_append_channel() {
        let dir = TempDir::new().unwrap();
        let src = write_file(&dir, "src.bin", b"XY");
        let dst = write_file(&dir, "dst.bin", b"abcdef");

        let mut source = FileChannel::open(&src, &[OpenOption::Read]).unwrap();
        let mut sink = FileChannel::open(&dst, &[OpenOption::Append]).unwrap();
        assert!(matches!(
            sink.transfer_from(&mut source, 0, 2),
            Err(Error::AccessViolation(_))
        ));
        assert_eq!(source.position().unwrap(), 0);

        // Sequential writes still append
        sink.write(&mut ByteWindow::wrap(b"gh".to_vec())).unwrap();
        assert_eq!(fs::read(&dst).unwrap(), b"abcdefgh");
    }

    #[test]
    fn test_map_empty() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "empty.bin", b"");

        let mut channel = FileChannel::open(&path, &[OpenOption::Read]).unwrap();
        let window = channel.map(MapMode::ReadOnly, 0, 0).unwrap();
        assert_eq!(window.capacity(), 0);
        assert!(!window.has_remaining());
    }
}
