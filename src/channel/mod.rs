//! Channels: open files and live stream connections that move bytes in and
//! out of buffer windows.
//!
//! Capabilities are split across traits:
//! - [`Channel`]: open/close lifecycle shared by every variant
//! - [`ReadableChannel`]: single and scatter reads into windows
//! - [`WritableChannel`]: single and gather writes from windows
//!
//! Variants:
//! - [`FileChannel`]: seekable, positional transfer, memory mapping
//! - [`StreamChannel`]: connected TCP stream with half-close
//! - [`ListenerChannel`]: bound TCP listener producing stream channels
//!
//! Closing is idempotent and dropping a channel closes it. Any I/O after
//! `close` fails with [`Error::ClosedChannel`].

mod file;
mod stream;

pub use file::{FileChannel, OpenOption};
pub use stream::{ListenerChannel, StreamChannel};

use std::io::{self, IoSlice, IoSliceMut};

use crate::buffer::Window;
use crate::error::{Error, Result};

/// Result of a read that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// This many bytes were placed into the window(s). Zero when the
    /// window(s) had no room left.
    Read(usize),
    /// The source is exhausted. Reading again keeps returning this.
    EndOfStream,
}

impl ReadOutcome {
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, ReadOutcome::EndOfStream)
    }

    /// Bytes read, zero at end of stream.
    pub fn bytes(&self) -> usize {
        match self {
            ReadOutcome::Read(n) => *n,
            ReadOutcome::EndOfStream => 0,
        }
    }
}

/// Lifecycle shared by every channel.
pub trait Channel {
    fn is_open(&self) -> bool;

    /// Release the underlying OS resource. Calling it again is a no-op.
    fn close(&mut self) -> Result<()>;
}

/// A channel bytes can be read from.
pub trait ReadableChannel: Channel {
    /// Read into a raw slice. `Ok(0)` on a non-empty slice means end of
    /// stream.
    fn read_raw(&mut self, dst: &mut [u8]) -> Result<usize>;

    /// Vectored form of [`ReadableChannel::read_raw`], filling slices in order.
    fn read_raw_vectored(&mut self, dst: &mut [IoSliceMut<'_>]) -> Result<usize>;

    /// Fill `window` between its position and limit.
    fn read<W: Window + ?Sized>(&mut self, window: &mut W) -> Result<ReadOutcome> {
        if !self.is_open() {
            return Err(Error::ClosedChannel);
        }
        if !window.has_remaining() {
            return Ok(ReadOutcome::Read(0));
        }
        let n = self.read_raw(window.spare_mut()?)?;
        if n == 0 {
            return Ok(ReadOutcome::EndOfStream);
        }
        window.advance(n)?;
        Ok(ReadOutcome::Read(n))
    }

    /// Scatter read: window `i + 1` only receives bytes once window `i` has
    /// reached its limit.
    fn scatter<W: Window>(&mut self, windows: &mut [W]) -> Result<ReadOutcome> {
        if !self.is_open() {
            return Err(Error::ClosedChannel);
        }
        let n = {
            let mut slices = Vec::with_capacity(windows.len());
            for window in windows.iter_mut() {
                if window.has_remaining() {
                    slices.push(IoSliceMut::new(window.spare_mut()?));
                }
            }
            if slices.is_empty() {
                return Ok(ReadOutcome::Read(0));
            }
            self.read_raw_vectored(&mut slices)?
        };
        if n == 0 {
            return Ok(ReadOutcome::EndOfStream);
        }
        advance_in_order(windows, n)?;
        Ok(ReadOutcome::Read(n))
    }
}

/// A channel bytes can be written to.
pub trait WritableChannel: Channel {
    /// Write from a raw slice, returning how many bytes were accepted.
    fn write_raw(&mut self, src: &[u8]) -> Result<usize>;

    fn write_raw_vectored(&mut self, src: &[IoSlice<'_>]) -> Result<usize>;

    /// Drain `window` from its position to its limit.
    fn write<W: Window + ?Sized>(&mut self, window: &mut W) -> Result<usize> {
        if !self.is_open() {
            return Err(Error::ClosedChannel);
        }
        let mut total = 0;
        while window.has_remaining() {
            let n = self.write_raw(window.as_slice())?;
            if n == 0 {
                return Err(io::Error::from(io::ErrorKind::WriteZero).into());
            }
            window.advance(n)?;
            total += n;
        }
        Ok(total)
    }

    /// Gather write: drains windows in array order until all are empty.
    fn gather<W: Window>(&mut self, windows: &mut [W]) -> Result<usize> {
        if !self.is_open() {
            return Err(Error::ClosedChannel);
        }
        let mut total = 0;
        loop {
            let n = {
                let slices: Vec<IoSlice<'_>> = windows
                    .iter()
                    .filter(|w| w.has_remaining())
                    .map(|w| IoSlice::new(w.as_slice()))
                    .collect();
                if slices.is_empty() {
                    return Ok(total);
                }
                self.write_raw_vectored(&slices)?
            };
            if n == 0 {
                return Err(io::Error::from(io::ErrorKind::WriteZero).into());
            }
            advance_in_order(windows, n)?;
            total += n;
        }
    }
}

/// Credit `n` transferred bytes to windows front to back.
fn advance_in_order<W: Window>(windows: &mut [W], mut n: usize) -> Result<()> {
    for window in windows.iter_mut() {
        if n == 0 {
            break;
        }
        let step = n.min(window.remaining());
        window.advance(step)?;
        n -= step;
    }
    Ok(())
}

/// Run an I/O call again when a signal interrupts it.
pub(crate) fn retry<T>(mut op: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    loop {
        match op() {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

/// An OS handle that is `None` once closed.
#[derive(Debug)]
pub(crate) struct Handle<T> {
    inner: Option<T>,
}

impl<T> Handle<T> {
    pub(crate) fn new(inner: T) -> Self {
        Self { inner: Some(inner) }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    pub(crate) fn get(&self) -> Result<&T> {
        self.inner.as_ref().ok_or(Error::ClosedChannel)
    }

    pub(crate) fn get_mut(&mut self) -> Result<&mut T> {
        self.inner.as_mut().ok_or(Error::ClosedChannel)
    }

    /// Take the handle out, leaving the channel closed.
    pub(crate) fn take(&mut self) -> Option<T> {
        self.inner.take()
    }
}
