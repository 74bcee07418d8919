//! Transfer engine: moves every byte of a source channel into one or more
//! sinks.
//!
//! The core cycle is the classic buffer loop:
//!
//! ```text
//! read(window) -> flip -> write(window) -> clear -> ... until end of stream
//! ```
//!
//! Variants cover scatter/gather windows, positional file transfers and
//! memory-mapped copies. The engine never retries: the first error from
//! either side aborts the transfer and is reported as
//! [`Error::Transfer`] carrying the bytes moved so far.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use clap::ValueEnum;
use serde::Deserialize;
use tracing::{debug, trace, warn};

use crate::buffer::{Allocation, ByteWindow, MapMode, Window};
use crate::channel::{
    Channel, FileChannel, OpenOption, ReadOutcome, ReadableChannel, WritableChannel,
};
use crate::error::{Error, Result};

/// Working window size when none is configured.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Number of windows used by scatter/gather copies.
const SCATTER_WINDOWS: usize = 2;

/// How a local file copy moves its bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    /// Single window read/flip/write/clear loop.
    #[default]
    Buffered,
    /// Scatter reads and gather writes over several windows.
    Scatter,
    /// Positional `transfer_to` without a caller-visible window.
    Direct,
    /// Map source and sink into memory and copy between the mappings.
    Mapped,
}

/// Where a transfer stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    InProgress,
    Completed,
    Failed(String),
}

/// Progress record for one transfer.
#[derive(Debug, Clone)]
pub struct TransferSession {
    transferred: u64,
    status: TransferStatus,
}

impl TransferSession {
    pub fn new() -> Self {
        Self {
            transferred: 0,
            status: TransferStatus::InProgress,
        }
    }

    /// Total bytes delivered so far.
    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    pub fn status(&self) -> &TransferStatus {
        &self.status
    }

    pub fn is_finished(&self) -> bool {
        self.status != TransferStatus::InProgress
    }

    fn record(&mut self, n: usize) {
        self.transferred += n as u64;
    }

    fn complete(&mut self) {
        self.status = TransferStatus::Completed;
    }

    fn fail(&mut self, reason: &Error) {
        self.status = TransferStatus::Failed(reason.to_string());
    }
}

impl Default for TransferSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives copies between channels with a configurable working window.
#[derive(Debug, Clone, Copy)]
pub struct TransferEngine {
    buffer_size: usize,
    allocation: Allocation,
}

impl Default for TransferEngine {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            allocation: Allocation::Heap,
        }
    }
}

impl TransferEngine {
    /// Create an engine whose working windows hold `buffer_size` bytes.
    pub fn new(buffer_size: usize) -> Result<Self> {
        if buffer_size == 0 {
            return Err(Error::InvalidCapacity(buffer_size));
        }
        Ok(Self {
            buffer_size,
            allocation: Allocation::Heap,
        })
    }

    pub fn with_allocation(mut self, allocation: Allocation) -> Self {
        self.allocation = allocation;
        self
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn allocation(&self) -> Allocation {
        self.allocation
    }

    /// Copy everything from `source` to `sink`.
    pub fn copy<R, W>(&self, source: &mut R, sink: &mut W) -> Result<u64>
    where
        R: ReadableChannel + ?Sized,
        W: WritableChannel + ?Sized,
    {
        self.drive("buffered", |session| {
            let mut window = self.window(self.buffer_size)?;
            loop {
                match source.read(&mut window)? {
                    ReadOutcome::EndOfStream => return Ok(()),
                    ReadOutcome::Read(n) => trace!(bytes = n, "Read into window"),
                }
                window.flip();
                drain(&mut *sink, &mut window, session)?;
                window.clear();
            }
        })
    }

    /// Copy everything from `source` to every sink, in order.
    ///
    /// A byte counts as transferred once all sinks have received it. An
    /// empty `sinks` slice is rejected before the source is touched.
    pub fn broadcast<R, W>(&self, source: &mut R, sinks: &mut [&mut W]) -> Result<u64>
    where
        R: ReadableChannel + ?Sized,
        W: WritableChannel + ?Sized,
    {
        if sinks.is_empty() {
            return Err(Error::NoSinks);
        }
        self.drive("broadcast", |session| {
            let mut window = self.window(self.buffer_size)?;
            loop {
                let n = match source.read(&mut window)? {
                    ReadOutcome::EndOfStream => return Ok(()),
                    ReadOutcome::Read(n) => n,
                };
                window.flip();
                for sink in sinks.iter_mut() {
                    window.rewind();
                    sink.write(&mut window)?;
                }
                session.record(n);
                window.clear();
            }
        })
    }

    /// Copy with scatter reads and gather writes over windows of the given
    /// capacities. Windows fill and drain in array order.
    pub fn scatter_copy<R, W>(
        &self,
        source: &mut R,
        sink: &mut W,
        capacities: &[usize],
    ) -> Result<u64>
    where
        R: ReadableChannel + ?Sized,
        W: WritableChannel + ?Sized,
    {
        self.drive("scatter", |session| {
            if capacities.is_empty() {
                return Err(Error::InvalidCapacity(0));
            }
            let mut windows = capacities
                .iter()
                .map(|&capacity| self.window(capacity))
                .collect::<Result<Vec<_>>>()?;

            loop {
                match source.scatter(&mut windows)? {
                    ReadOutcome::EndOfStream => return Ok(()),
                    ReadOutcome::Read(n) => trace!(bytes = n, "Scatter read"),
                }
                windows.iter_mut().for_each(|w| w.flip());
                match sink.gather(&mut windows) {
                    Ok(n) => session.record(n),
                    Err(e) => {
                        session.record(windows.iter().map(|w| w.position()).sum());
                        return Err(e);
                    }
                }
                windows.iter_mut().for_each(|w| w.clear());
            }
        })
    }

    /// Copy a whole file with positional `transfer_to` calls.
    pub fn transfer_file<W>(&self, source: &mut FileChannel, sink: &mut W) -> Result<u64>
    where
        W: WritableChannel + ?Sized,
    {
        self.drive("direct", |session| {
            let size = source.size()?;
            let mut offset = 0;
            while offset < size {
                let n = source.transfer_to(offset, size - offset, &mut *sink)?;
                if n == 0 {
                    break;
                }
                trace!(offset, bytes = n, "Transferred chunk");
                offset += n;
                session.record(n as usize);
            }
            Ok(())
        })
    }

    /// Copy a whole file through memory mappings. The sink must be open for
    /// reading and writing; it ends up exactly as long as the source.
    pub fn map_copy(&self, source: &mut FileChannel, sink: &mut FileChannel) -> Result<u64> {
        self.drive("mapped", |session| {
            let size = usize::try_from(source.size()?).map_err(|_| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "file too large to map",
                ))
            })?;
            let input = source.map(MapMode::ReadOnly, 0, size)?;
            sink.truncate(size as u64)?;
            let mut output = sink.map(MapMode::ReadWrite, 0, size)?;
            output.put(input.as_slice())?;
            output.flush()?;
            session.record(size);
            Ok(())
        })
    }

    /// Copy the file at `src` to `dst` (created or truncated) using `mode`.
    ///
    /// Fails with [`Error::SameFile`] when both paths name the same file,
    /// including through links, before anything is truncated.
    pub fn copy_path(&self, src: &Path, dst: &Path, mode: TransferMode) -> Result<u64> {
        let mut source = FileChannel::open(src, &[OpenOption::Read])?;
        if let Ok(dst_meta) = fs::metadata(dst) {
            let src_meta = fs::metadata(src)?;
            if src_meta.dev() == dst_meta.dev() && src_meta.ino() == dst_meta.ino() {
                return Err(Error::SameFile(dst.to_path_buf()));
            }
        }
        let sink_options: &[OpenOption] = match mode {
            TransferMode::Mapped => &[
                OpenOption::Read,
                OpenOption::Write,
                OpenOption::Create,
                OpenOption::Truncate,
            ],
            _ => &[OpenOption::Write, OpenOption::Create, OpenOption::Truncate],
        };
        let mut sink = FileChannel::open(dst, sink_options)?;

        let copied = match mode {
            TransferMode::Buffered => self.copy(&mut source, &mut sink)?,
            TransferMode::Scatter => {
                let capacities = [self.buffer_size; SCATTER_WINDOWS];
                self.scatter_copy(&mut source, &mut sink, &capacities)?
            }
            TransferMode::Direct => self.transfer_file(&mut source, &mut sink)?,
            TransferMode::Mapped => self.map_copy(&mut source, &mut sink)?,
        };

        sink.close()?;
        source.close()?;
        Ok(copied)
    }

    fn window(&self, capacity: usize) -> Result<ByteWindow> {
        ByteWindow::with_allocation(capacity, self.allocation)
    }

    /// Run one transfer, turning a failure into [`Error::Transfer`].
    fn drive<F>(&self, mode: &'static str, run: F) -> Result<u64>
    where
        F: FnOnce(&mut TransferSession) -> Result<()>,
    {
        let mut session = TransferSession::new();
        match run(&mut session) {
            Ok(()) => {
                session.complete();
                debug!(mode, bytes = session.transferred(), "Transfer completed");
                Ok(session.transferred())
            }
            Err(e) => {
                session.fail(&e);
                warn!(mode, bytes = session.transferred(), error = %e, "Transfer failed");
                Err(Error::Transfer {
                    transferred: session.transferred(),
                    source: Box::new(e),
                })
            }
        }
    }
}

/// Write a drained window to `sink`, crediting partial progress on failure.
fn drain<W>(sink: &mut W, window: &mut ByteWindow, session: &mut TransferSession) -> Result<()>
where
    W: WritableChannel + ?Sized,
{
    match sink.write(window) {
        Ok(n) => {
            session.record(n);
            Ok(())
        }
        Err(e) => {
            session.record(window.position());
            Err(e)
        }
    }
}
