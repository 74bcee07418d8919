//! ferry: blocking file transfer with explicit buffer windows
//!
//! Building blocks, bottom-up:
//! - [`buffer`]: fixed-capacity windows with position/limit/mark cursors
//! - [`channel`]: files, TCP streams and listeners that read into and write
//!   from windows
//! - [`transfer`]: copy loops between channels (buffered, scatter/gather,
//!   positional, memory-mapped)
//! - [`session`]: one-shot send/acknowledge protocol over TCP
//! - [`config`]: CLI and TOML configuration for the binary

pub mod buffer;
pub mod channel;
pub mod config;
pub mod error;
pub mod session;
pub mod transfer;

pub use buffer::{Allocation, ByteWindow, MapMode, MappedWindow, Window};
pub use channel::{
    Channel, FileChannel, ListenerChannel, OpenOption, ReadOutcome, ReadableChannel,
    StreamChannel, WritableChannel,
};
pub use error::{Error, Result};
pub use session::{Client, ReceiveReport, Role, SendReport, Server, SessionState, ACK_MESSAGE};
pub use transfer::{TransferEngine, TransferMode, TransferSession, TransferStatus};
