//! One-shot file transfer session over TCP.
//!
//! Wire format, in order:
//!
//! ```text
//! client -> server : raw file bytes
//! client -> server : half-close (end of stream)
//! server -> client : "server received data successfully, ooxx"
//! server -> client : close (end of stream)
//! ```
//!
//! There is no framing or length prefix: the half-close and the final close
//! delimit the two messages. The server handles exactly one connection per
//! session.
//!
//! ## State machine
//!
//! ```text
//! Connected -> Sending -> HalfClosed -> AwaitingAck -> Acked -> Closed   (client)
//! Connected -> Sending -> HalfClosed ----------------> Acked -> Closed   (server)
//!
//! any non-terminal state -> Failed
//! ```

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;

use bytes::{Bytes, BytesMut};
use tracing::{debug, info, warn};

use crate::buffer::{ByteWindow, Window};
use crate::channel::{
    Channel, FileChannel, ListenerChannel, OpenOption, ReadOutcome, ReadableChannel,
    StreamChannel, WritableChannel,
};
use crate::error::{Error, Result};
use crate::transfer::TransferEngine;

/// Acknowledgement the server sends once the whole file has arrived.
pub const ACK_MESSAGE: &[u8] = b"server received data successfully, ooxx";

/// Port used when none is configured.
pub const DEFAULT_PORT: u16 = 9898;

/// Largest acknowledgement the client accepts.
const MAX_ACK_SIZE: usize = 4096;

/// Which end of the connection a session runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    /// File bytes are flowing from client to server.
    Sending,
    /// The client's write direction is shut down.
    HalfClosed,
    /// Client is reading the acknowledgement.
    AwaitingAck,
    Acked,
    Closed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }

    /// Move to `next`, rejecting transitions `role` is not allowed to make.
    ///
    /// Only the client waits in `AwaitingAck`; the server goes straight from
    /// `HalfClosed` to `Acked` once it has written the acknowledgement.
    pub fn transition(&mut self, role: Role, next: SessionState) -> Result<()> {
        use SessionState::*;

        let allowed = match (role, *self, next) {
            (_, Connected, Sending)
            | (_, Sending, HalfClosed)
            | (Role::Client, HalfClosed, AwaitingAck)
            | (Role::Client, AwaitingAck, Acked)
            | (Role::Server, HalfClosed, Acked)
            | (_, Acked, Closed) => true,
            (_, from, Failed) => !from.is_terminal(),
            _ => false,
        };
        if !allowed {
            return Err(Error::Protocol(format!(
                "illegal {:?} session transition {:?} -> {:?}",
                role, self, next
            )));
        }
        debug!(?role, from = ?self, to = ?next, "Session transition");
        *self = next;
        Ok(())
    }

    /// Record a failure. Terminal states are left alone.
    fn fail(&mut self) {
        if !self.is_terminal() {
            *self = SessionState::Failed;
        }
    }
}

/// Outcome of a successful client session.
#[derive(Debug, Clone)]
pub struct SendReport {
    pub peer: SocketAddr,
    pub bytes_sent: u64,
    pub ack: Bytes,
}

/// Outcome of a successful server session.
#[derive(Debug, Clone)]
pub struct ReceiveReport {
    pub peer: SocketAddr,
    pub bytes_received: u64,
}

/// Sending side of a session.
pub struct Client {
    stream: StreamChannel,
    engine: TransferEngine,
    state: SessionState,
}

impl Client {
    /// Connect to a server. Blocks until the connection is established.
    pub fn connect(addr: impl ToSocketAddrs, engine: TransferEngine) -> Result<Self> {
        let stream = StreamChannel::connect(addr)?;
        Ok(Self {
            stream,
            engine,
            state: SessionState::Connected,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.stream.peer_addr()
    }

    /// Send the file at `path`, half-close, and wait for the acknowledgement.
    ///
    /// The connection is closed on return whether or not the session
    /// succeeded. A session cannot be reused.
    pub fn send_file(&mut self, path: impl AsRef<Path>) -> Result<SendReport> {
        let path = path.as_ref();
        let peer = self.stream.peer_addr();
        info!(peer = %peer, path = %path.display(), "Sending file");

        match self.run(path) {
            Ok(report) => {
                info!(
                    peer = %peer,
                    bytes = report.bytes_sent,
                    "Transfer acknowledged"
                );
                Ok(report)
            }
            Err(e) => {
                self.state.fail();
                warn!(
                    peer = %peer,
                    bytes = e.transferred().unwrap_or(0),
                    error = %e,
                    "Send session failed"
                );
                self.stream.close()?;
                Err(e)
            }
        }
    }

    fn run(&mut self, path: &Path) -> Result<SendReport> {
        self.state.transition(Role::Client, SessionState::Sending)?;
        let mut file = FileChannel::open(path, &[OpenOption::Read])?;
        let bytes_sent = self.engine.copy(&mut file, &mut self.stream)?;

        self.stream.shutdown_output()?;
        self.state.transition(Role::Client, SessionState::HalfClosed)?;

        self.state.transition(Role::Client, SessionState::AwaitingAck)?;
        let ack = self.read_ack()?;
        if ack.as_ref() != ACK_MESSAGE {
            return Err(Error::Protocol(format!(
                "unexpected acknowledgement: {:?}",
                String::from_utf8_lossy(&ack)
            )));
        }
        self.state.transition(Role::Client, SessionState::Acked)?;

        file.close()?;
        self.stream.close()?;
        self.state.transition(Role::Client, SessionState::Closed)?;

        Ok(SendReport {
            peer: self.stream.peer_addr(),
            bytes_sent,
            ack,
        })
    }

    /// Read until the server closes its side.
    fn read_ack(&mut self) -> Result<Bytes> {
        let mut window =
            ByteWindow::with_allocation(self.engine.buffer_size(), self.engine.allocation())?;
        let mut ack = BytesMut::new();
        loop {
            match self.stream.read(&mut window)? {
                ReadOutcome::EndOfStream => break,
                ReadOutcome::Read(_) => {
                    window.flip();
                    if ack.len() + window.remaining() > MAX_ACK_SIZE {
                        return Err(Error::Protocol(format!(
                            "acknowledgement longer than {MAX_ACK_SIZE} bytes"
                        )));
                    }
                    ack.extend_from_slice(window.as_slice());
                    window.clear();
                }
            }
        }
        Ok(ack.freeze())
    }
}

/// Receiving side of a session.
pub struct Server {
    listener: ListenerChannel,
    engine: TransferEngine,
    state: SessionState,
}

impl Server {
    /// Bind the listening socket.
    pub fn bind(addr: SocketAddr, engine: TransferEngine) -> Result<Self> {
        let listener = ListenerChannel::bind(addr)?;
        info!(addr = %listener.local_addr(), "Server listening");
        Ok(Self {
            listener,
            engine,
            state: SessionState::Connected,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// State of the session served by [`Server::receive_once`]. Stays
    /// `Connected` until a peer has been accepted.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Accept one connection, store everything it sends in `sink`, reply
    /// with [`ACK_MESSAGE`], then close the sink, the connection and the
    /// listener.
    pub fn receive_once(&mut self, sink: impl AsRef<Path>) -> Result<ReceiveReport> {
        let result = self.serve_one(sink.as_ref());
        let closed = self.listener.close();
        let report = result?;
        closed?;
        Ok(report)
    }

    fn serve_one(&mut self, path: &Path) -> Result<ReceiveReport> {
        let mut conn = self.listener.accept()?;
        let peer = conn.peer_addr();
        self.state = SessionState::Connected;
        info!(peer = %peer, path = %path.display(), "Receiving file");

        match self.exchange(&mut conn, path) {
            Ok(bytes_received) => {
                conn.close()?;
                self.state.transition(Role::Server, SessionState::Closed)?;
                info!(peer = %peer, bytes = bytes_received, "Receive session complete");
                Ok(ReceiveReport {
                    peer,
                    bytes_received,
                })
            }
            Err(e) => {
                self.state.fail();
                warn!(
                    peer = %peer,
                    bytes = e.transferred().unwrap_or(0),
                    error = %e,
                    "Receive session failed"
                );
                conn.close()?;
                Err(e)
            }
        }
    }

    fn exchange(&mut self, conn: &mut StreamChannel, path: &Path) -> Result<u64> {
        let mut sink = FileChannel::open(
            path,
            &[OpenOption::Write, OpenOption::Create, OpenOption::Truncate],
        )?;
        self.state.transition(Role::Server, SessionState::Sending)?;

        let received = self.engine.copy(conn, &mut sink)?;
        self.state.transition(Role::Server, SessionState::HalfClosed)?;

        conn.write(&mut ByteWindow::wrap(ACK_MESSAGE))?;
        self.state.transition(Role::Server, SessionState::Acked)?;

        sink.close()?;
        Ok(received)
    }
}
