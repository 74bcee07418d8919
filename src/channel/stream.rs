//! TCP stream and listener channels.
//!
//! All sockets are blocking. `connect`, `accept` and `read` may wait
//! indefinitely; callers needing a deadline must impose it themselves.

use std::io::{self, IoSlice, IoSliceMut, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};

use tracing::debug;

use super::{retry, Channel, Handle, ReadableChannel, WritableChannel};
use crate::error::Result;

/// Pending connection queue length for listeners.
const LISTEN_BACKLOG: i32 = 128;

/// A connected, non-seekable TCP stream.
#[derive(Debug)]
pub struct StreamChannel {
    stream: Handle<TcpStream>,
    peer: SocketAddr,
    output_shutdown: bool,
}

impl StreamChannel {
    /// Connect to the first address `addr` resolves to that accepts.
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        let channel = Self::from_stream(stream)?;
        debug!(peer = %channel.peer, "Connected stream channel");
        Ok(channel)
    }

    fn from_stream(stream: TcpStream) -> Result<Self> {
        let peer = stream.peer_addr()?;
        Ok(Self {
            stream: Handle::new(stream),
            peer,
            output_shutdown: false,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.stream.get()?.local_addr()?)
    }

    /// Half-close: shut down the write direction only.
    ///
    /// The peer's next read observes end of stream while this side can
    /// still read. Calling it again is a no-op.
    pub fn shutdown_output(&mut self) -> Result<()> {
        let stream = self.stream.get()?;
        if self.output_shutdown {
            return Ok(());
        }
        match stream.shutdown(Shutdown::Write) {
            Ok(()) => debug!(peer = %self.peer, "Shut down stream output"),
            // Peer already tore the connection down
            Err(e) if e.kind() == io::ErrorKind::NotConnected => {
                debug!(peer = %self.peer, "Stream output already disconnected")
            }
            Err(e) => return Err(e.into()),
        }
        self.output_shutdown = true;
        Ok(())
    }

    pub fn is_output_shutdown(&self) -> bool {
        self.output_shutdown
    }
}

impl Channel for StreamChannel {
    fn is_open(&self) -> bool {
        self.stream.is_open()
    }

    fn close(&mut self) -> Result<()> {
        if self.stream.take().is_some() {
            debug!(peer = %self.peer, "Closed stream channel");
        }
        Ok(())
    }
}

impl ReadableChannel for StreamChannel {
    fn read_raw(&mut self, dst: &mut [u8]) -> Result<usize> {
        let stream = self.stream.get_mut()?;
        Ok(retry(|| stream.read(dst))?)
    }

    fn read_raw_vectored(&mut self, dst: &mut [IoSliceMut<'_>]) -> Result<usize> {
        let stream = self.stream.get_mut()?;
        Ok(retry(|| stream.read_vectored(dst))?)
    }
}

impl WritableChannel for StreamChannel {
    fn write_raw(&mut self, src: &[u8]) -> Result<usize> {
        let stream = self.stream.get_mut()?;
        Ok(retry(|| stream.write(src))?)
    }

    fn write_raw_vectored(&mut self, src: &[IoSlice<'_>]) -> Result<usize> {
        let stream = self.stream.get_mut()?;
        Ok(retry(|| stream.write_vectored(src))?)
    }
}

/// A bound TCP listener.
#[derive(Debug)]
pub struct ListenerChannel {
    listener: Handle<TcpListener>,
    local: SocketAddr,
}

impl ListenerChannel {
    /// Bind and listen on `addr` with address reuse enabled.
    ///
    /// Port 0 picks an ephemeral port; see [`ListenerChannel::local_addr`].
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = create_listener(addr)?;
        let local = listener.local_addr()?;
        debug!(addr = %local, "Bound listener channel");
        Ok(Self {
            listener: Handle::new(listener),
            local,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Block until a peer connects.
    pub fn accept(&mut self) -> Result<StreamChannel> {
        let listener = self.listener.get()?;
        let (stream, peer) = retry(|| listener.accept())?;
        debug!(peer = %peer, "Accepted connection");
        StreamChannel::from_stream(stream)
    }
}

impl Channel for ListenerChannel {
    fn is_open(&self) -> bool {
        self.listener.is_open()
    }

    fn close(&mut self) -> Result<()> {
        if self.listener.take().is_some() {
            debug!(addr = %self.local, "Closed listener channel");
        }
        Ok(())
    }
}

fn create_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(false)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{ByteWindow, Window};
    use crate::channel::ReadOutcome;
    use crate::error::Error;
    use std::thread;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn test_half_close_signals_end_of_stream() {
        let mut listener = ListenerChannel::bind(loopback()).unwrap();
        let addr = listener.local_addr();

        let client = thread::spawn(move || {
            let mut stream = StreamChannel::connect(addr).unwrap();
            stream.write(&mut ByteWindow::wrap(b"ping".to_vec())).unwrap();
            stream.shutdown_output().unwrap();
            stream.shutdown_output().unwrap();

            // Reading still works after the half-close
            let mut buf = ByteWindow::allocate(16).unwrap();
            let mut reply = Vec::new();
            while let ReadOutcome::Read(_) = stream.read(&mut buf).unwrap() {
                buf.flip();
                reply.extend_from_slice(buf.as_slice());
                buf.clear();
            }
            reply
        });

        let mut conn = listener.accept().unwrap();
        let mut buf = ByteWindow::allocate(16).unwrap();
        let mut received = Vec::new();
        loop {
            match conn.read(&mut buf).unwrap() {
                ReadOutcome::Read(_) => {
                    buf.flip();
                    received.extend_from_slice(buf.as_slice());
                    buf.clear();
                }
                ReadOutcome::EndOfStream => break,
            }
        }
        assert_eq!(received, b"ping");
        assert_eq!(conn.read(&mut buf).unwrap(), ReadOutcome::EndOfStream);

        conn.write(&mut ByteWindow::wrap(b"pong".to_vec())).unwrap();
        conn.close().unwrap();

        assert_eq!(client.join().unwrap(), b"pong");
    }

    #[test]
    fn test_closed_stream_rejects_io() {
        let mut listener = ListenerChannel::bind(loopback()).unwrap();
        let addr = listener.local_addr();

        let client = thread::spawn(move || StreamChannel::connect(addr).unwrap());
        let mut conn = listener.accept().unwrap();
        let mut stream = client.join().unwrap();
        assert_eq!(stream.peer_addr(), addr);

        stream.close().unwrap();
        stream.close().unwrap();
        assert!(!stream.is_open());

        let mut buf = ByteWindow::allocate(4).unwrap();
        assert!(matches!(stream.read(&mut buf), Err(Error::ClosedChannel)));
        assert!(matches!(
            stream.shutdown_output(),
            Err(Error::ClosedChannel)
        ));

        conn.close().unwrap();
        listener.close().unwrap();
        listener.close().unwrap();
        assert!(matches!(listener.accept(), Err(Error::ClosedChannel)));
    }
}
