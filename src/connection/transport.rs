//! Transport
//!
//! The byte-level seam under a connection: connect, send, receive. TCP and
//! Unix domain sockets are provided; tests substitute their own transports
//! through [`Connector`].

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::time::Duration;

use crate::config::{Address, Config};

/// Result of probing an idle socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// Nothing to read; the socket looks usable
    Idle,
    /// Peer closed the connection
    Closed,
    /// Bytes arrived that nobody asked for
    Unsolicited,
}

/// A connected byte stream
pub trait Transport: Send {
    /// Write all bytes
    fn send(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Read up to `buf.len()` bytes
    ///
    /// `Ok(0)` means the peer closed the stream. A read timeout surfaces as
    /// `WouldBlock` or `TimedOut`.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Change the read timeout (None blocks forever)
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;

    /// Check an idle socket without blocking
    fn probe(&mut self) -> io::Result<ProbeResult>;

    /// Close both directions; errors are ignored
    fn shutdown(&mut self);
}

/// Opens transports for a configuration
pub trait Connector: Send + Sync {
    fn connect(&self, config: &Config) -> io::Result<Box<dyn Transport>>;
}

/// Connector for real sockets
#[derive(Debug, Default, Clone, Copy)]
pub struct StdConnector;

impl Connector for StdConnector {
    fn connect(&self, config: &Config) -> io::Result<Box<dyn Transport>> {
        match &config.address {
            Address::Tcp { host, port } => {
                let stream = connect_tcp(host, *port, config.connect_timeout)?;
                // Disable Nagle's algorithm for low latency
                stream.set_nodelay(true)?;
                stream.set_read_timeout(config.socket_timeout)?;
                stream.set_write_timeout(config.socket_timeout)?;
                Ok(Box::new(SocketTransport { stream }))
            }
            #[cfg(unix)]
            Address::Unix(path) => {
                let stream = UnixStream::connect(path)?;
                stream.set_read_timeout(config.socket_timeout)?;
                stream.set_write_timeout(config.socket_timeout)?;
                Ok(Box::new(SocketTransport { stream }))
            }
            #[cfg(not(unix))]
            Address::Unix(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "unix sockets are not supported on this platform",
            )),
        }
    }
}

fn connect_tcp(host: &str, port: u16, timeout: Option<Duration>) -> io::Result<TcpStream> {
    let Some(timeout) = timeout else {
        return TcpStream::connect((host, port));
    };

    let mut last_err = None;
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, format!("no addresses for {}", host))
    }))
}

/// Socket operations shared by TCP and Unix streams
trait SocketStream: Read + Write + Send {
    fn apply_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;
    fn apply_nonblocking(&self, nonblocking: bool) -> io::Result<()>;
    fn close_both(&self) -> io::Result<()>;
}

impl SocketStream for TcpStream {
    fn apply_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout)
    }
    fn apply_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.set_nonblocking(nonblocking)
    }
    fn close_both(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }
}

#[cfg(unix)]
impl SocketStream for UnixStream {
    fn apply_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout)
    }
    fn apply_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.set_nonblocking(nonblocking)
    }
    fn close_both(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }
}

struct SocketTransport<S> {
    stream: S,
}

impl<S: SocketStream> Transport for SocketTransport<S> {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes)?;
        self.stream.flush()
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.apply_read_timeout(timeout)
    }

    fn probe(&mut self) -> io::Result<ProbeResult> {
        self.stream.apply_nonblocking(true)?;
        let mut byte = [0u8; 1];
        let result = match self.stream.read(&mut byte) {
            Ok(0) => Ok(ProbeResult::Closed),
            Ok(_) => Ok(ProbeResult::Unsolicited),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(ProbeResult::Idle),
            Err(e) => Err(e),
        };
        self.stream.apply_nonblocking(false)?;
        result
    }

    fn shutdown(&mut self) {
        let _ = self.stream.close_both();
    }
}
