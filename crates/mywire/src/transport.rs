//! Byte-stream transport: TCP, Unix-domain socket, caller-supplied socket,
//! and the one-time in-place TLS upgrade.
//!
//! Everything above this module speaks `Read`/`Write` only, so the protocol
//! logic is independent of how bytes reach the server.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
#[cfg(unix)]
use std::path::Path;
use std::time::Duration;

use mywire_core::error::{BoxError, ConnectionError, ConnectionErrorKind};
use mywire_core::{Error, Result};

use crate::config::{SslMode, TlsConfig};
#[cfg(feature = "tls")]
use crate::tls::TlsStream;
use crate::tls::tls_error;

/// Any blocking duplex byte stream.
pub trait Socket: Read + Write + Send + fmt::Debug {}

impl<T: Read + Write + Send + fmt::Debug> Socket for T {}

enum Stream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
    Custom(Box<dyn Socket>),
    #[cfg(feature = "tls")]
    Tls(Box<TlsStream<Stream>>),
    Closed,
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stream::Tcp(s) => f.debug_tuple("Tcp").field(&s.peer_addr().ok()).finish(),
            #[cfg(unix)]
            Stream::Unix(_) => f.write_str("Unix"),
            Stream::Custom(s) => f.debug_tuple("Custom").field(s).finish(),
            #[cfg(feature = "tls")]
            Stream::Tls(s) => f.debug_tuple("Tls").field(s).finish(),
            Stream::Closed => f.write_str("Closed"),
        }
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "transport is closed")
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            Stream::Unix(s) => s.read(buf),
            Stream::Custom(s) => s.read(buf),
            #[cfg(feature = "tls")]
            Stream::Tls(s) => s.read(buf),
            Stream::Closed => Err(closed_error()),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            Stream::Unix(s) => s.write(buf),
            Stream::Custom(s) => s.write(buf),
            #[cfg(feature = "tls")]
            Stream::Tls(s) => s.write(buf),
            Stream::Closed => Err(closed_error()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Tcp(s) => s.flush(),
            #[cfg(unix)]
            Stream::Unix(s) => s.flush(),
            Stream::Custom(s) => s.flush(),
            #[cfg(feature = "tls")]
            Stream::Tls(s) => s.flush(),
            Stream::Closed => Err(closed_error()),
        }
    }
}

/// An open byte stream to the server.
#[derive(Debug)]
pub struct Transport {
    stream: Stream,
    /// Unix sockets count as secure for clear-text password exchange
    local: bool,
    upgraded: bool,
}

fn connection_error(
    kind: ConnectionErrorKind,
    message: String,
    source: Option<io::Error>,
) -> Error {
    Error::Connection(ConnectionError {
        kind,
        message,
        source: source.map(|e| Box::new(e) as BoxError),
    })
}

impl Transport {
    /// Open a TCP connection, trying each resolved address in turn.
    #[allow(clippy::result_large_err)]
    pub fn connect_tcp(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let addrs: Vec<_> = (host, port).to_socket_addrs().map_err(|e| {
            connection_error(
                ConnectionErrorKind::DnsResolution,
                format!("Can't resolve host '{}': {}", host, e),
                Some(e),
            )
        })?.collect();

        if addrs.is_empty() {
            return Err(connection_error(
                ConnectionErrorKind::DnsResolution,
                format!("Host '{}' resolved to no addresses", host),
                None,
            ));
        }

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true).ok();
                    tracing::debug!(%addr, "TCP connection established");
                    return Ok(Self::new(Stream::Tcp(stream), false));
                }
                Err(e) => {
                    tracing::debug!(%addr, error = %e, "TCP connect attempt failed");
                    last_err = Some(e);
                }
            }
        }

        let err = last_err.unwrap_or_else(|| io::Error::other("no address attempted"));
        let kind = match err.kind() {
            io::ErrorKind::ConnectionRefused => ConnectionErrorKind::Refused,
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ConnectionErrorKind::Timeout,
            _ => ConnectionErrorKind::Connect,
        };
        Err(connection_error(
            kind,
            format!("Can't connect to MySQL server on '{}:{}' ({})", host, port, err),
            Some(err),
        ))
    }

    /// Open a Unix-domain socket connection.
    #[cfg(unix)]
    #[allow(clippy::result_large_err)]
    pub fn connect_unix(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path).map_err(|e| {
            let kind = match e.kind() {
                io::ErrorKind::ConnectionRefused => ConnectionErrorKind::Refused,
                _ => ConnectionErrorKind::Connect,
            };
            connection_error(
                kind,
                format!(
                    "Can't connect to local MySQL server through socket '{}' ({})",
                    path.display(),
                    e
                ),
                Some(e),
            )
        })?;
        tracing::debug!(path = %path.display(), "Unix socket connection established");
        Ok(Self::new(Stream::Unix(stream), true))
    }

    /// Wrap an already-connected socket.
    pub fn from_socket(socket: impl Socket + 'static) -> Self {
        Self::new(Stream::Custom(Box::new(socket)), false)
    }

    fn new(stream: Stream, local: bool) -> Self {
        Self {
            stream,
            local,
            upgraded: false,
        }
    }

    /// Apply read/write timeouts. Custom and TLS-wrapped custom sockets
    /// manage their own timeouts.
    #[allow(clippy::result_large_err)]
    pub fn set_timeouts(&self, read: Option<Duration>, write: Option<Duration>) -> Result<()> {
        let applied = match &self.stream {
            Stream::Tcp(s) => s.set_read_timeout(read).and_then(|()| s.set_write_timeout(write)),
            #[cfg(unix)]
            Stream::Unix(s) => s.set_read_timeout(read).and_then(|()| s.set_write_timeout(write)),
            _ => Ok(()),
        };
        applied.map_err(|e| {
            connection_error(
                ConnectionErrorKind::Connect,
                format!("Failed to set socket timeouts: {}", e),
                Some(e),
            )
        })
    }

    /// Upgrade the stream to TLS in place. Allowed once.
    #[allow(clippy::result_large_err)]
    pub fn upgrade_to_tls(&mut self, tls_config: &TlsConfig, host: &str, ssl_mode: SslMode) -> Result<()> {
        if self.upgraded {
            return Err(tls_error("Transport is already using TLS"));
        }
        if matches!(self.stream, Stream::Closed) {
            return Err(tls_error("Cannot upgrade a closed transport"));
        }
        self.upgrade_inner(tls_config, host, ssl_mode)
    }

    #[cfg(feature = "tls")]
    #[allow(clippy::result_large_err)]
    fn upgrade_inner(&mut self, tls_config: &TlsConfig, host: &str, ssl_mode: SslMode) -> Result<()> {
        let plain = std::mem::replace(&mut self.stream, Stream::Closed);
        let tls = TlsStream::connect(plain, tls_config, host, ssl_mode)?;
        self.stream = Stream::Tls(Box::new(tls));
        self.upgraded = true;
        Ok(())
    }

    #[cfg(not(feature = "tls"))]
    #[allow(clippy::result_large_err)]
    fn upgrade_inner(&mut self, _tls_config: &TlsConfig, _host: &str, _ssl_mode: SslMode) -> Result<()> {
        Err(tls_error(
            "TLS support requires the 'tls' feature of mywire",
        ))
    }

    /// Is the channel TLS or a local Unix socket?
    pub fn is_secure(&self) -> bool {
        self.upgraded || self.local
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.stream, Stream::Closed)
    }

    /// Drop the underlying socket. Idempotent.
    pub fn close(&mut self) {
        match std::mem::replace(&mut self.stream, Stream::Closed) {
            Stream::Tcp(s) => {
                let _ = s.shutdown(std::net::Shutdown::Both);
            }
            #[cfg(unix)]
            Stream::Unix(s) => {
                let _ = s.shutdown(std::net::Shutdown::Both);
            }
            #[cfg(feature = "tls")]
            Stream::Tls(mut s) => s.shutdown(),
            Stream::Custom(_) | Stream::Closed => {}
        }
    }
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}
