//! A server-side accepted stream: either flavour `mio` can register with the
//! same `Token` machinery. Connections never care which family they came
//! from past construction time — the framing and dispatch logic in
//! [`crate::connection`] is written once against this enum.

use std::{
    io::{self, Read, Write},
    net::Shutdown,
    os::fd::{AsRawFd, RawFd},
};

use mio::{Interest, Registry, Token, net::TcpStream as MioTcpStream, net::UnixStream as MioUnixStream};

pub enum AcceptedStream {
    Tcp(MioTcpStream),
    Unix(MioUnixStream),
}

impl AcceptedStream {
    pub fn register(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        match self {
            Self::Tcp(s) => registry.register(s, token, Interest::READABLE),
            Self::Unix(s) => registry.register(s, token, Interest::READABLE),
        }
    }

    pub fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match self {
            Self::Tcp(s) => registry.deregister(s),
            Self::Unix(s) => registry.deregister(s),
        }
    }

    /// Re-arms readiness for an already-registered source (`EPOLL_CTL_MOD`).
    /// Called when a worker returns a connection to *pending*: `mio`'s
    /// epoll backend is edge-triggered and would otherwise never report
    /// readiness that arrived while the connection was *working*.
    pub fn reregister(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        match self {
            Self::Tcp(s) => registry.reregister(s, token, Interest::READABLE),
            Self::Unix(s) => registry.reregister(s, token, Interest::READABLE),
        }
    }

    pub fn shutdown(&self) {
        let _ = match self {
            Self::Tcp(s) => s.shutdown(Shutdown::Both),
            Self::Unix(s) => s.shutdown(Shutdown::Both),
        };
    }
}

impl Read for AcceptedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(s) => s.read(buf),
            Self::Unix(s) => s.read(buf),
        }
    }
}

impl Write for AcceptedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(s) => s.write(buf),
            Self::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(s) => s.flush(),
            Self::Unix(s) => s.flush(),
        }
    }
}

impl AsRawFd for AcceptedStream {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Self::Tcp(s) => s.as_raw_fd(),
            Self::Unix(s) => s.as_raw_fd(),
        }
    }
}

/// Sends `buf` with `MSG_NOSIGNAL` so a half-closed peer raises `EPIPE`
/// instead of `SIGPIPE` (spec §4.8, §4.9; SPEC_FULL.md's `original_source`
/// supplement on `send(..., MSG_NOSIGNAL)`).
pub fn send_nosignal(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    let rv = unsafe {
        libc::send(fd, buf.as_ptr().cast(), buf.len(), libc::MSG_NOSIGNAL)
    };
    if rv < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rv as usize)
    }
}
