//! Binding a [`crate::url::Endpoint`] to a listening, nonblocking socket
//! (spec §4.4, §6): `SO_REUSEADDR`, backlog 255, `O_NONBLOCK`, handed off to
//! `mio` for registration.

use std::{io, net::SocketAddr, os::unix::net::UnixListener as StdUnixListener, path::PathBuf};

use mio::net::{TcpListener as MioTcpListener, UnixListener as MioUnixListener};
use socket2::{Domain, Socket, Type};

use crate::{stream::AcceptedStream, url::Endpoint};

const LISTEN_BACKLOG: i32 = 255;

pub enum ListenerKind {
    Tcp(MioTcpListener),
    Unix(MioUnixListener, PathBuf),
}

impl ListenerKind {
    pub fn bind(endpoint: &Endpoint) -> io::Result<Self> {
        match endpoint {
            Endpoint::Unix(path) => {
                let listener = StdUnixListener::bind(path)?;
                listener.set_nonblocking(true)?;
                Ok(Self::Unix(MioUnixListener::from_std(listener), path.clone()))
            }
            Endpoint::Ipv4(addr) => {
                let listener = bind_tcp(Domain::IPV4, SocketAddr::V4(*addr))?;
                Ok(Self::Tcp(MioTcpListener::from_std(listener)))
            }
            Endpoint::Ipv6(addr) => {
                let listener = bind_tcp(Domain::IPV6, SocketAddr::V6(*addr))?;
                Ok(Self::Tcp(MioTcpListener::from_std(listener)))
            }
        }
    }

    pub fn accept(&mut self) -> io::Result<(AcceptedStream, SocketAddr)> {
        match self {
            Self::Tcp(listener) => {
                let (stream, addr) = listener.accept()?;
                stream.set_nodelay(true)?;
                Ok((AcceptedStream::Tcp(stream), addr))
            }
            Self::Unix(listener, _) => {
                let (stream, addr) = listener.accept()?;
                // UNIX peer addresses carry no useful IP/port; surface a
                // sentinel so callers have something to log.
                let _ = addr;
                Ok((AcceptedStream::Unix(stream), unix_sentinel_addr()))
            }
        }
    }

    pub fn register(&mut self, registry: &mio::Registry, token: mio::Token) -> io::Result<()> {
        match self {
            Self::Tcp(l) => registry.register(l, token, mio::Interest::READABLE),
            Self::Unix(l, _) => registry.register(l, token, mio::Interest::READABLE),
        }
    }

    pub fn deregister(&mut self, registry: &mio::Registry) -> io::Result<()> {
        match self {
            Self::Tcp(l) => registry.deregister(l),
            Self::Unix(l, _) => registry.deregister(l),
        }
    }

    /// Re-arms readiness for an already-registered listener (`EPOLL_CTL_MOD`),
    /// for the same edge-triggered-epoll reason as
    /// [`crate::stream::AcceptedStream::reregister`].
    pub fn reregister(&mut self, registry: &mio::Registry, token: mio::Token) -> io::Result<()> {
        match self {
            Self::Tcp(l) => registry.reregister(l, token, mio::Interest::READABLE),
            Self::Unix(l, _) => registry.reregister(l, token, mio::Interest::READABLE),
        }
    }

    /// Removes the filesystem path for a UNIX listener (spec §3, "Clean
    /// UNIX teardown"). No-op for TCP.
    pub fn unlink(&self) {
        if let Self::Unix(_, path) = self {
            let _ = std::fs::remove_file(path);
        }
    }

    /// The address the kernel actually bound, useful after binding `:0` and
    /// letting the OS pick a port. UNIX listeners report the sentinel
    /// address used elsewhere for peer addresses.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            Self::Tcp(l) => l.local_addr(),
            Self::Unix(..) => Ok(unix_sentinel_addr()),
        }
    }
}

fn bind_tcp(domain: Domain, addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = Socket::new(domain, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(socket.into())
}

fn unix_sentinel_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 0))
}
