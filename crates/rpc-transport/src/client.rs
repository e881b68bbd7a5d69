//! Client engine (spec §4.9): one socket per client, strictly one request
//! in flight, synchronous `invoke` with a read-side wall-clock deadline.

use std::{
    io::{self, Read},
    net::{Shutdown, SocketAddr, TcpStream as StdTcpStream},
    os::{
        fd::{AsRawFd, RawFd},
        unix::net::UnixStream as StdUnixStream,
    },
    sync::{
        Mutex,
        atomic::{AtomicU32, Ordering},
    },
    time::{Duration, Instant},
};

use rpc_service::ServiceDescriptor;
use rpc_wire::{ConnBuffer, FrameHeader, HEADER_LEN, RESPONSE_STATUS_LEN};
use socket2::{Domain, Socket, Type};
use tracing::warn;

use crate::{
    error::ConnectError,
    stream::send_nosignal,
    url::{self, Endpoint},
};

/// Default read deadline, matching `RPC_TIMEOUT_US` in spec §5/§8 scenario 5.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_micros(500_000);

enum ClientStream {
    Tcp(StdTcpStream),
    Unix(StdUnixStream),
}

impl ClientStream {
    fn connect(endpoint: &Endpoint) -> io::Result<Self> {
        match endpoint {
            Endpoint::Unix(path) => {
                let stream = StdUnixStream::connect(path)?;
                stream.set_nonblocking(true)?;
                Ok(Self::Unix(stream))
            }
            Endpoint::Ipv4(addr) => Ok(Self::Tcp(connect_tcp(Domain::IPV4, SocketAddr::V4(*addr))?)),
            Endpoint::Ipv6(addr) => Ok(Self::Tcp(connect_tcp(Domain::IPV6, SocketAddr::V6(*addr))?)),
        }
    }
}

/// Connects via a nonblocking socket, tolerating `EINPROGRESS` at connect
/// time (spec's `original_source` supplement): the first `invoke()` call's
/// send/recv retry loops naturally wait out the handshake.
fn connect_tcp(domain: Domain, addr: SocketAddr) -> io::Result<StdTcpStream> {
    let socket = Socket::new(domain, Type::STREAM, None)?;
    socket.set_nonblocking(true)?;
    match socket.connect(&addr.into()) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
        Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {}
        Err(e) => return Err(e),
    }
    socket.set_nodelay(true)?;
    Ok(socket.into())
}

impl Read for ClientStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(s) => s.read(buf),
            Self::Unix(s) => s.read(buf),
        }
    }
}

impl AsRawFd for ClientStream {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Self::Tcp(s) => s.as_raw_fd(),
            Self::Unix(s) => s.as_raw_fd(),
        }
    }
}

impl ClientStream {
    fn shutdown(&self) {
        let _ = match self {
            Self::Tcp(s) => s.shutdown(Shutdown::Both),
            Self::Unix(s) => s.shutdown(Shutdown::Both),
        };
    }
}

pub struct ClientBuilder {
    timeout: Duration,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self { timeout: DEFAULT_RPC_TIMEOUT }
    }
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the read-side deadline measured from the moment the request was
    /// fully sent (spec §5, §8 scenario 5).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn connect(self, url: &str, descriptor: std::sync::Arc<dyn ServiceDescriptor>) -> Result<Client, ConnectError> {
        let endpoint = url::parse_url(url)?;
        let stream = ClientStream::connect(&endpoint)?;
        Ok(Client {
            stream: Mutex::new(stream),
            descriptor,
            request_id: AtomicU32::new(0),
            timeout: self.timeout,
        })
    }
}

/// A connected client (spec §3 "Client"). `invoke` serializes every caller
/// behind the stream mutex — only one request may be in flight at a time
/// (spec's one-in-flight Non-goal).
pub struct Client {
    stream: Mutex<ClientStream>,
    descriptor: std::sync::Arc<dyn ServiceDescriptor>,
    request_id: AtomicU32,
    timeout: Duration,
}

impl Client {
    pub fn connect(
        url: &str,
        descriptor: std::sync::Arc<dyn ServiceDescriptor>,
    ) -> Result<Self, ConnectError> {
        ClientBuilder::new().connect(url, descriptor)
    }

    /// Sends `(method_index, input)` and blocks until a response arrives or
    /// the read deadline elapses, then calls `respond` exactly once (spec
    /// §4.9). `respond(None)` signals a timeout, EOF, or malformed
    /// response — the caller typically destroys the client afterwards.
    pub fn invoke(
        &self,
        method_index: u32,
        input: &dyn rpc_service::Message,
        mut respond: impl FnMut(Option<Box<dyn rpc_service::Message>>),
    ) {
        let mut stream = self.stream.lock().unwrap();
        let request_id = self.request_id.fetch_add(1, Ordering::SeqCst) + 1;

        let header =
            FrameHeader { method_index, message_length: input.packed_size() as u32, request_id };
        let mut buf = Vec::with_capacity(HEADER_LEN + input.packed_size());
        buf.extend_from_slice(&header.packed());
        input.pack(&mut buf);

        if !send_all(&mut stream, &buf) {
            respond(None);
            return;
        }

        let sent_at = Instant::now();
        let mut acc = ConnBuffer::new();
        loop {
            let Some(remaining) = self.timeout.checked_sub(sent_at.elapsed()) else {
                respond(None);
                return;
            };
            if !wait_readable(stream.as_raw_fd(), remaining) {
                respond(None);
                return;
            }

            let mut chunk = [0u8; 4096];
            match stream.read(&mut chunk) {
                Ok(0) => {
                    respond(None);
                    return;
                }
                Ok(n) => acc.append(&chunk[..n]),
                Err(ref e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    warn!(%err, "rpc client: read failed");
                    respond(None);
                    return;
                }
            }

            // Guard the header decode behind having seen the 4-byte status
            // prefix (spec §9 Open Question: the header must not be
            // inspected before at least that many bytes have arrived).
            if acc.len() < RESPONSE_STATUS_LEN + HEADER_LEN {
                continue;
            }
            let header_bytes = &acc.as_slice()[RESPONSE_STATUS_LEN..];
            let response_header = FrameHeader::unpack(header_bytes).expect("len checked above");
            let total = RESPONSE_STATUS_LEN + HEADER_LEN + response_header.message_length as usize;
            if acc.len() < total {
                continue;
            }

            let payload = &acc.as_slice()[RESPONSE_STATUS_LEN + HEADER_LEN..total];
            let decode_output = self.descriptor.methods()[method_index as usize].decode_output;
            match decode_output(payload) {
                Ok(message) => respond(Some(message)),
                Err(err) => {
                    warn!(%err, "rpc client: response decode failed");
                    respond(None);
                }
            }
            return;
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.stream.lock().unwrap().shutdown();
    }
}

/// `destroy_service` (spec §6): explicit for parity with the collaborator
/// API, but equivalent to dropping the client.
pub fn destroy_service(client: Client) {
    drop(client);
}

fn send_all(stream: &mut ClientStream, mut buf: &[u8]) -> bool {
    let fd = stream.as_raw_fd();
    while !buf.is_empty() {
        match send_nosignal(fd, buf) {
            Ok(0) => return false,
            Ok(n) => buf = &buf[n..],
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted => {}
            Err(_) => return false,
        }
    }
    true
}

fn wait_readable(fd: RawFd, timeout: Duration) -> bool {
    let mut pfd = libc::pollfd { fd, events: libc::POLLIN, revents: 0 };
    let ms = timeout.as_millis().min(i64::from(i32::MAX) as u128).max(1) as libc::c_int;
    let ret = unsafe { libc::poll(&mut pfd, 1, ms) };
    ret > 0 && (pfd.revents & libc::POLLIN) != 0
}
