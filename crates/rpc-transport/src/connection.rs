//! Per-connection read callback and response closure (spec §4.7, §4.8).
//!
//! A [`Connection`] owns exactly one accepted fd plus its inbound/outbound
//! [`ConnBuffer`]s. It is only ever touched by whichever worker currently
//! holds its callback entry (spec §5: "per-connection buffers ... require
//! no lock"), so nothing here synchronizes internally.

use std::{
    io::{self, Read},
    net::SocketAddr,
    os::fd::AsRawFd,
    sync::atomic::{AtomicBool, Ordering},
};

use mio::Token;
use rpc_service::{Message, Service};
use rpc_wire::{ConnBuffer, FrameHeader, HEADER_LEN, RESPONSE_STATUS_LEN};
use tracing::{debug, warn};

use crate::stream::{AcceptedStream, send_nosignal};

/// Size of the scratch buffer used to drain a readable fd (spec §4.7
/// "Drain": "read up to a fixed buffer's worth of bytes").
const READ_CHUNK: usize = 64 * 1024;

pub struct Connection {
    pub token: Token,
    pub peer: SocketAddr,
    stream: AcceptedStream,
    inbound: ConnBuffer,
    outbound: ConnBuffer,
}

impl Connection {
    pub fn new(token: Token, peer: SocketAddr, stream: AcceptedStream) -> Self {
        Self { token, peer, stream, inbound: ConnBuffer::new(), outbound: ConnBuffer::new() }
    }

    pub fn stream_mut(&mut self) -> &mut AcceptedStream {
        &mut self.stream
    }

    /// Drains the socket, frames any complete messages, and dispatches each
    /// to `service`. Returns `false` when the connection must be closed
    /// (spec §4.7: EOF, peer error, malformed frame, bad method index).
    ///
    /// `running` is checked by the response write loop so a worker stuck
    /// retrying a send against a stalled peer still unblocks promptly when
    /// the server is shutting down (spec §8 scenario 6's bounded teardown).
    pub fn drive(&mut self, service: &dyn Service, running: &AtomicBool) -> bool {
        if !self.drain() {
            return false;
        }
        self.frame_and_dispatch(service, running)
    }

    fn drain(&mut self) -> bool {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return false,
                Ok(n) => {
                    self.inbound.append(&chunk[..n]);
                    if n < chunk.len() {
                        // Likely drained the socket for now; one more read
                        // attempt will confirm via WouldBlock.
                        continue;
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return true,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!(peer = %self.peer, token = ?self.token, %err, "rpc: read failed, closing connection");
                    return false;
                }
            }
        }
    }

    fn frame_and_dispatch(&mut self, service: &dyn Service, running: &AtomicBool) -> bool {
        loop {
            if self.inbound.len() < HEADER_LEN {
                return true;
            }
            let header = FrameHeader::unpack(self.inbound.as_slice()).expect("len checked above");
            let total = HEADER_LEN + header.message_length as usize;
            if self.inbound.len() < total {
                return true;
            }

            if header.method_index as usize >= service.n_methods() {
                warn!(
                    peer = %self.peer,
                    method_index = header.method_index,
                    "rpc: method index out of range, closing connection"
                );
                return false;
            }

            let decode_input = service.methods()[header.method_index as usize].decode_input;
            let payload = &self.inbound.as_slice()[HEADER_LEN..total];
            let input = match decode_input(payload) {
                Ok(msg) => msg,
                Err(err) => {
                    warn!(peer = %self.peer, %err, "rpc: payload decode failed, closing connection");
                    return false;
                }
            };

            let stream = &mut self.stream;
            let outbound = &mut self.outbound;
            let peer = self.peer;
            service.invoke(header.method_index, input, &mut |response: Box<dyn Message>| {
                write_response(stream, outbound, &header, response.as_ref(), peer, running);
            });

            self.inbound.consume(total);
        }
    }
}

/// Packs and writes a response frame (spec §4.8). `message_length` and
/// `method_index`/`request_id` in the response header mirror the request's;
/// only the 4-byte zero status prefix is new relative to the request frame.
///
/// The retry loop checks `running` on every spin: a peer that stalls with
/// its receive window full would otherwise keep a worker retrying
/// `WouldBlock` forever, which on shutdown would make `shutdown_workers`'s
/// `join` never return (spec §7: a response write failure is abandoned
/// silently, which shutdown is, too).
fn write_response(
    stream: &mut AcceptedStream,
    outbound: &mut ConnBuffer,
    request_header: &FrameHeader,
    response: &dyn Message,
    peer: SocketAddr,
    running: &AtomicBool,
) {
    outbound.clear();
    let mut framed = Vec::with_capacity(RESPONSE_STATUS_LEN + HEADER_LEN + response.packed_size());
    framed.extend_from_slice(&[0u8; RESPONSE_STATUS_LEN]);
    let response_header = FrameHeader {
        method_index: request_header.method_index,
        message_length: response.packed_size() as u32,
        request_id: request_header.request_id,
    };
    framed.extend_from_slice(&response_header.packed());
    response.pack(&mut framed);
    outbound.append(&framed);

    let fd = stream.as_raw_fd();
    let mut sent = 0usize;
    while sent < outbound.len() {
        if !running.load(Ordering::Relaxed) {
            warn!(%peer, "rpc: server shutting down, abandoning in-flight response write");
            break;
        }
        match send_nosignal(fd, &outbound.as_slice()[sent..]) {
            Ok(0) => {
                warn!(%peer, "rpc: response write got EOF, abandoning response");
                break;
            }
            Ok(n) => sent += n,
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => {
                warn!(%peer, %err, "rpc: response write failed, abandoning response");
                break;
            }
        }
    }
    outbound.clear();
}
