//! Server lifecycle, event loop, and the *pending*/*working* bookkeeping of
//! spec §3/§4.5/§4.6.
//!
//! Unlike the original `poll(2)`-over-a-rebuilt-array design, registration
//! here lives in `mio`'s kernel-side table and never moves; *pending* and
//! *working* become a purely logical, mutex-guarded split of which token a
//! worker currently owns (see SPEC_FULL.md's Server event loop supplement).
//! A readiness notification for a token no longer in *pending* (already
//! claimed by a worker, or a stale/duplicate wakeup) is simply ignored —
//! this replaces the "pending set size changed, restart the iteration"
//! rule, which has no failure mode left to guard against once events are
//! correlated by `Token` instead of array index.
//!
//! `mio`'s epoll backend is edge-triggered: a source only reports readiness
//! once per edge, and nothing re-arms it automatically. A connection handed
//! to a worker (moved to *working*) and drained to `WouldBlock` has already
//! consumed its edge; if the worker's subsequent response write races with
//! a new request arriving on that fd, the edge can be delivered and
//! discarded (the token is still in *working*, so `claim_pending` finds
//! nothing) before the worker reinstates the entry to *pending* — a lost
//! wakeup that stalls the connection forever. [`Shared::reinsert_pending`]
//! closes this by calling `reregister` (`EPOLL_CTL_MOD`) on the entry's
//! source before it goes back into *pending*, which re-arms detection of
//! whatever the fd's current readiness actually is, regardless of what
//! edge was missed while the entry was *working*.

use std::{
    collections::{HashMap, VecDeque},
    io,
    os::fd::RawFd,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use mio::{Events, Interest, Poll, Token, unix::SourceFd};
use rpc_service::Service;
use rpc_utils::safe_assert;
use tracing::{debug, info};

use crate::{
    connection::Connection,
    error::{BindError, ServeError},
    socket::ListenerKind,
    url::{self, Endpoint},
    worker,
};

/// Reserved token for the caller-supplied stop fd; ordinary listeners and
/// connections are allocated tokens starting at 1.
pub(crate) const STOP_TOKEN: Token = Token(0);
const FIRST_DYNAMIC_TOKEN: usize = 1;

pub(crate) enum Entry {
    Listener(ListenerKind),
    Connection(Connection),
}

impl Entry {
    /// Re-arms this entry's source for readiness (`EPOLL_CTL_MOD`) before
    /// it goes back into *pending*. Required because `mio`'s epoll backend
    /// is edge-triggered and does not re-deliver an edge a worker consumed
    /// while the entry was *working* (see the module doc comment).
    fn reregister(&mut self, registry: &mio::Registry, token: Token) -> io::Result<()> {
        match self {
            Self::Listener(listener) => listener.reregister(registry, token),
            Self::Connection(conn) => conn.stream_mut().reregister(registry, token),
        }
    }
}

/// Bookkeeping for one bound listener: enough to match `unbind_url`'s
/// by-value semantics and to unlink a UNIX path on teardown. The owned
/// [`ListenerKind`] itself lives in the registry as an ordinary
/// [`Entry::Listener`] (spec's "listener registered as an ordinary pending
/// callback").
struct BoundRecord {
    endpoint: Endpoint,
    token: Token,
}

pub(crate) struct Inner {
    pub pending: HashMap<Token, Entry>,
    pub working: VecDeque<(Token, Entry)>,
}

pub(crate) struct Shared {
    pub service: Arc<dyn Service>,
    pub registry: mio::Registry,
    pub inner: Mutex<Inner>,
    pub signal: crate::semaphore::WorkerSignal,
    pub running: AtomicBool,
    next_token: AtomicUsize,
}

impl Shared {
    /// Allocates a fresh token, unique for the lifetime of this server, for
    /// a newly accepted connection or a newly bound listener.
    pub fn next_token(&self) -> Token {
        Token(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    pub fn claim_pending(&self, token: Token) -> Option<Entry> {
        self.inner.lock().unwrap().pending.remove(&token)
    }

    /// Re-arms `entry`'s source and moves it back into *pending*. The
    /// reregister happens before the entry is visible to the event loop
    /// again, so no readiness that occurred while it was *working* is lost
    /// (see the module doc comment and `Entry::reregister`).
    pub fn reinsert_pending(&self, token: Token, mut entry: Entry) {
        if let Err(err) = entry.reregister(&self.registry, token) {
            tracing::warn!(?token, %err, "rpc: failed to re-arm fd for polling, closing it");
            close_entry(entry, &self.registry);
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        safe_assert!(!inner.pending.contains_key(&token), "token {token:?} already pending");
        inner.pending.insert(token, entry);
    }

    pub fn push_working(&self, token: Token, entry: Entry) {
        let mut inner = self.inner.lock().unwrap();
        inner.working.push_back((token, entry));
    }

    pub fn pop_working(&self) -> Option<(Token, Entry)> {
        self.inner.lock().unwrap().working.pop_front()
    }

    pub fn insert_new_pending(&self, token: Token, entry: Entry) {
        let mut inner = self.inner.lock().unwrap();
        inner.pending.insert(token, entry);
    }
}

/// A single running server: one event-loop thread (the caller of
/// [`Server::run`]/[`provide_service`]) plus an optional fixed pool of
/// worker threads.
///
/// Spec §9 replaces the C source's `__thread rpc_server_t tl_server` with an
/// explicit value owned by the caller's stack frame — there is no process-
/// or thread-wide singleton, so one OS thread may happily run more than one
/// `Server` sequentially, and `Server` itself is just a plain struct.
pub struct Server {
    poll: Poll,
    shared: Arc<Shared>,
    bound: Vec<BoundRecord>,
    num_threads: usize,
}

pub struct ServerBuilder {
    service: Arc<dyn Service>,
    num_threads: usize,
}

impl ServerBuilder {
    pub fn new(service: Arc<dyn Service>) -> Self {
        Self { service, num_threads: 0 }
    }

    /// Sets the size of the worker pool. `0` (the default) runs every
    /// callback inline on the event-loop thread (spec §4.5's degraded but
    /// valid fallback).
    pub fn with_workers(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    pub fn build(self) -> io::Result<Server> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        Ok(Server {
            poll,
            shared: Arc::new(Shared {
                service: self.service,
                registry,
                inner: Mutex::new(Inner { pending: HashMap::new(), working: VecDeque::new() }),
                signal: crate::semaphore::WorkerSignal::new(),
                running: AtomicBool::new(false),
                next_token: AtomicUsize::new(FIRST_DYNAMIC_TOKEN),
            }),
            bound: Vec::new(),
            num_threads: self.num_threads,
        })
    }
}

impl Server {
    /// Binds `url`, registering the new listener as an ordinary *pending*
    /// callback entry (spec §4.4, SPEC_FULL.md's listener-as-callback
    /// supplement).
    ///
    /// Expected to be called from the same thread that will (or does) call
    /// [`Server::run`], before the loop starts (spec §5: "BoundSocket list
    /// is mutated only on the event-loop thread... as is startup").
    pub fn bind_url(&mut self, url: &str) -> Result<(), BindError> {
        let endpoint = url::parse_url(url)?;
        let mut listener = ListenerKind::bind(&endpoint)?;
        let token = self.shared.next_token();
        listener.register(self.poll.registry(), token)?;
        self.shared.insert_new_pending(token, Entry::Listener(listener));
        self.bound.push(BoundRecord { endpoint, token });
        Ok(())
    }

    /// The address the kernel actually bound for `url`, e.g. after binding
    /// `tcp://127.0.0.1:0` and letting the OS pick a port. Only meaningful
    /// before [`Server::run`] claims the listener out of *pending*.
    pub fn local_addr(&self, url: &str) -> Result<std::net::SocketAddr, BindError> {
        let endpoint = url::parse_url(url)?;
        let token = self
            .bound
            .iter()
            .find(|b| b.endpoint == endpoint)
            .map(|b| b.token)
            .ok_or_else(|| BindError::Io(io::Error::new(io::ErrorKind::NotFound, "not bound")))?;
        let inner = self.shared.inner.lock().unwrap();
        match inner.pending.get(&token) {
            Some(Entry::Listener(listener)) => listener.local_addr().map_err(BindError::Io),
            _ => Err(BindError::Io(io::Error::new(io::ErrorKind::NotFound, "listener not pending"))),
        }
    }

    /// Removes the bound socket matching `url` by (family, address) value,
    /// not by fd (spec/SPEC_FULL.md's `rpc_unbind_url` supplement).
    pub fn unbind_url(&mut self, url: &str) -> Result<(), BindError> {
        let endpoint = url::parse_url(url)?;
        let Some(pos) = self.bound.iter().position(|b| b.endpoint == endpoint) else {
            return Ok(());
        };
        let record = self.bound.swap_remove(pos);
        if let Some(Entry::Listener(mut listener)) =
            self.shared.inner.lock().unwrap().pending.remove(&record.token)
        {
            let _ = listener.deregister(self.poll.registry());
            listener.unlink();
        }
        Ok(())
    }

    /// Runs the event loop until `stop_fd` becomes readable. Blocks the
    /// calling thread for the duration (spec §6: "blocks until stopped").
    ///
    /// The worker pool size is set via [`ServerBuilder::with_workers`];
    /// `0` (the default) runs every callback inline on this thread (spec
    /// §4.5, "the degraded but valid fallback").
    pub fn run(&mut self, stop_fd: RawFd) -> Result<(), ServeError> {
        self.poll.registry().register(&mut SourceFd(&stop_fd), STOP_TOKEN, Interest::READABLE)?;
        self.shared.running.store(true, Ordering::SeqCst);

        let workers = worker::spawn_workers(self.shared.clone(), self.num_threads);

        let mut events = Events::with_capacity(128);
        let result = self.run_loop(&mut events, self.num_threads);

        self.shared.running.store(false, Ordering::SeqCst);
        worker::shutdown_workers(&self.shared, workers);
        self.teardown_all();
        let _ = self.poll.registry().deregister(&mut SourceFd(&stop_fd));

        result
    }

    fn run_loop(&mut self, events: &mut Events, num_threads: usize) -> Result<(), ServeError> {
        loop {
            self.poll.poll(events, None)?;
            for event in events.iter() {
                let token = event.token();
                if token == STOP_TOKEN {
                    info!("rpc: stop fd fired, shutting down");
                    return Ok(());
                }

                let Some(entry) = self.shared.claim_pending(token) else {
                    // Already working, or removed by unbind/disconnect.
                    continue;
                };

                if num_threads == 0 {
                    if let Some(entry) = worker::process_claimed(&self.shared, token, entry) {
                        self.shared.reinsert_pending(token, entry);
                    }
                } else {
                    self.shared.push_working(token, entry);
                    self.shared.signal.post();
                }
            }
        }
    }

    fn teardown_all(&mut self) {
        let mut inner = self.shared.inner.lock().unwrap();
        for (_, entry) in inner.pending.drain() {
            close_entry(entry, self.poll.registry());
        }
        for (_, entry) in inner.working.drain(..) {
            close_entry(entry, self.poll.registry());
        }
        drop(inner);
        for record in self.bound.drain(..) {
            debug!(token = ?record.token, "rpc: server shutdown, listener already closed");
        }
    }
}

fn close_entry(entry: Entry, registry: &mio::Registry) {
    match entry {
        Entry::Listener(mut listener) => {
            let _ = listener.deregister(registry);
            listener.unlink();
        }
        Entry::Connection(mut conn) => {
            conn.stream_mut().shutdown();
        }
    }
}

/// Convenience wrapper matching spec §6's documented signature: binds
/// `url`, serves it until `stop_fd` fires, then tears everything down.
///
/// For more than one listener, build a [`Server`] directly and call
/// [`Server::bind_url`] repeatedly before [`Server::run`].
pub fn provide_service(
    url: &str,
    service: Arc<dyn Service>,
    num_threads: usize,
    stop_fd: RawFd,
) -> Result<(), ServeError> {
    let mut server = ServerBuilder::new(service).with_workers(num_threads).build()?;
    server.bind_url(url)?;
    server.run(stop_fd)
}
