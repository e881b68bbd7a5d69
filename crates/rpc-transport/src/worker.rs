//! Worker pool (spec §4.6): each worker waits on the wake semaphore, pops
//! the head of *working*, runs the entry's callback to completion, and
//! either reinstates it to *pending* or drops it.
//!
//! `process_claimed` is the one piece of callback logic and is shared
//! between threaded mode (called from [`worker_loop`] on a pool thread)
//! and inline mode (`num_threads == 0`, called directly from the event
//! loop thread in [`crate::server::Server::run_loop`]).

use std::{
    sync::{Arc, atomic::Ordering},
    thread::JoinHandle,
};

use mio::Token;
use tracing::{debug, warn};

use crate::{
    server::{Entry, Shared},
    socket::ListenerKind,
};

pub(crate) fn spawn_workers(shared: Arc<Shared>, num_threads: usize) -> Vec<JoinHandle<()>> {
    (0..num_threads)
        .map(|idx| {
            let shared = shared.clone();
            std::thread::Builder::new()
                .name(format!("rpc-worker-{idx}"))
                .spawn(move || worker_loop(&shared))
                .expect("failed to spawn rpc worker thread")
        })
        .collect()
}

/// Posts the semaphore once per worker so each notices `running == false`
/// and exits, then joins them all (spec §4.6: "the stopper posts the
/// semaphore once per worker, waits briefly, then cancels and joins").
/// `pthread_cancel` for stragglers has no Rust equivalent and is not
/// reproduced; instead, the one place a worker could otherwise block
/// indefinitely against a stalled peer — the response write retry loop in
/// `connection::write_response` — checks `running` on every spin and
/// abandons the write once it goes false, so a worker always comes back
/// around to `signal.wait()` and observes shutdown promptly (see
/// DESIGN.md's Open Question resolution).
pub(crate) fn shutdown_workers(shared: &Shared, workers: Vec<JoinHandle<()>>) {
    for _ in &workers {
        shared.signal.post();
    }
    for worker in workers {
        let _ = worker.join();
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        shared.signal.wait();
        if !shared.running.load(Ordering::SeqCst) {
            return;
        }
        let Some((token, entry)) = shared.pop_working() else {
            continue;
        };
        if let Some(entry) = process_claimed(shared, token, entry) {
            shared.reinsert_pending(token, entry);
        }
    }
}

/// Runs one claimed entry's callback. Returns `Some(entry)` to reinstate
/// it as *pending*, or `None` if the callback signalled that the fd should
/// be dropped (spec §4.6 steps 3-5).
pub(crate) fn process_claimed(shared: &Shared, token: Token, entry: Entry) -> Option<Entry> {
    match entry {
        Entry::Listener(mut listener) => {
            accept_all(shared, &mut listener);
            Some(Entry::Listener(listener))
        }
        Entry::Connection(mut conn) => {
            if conn.drive(shared.service.as_ref(), &shared.running) {
                Some(Entry::Connection(conn))
            } else {
                conn.stream_mut().shutdown();
                None
            }
        }
    }
}

/// Accepts every connection currently queued on `listener`, tolerating
/// `EINTR`/`EAGAIN` as spurious wakeups (spec §4.4).
fn accept_all(shared: &Shared, listener: &mut ListenerKind) {
    loop {
        match listener.accept() {
            Ok((mut stream, peer)) => {
                let token = shared.next_token();
                if let Err(err) = stream.register(&shared.registry, token) {
                    warn!(%err, "rpc: failed to register accepted connection");
                    continue;
                }
                debug!(%peer, ?token, "rpc: accepted connection");
                let conn = crate::connection::Connection::new(token, peer, stream);
                shared.insert_new_pending(token, Entry::Connection(conn));
            }
            Err(ref e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::Interrupted =>
            {
                return;
            }
            Err(err) => {
                debug!(%err, "rpc: accept failed");
                return;
            }
        }
    }
}
