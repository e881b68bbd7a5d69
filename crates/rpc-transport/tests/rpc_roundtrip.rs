//! Integration tests against the public API, one per testable scenario.

use std::{
    io::{Read, Write},
    net::TcpListener,
    os::{fd::AsRawFd, unix::net::UnixStream},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use rpc_service::{
    ServiceDescriptor,
    echo::{BytesMessage, ECHO_METHOD, EchoService},
};
use rpc_transport::{Client, ClientBuilder, Server, ServerBuilder, error::ServeError};

fn run_in_background(
    mut server: Server,
) -> (UnixStream, thread::JoinHandle<Result<(), ServeError>>) {
    let (stop_read, stop_write) = UnixStream::pair().expect("socketpair");
    let stop_fd = stop_read.as_raw_fd();
    let handle = thread::spawn(move || {
        let _keep_stop_fd_alive = stop_read;
        server.run(stop_fd)
    });
    (stop_write, handle)
}

fn stop_and_join(mut stop_write: UnixStream, handle: thread::JoinHandle<Result<(), ServeError>>) {
    stop_write.write_all(&[0u8]).expect("write stop byte");
    handle.join().expect("server thread panicked").expect("server returned error");
}

fn echo_server(num_threads: usize) -> Server {
    ServerBuilder::new(Arc::new(EchoService::default()))
        .with_workers(num_threads)
        .build()
        .expect("build server")
}

fn read_exact_bytes(stream: &mut impl Read, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    stream.read_exact(&mut buf).expect("read_exact");
    buf
}

#[test]
fn unix_echo_round_trip_matches_exact_wire_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rpc-test.sock");
    let url = format!("unix://{}", path.display());

    let mut server = echo_server(2);
    server.bind_url(&url).unwrap();
    let (stop_write, handle) = run_in_background(server);

    let mut stream = UnixStream::connect(&path).unwrap();
    // method_index=0, message_length=5, request_id=1, payload "hello"
    let request: &[u8] =
        &[0, 0, 0, 0, 5, 0, 0, 0, 1, 0, 0, 0, b'h', b'e', b'l', b'l', b'o'];
    stream.write_all(request).unwrap();

    let response = read_exact_bytes(&mut stream, 20);
    let expected: &[u8] = &[
        0, 0, 0, 0, // status
        0, 0, 0, 0, // method_index
        5, 0, 0, 0, // message_length
        1, 0, 0, 0, // request_id
        b'h', b'e', b'l', b'l', b'o',
    ];
    assert_eq!(response, expected);

    drop(stream);
    stop_and_join(stop_write, handle);
    assert!(!path.exists(), "unix socket path must be unlinked on shutdown");
}

#[test]
fn ipv4_two_requests_complete_in_order() {
    let mut server = echo_server(2);
    server.bind_url("tcp://127.0.0.1:0").unwrap();
    let addr = server.local_addr("tcp://127.0.0.1:0").unwrap();
    let (stop_write, handle) = run_in_background(server);

    let descriptor: Arc<dyn ServiceDescriptor> = Arc::new(EchoService::default());
    let client = Client::connect(&format!("tcp://{addr}"), descriptor).unwrap();

    let mut responses = Vec::new();
    for payload in [b"A".as_slice(), b"B".as_slice()] {
        client.invoke(ECHO_METHOD, &BytesMessage(payload.to_vec()), |resp| {
            let mut bytes = Vec::new();
            resp.expect("response").pack(&mut bytes);
            responses.push(bytes);
        });
    }

    assert_eq!(responses, vec![b"A".to_vec(), b"B".to_vec()]);
    drop(client);
    stop_and_join(stop_write, handle);
}

#[test]
fn bad_method_index_closes_connection_others_unaffected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rpc-test.sock");
    let url = format!("unix://{}", path.display());

    let mut server = echo_server(2);
    server.bind_url(&url).unwrap();
    let (stop_write, handle) = run_in_background(server);

    let mut bad = UnixStream::connect(&path).unwrap();
    // method_index = 999, out of range for a one-method service
    let request: &[u8] = &[231, 3, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0];
    bad.write_all(request).unwrap();
    let mut buf = [0u8; 1];
    assert_eq!(bad.read(&mut buf).unwrap(), 0, "server must close the bad connection");

    let descriptor: Arc<dyn ServiceDescriptor> = Arc::new(EchoService::default());
    let client = Client::connect(&url, descriptor).unwrap();
    let mut ok = false;
    client.invoke(ECHO_METHOD, &BytesMessage(b"still alive".to_vec()), |resp| {
        ok = resp.is_some();
    });
    assert!(ok, "other connections must keep working after a bad frame elsewhere");

    drop(client);
    stop_and_join(stop_write, handle);
}

#[test]
fn frame_assembles_correctly_from_one_byte_at_a_time_delivery() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rpc-test.sock");
    let url = format!("unix://{}", path.display());

    let mut server = echo_server(2);
    server.bind_url(&url).unwrap();
    let (stop_write, handle) = run_in_background(server);

    let mut stream = UnixStream::connect(&path).unwrap();
    let request: &[u8] = &[0, 0, 0, 0, 3, 0, 0, 0, 7, 0, 0, 0, b'h', b'i', b'!'];
    for byte in request {
        stream.write_all(&[*byte]).unwrap();
    }

    let mut response = Vec::new();
    let mut byte = [0u8; 1];
    while response.len() < 19 {
        stream.read_exact(&mut byte).unwrap();
        response.push(byte[0]);
    }
    let expected: &[u8] =
        &[0, 0, 0, 0, 0, 0, 0, 0, 3, 0, 0, 0, 7, 0, 0, 0, b'h', b'i', b'!'];
    assert_eq!(response, expected);

    drop(stream);
    stop_and_join(stop_write, handle);
}

#[test]
fn client_invoke_times_out_when_server_never_responds() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let accept_thread = thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            let mut sink = [0u8; 64];
            // Read whatever arrives and never write a response back.
            let _ = stream.read(&mut sink);
            thread::sleep(Duration::from_millis(200));
        }
    });

    let descriptor: Arc<dyn ServiceDescriptor> = Arc::new(EchoService::default());
    let client = ClientBuilder::new()
        .with_timeout(Duration::from_millis(50))
        .connect(&format!("tcp://{addr}"), descriptor)
        .unwrap();

    let start = Instant::now();
    let mut got_none = false;
    client.invoke(ECHO_METHOD, &BytesMessage(b"hello".to_vec()), |resp| {
        got_none = resp.is_none();
    });
    let elapsed = start.elapsed();

    assert!(got_none, "closure must receive a null response on timeout");
    assert!(elapsed >= Duration::from_millis(50), "must wait out the full deadline");
    assert!(elapsed < Duration::from_millis(500), "must not wait much longer than the deadline");

    drop(client);
    let _ = accept_thread.join();
}

#[test]
fn graceful_shutdown_with_workers_and_idle_connections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rpc-test.sock");
    let url = format!("unix://{}", path.display());

    let mut server = echo_server(4);
    server.bind_url(&url).unwrap();
    let (stop_write, handle) = run_in_background(server);

    let idle_connections: Vec<UnixStream> =
        (0..8).map(|_| UnixStream::connect(&path).unwrap()).collect();

    let start = Instant::now();
    stop_and_join(stop_write, handle);
    assert!(start.elapsed() < Duration::from_secs(2), "shutdown must complete promptly");
    assert!(!path.exists(), "unix socket path must be unlinked on shutdown");

    drop(idle_connections);
}
