//! Tests for the socket listener.

use std::net::{IpAddr, Ipv4Addr, TcpStream};
use std::sync::Arc;

use rstest::{fixture, rstest};

use netschedule_config::SocketEndpoint;

use super::listener::SocketListener;
use super::{ConnectionHandler, ListenerError, PeerRecorder};

#[fixture]
fn tcp_endpoint() -> SocketEndpoint {
    SocketEndpoint::tcp("127.0.0.1", 0)
}

#[rstest]
fn tcp_listener_hands_over_loopback_peers(tcp_endpoint: SocketEndpoint) {
    let listener = SocketListener::bind(&tcp_endpoint).expect("bind tcp listener");
    let addr = listener
        .local_addr()
        .expect("listener should report local address");
    let recorder = PeerRecorder::new();
    let handler: Arc<dyn ConnectionHandler> = recorder.clone();
    let handle = listener.start(handler).expect("start listener");

    TcpStream::connect(addr).expect("connect first client");
    TcpStream::connect(addr).expect("connect second client");

    assert!(recorder.wait_for(2), "expected two connections");
    assert!(
        recorder
            .peers()
            .iter()
            .all(|peer| *peer == IpAddr::V4(Ipv4Addr::LOCALHOST))
    );
    handle.shutdown();
    handle.join().expect("join listener");
}

#[rstest]
fn shutdown_stops_accepting(tcp_endpoint: SocketEndpoint) {
    let listener = SocketListener::bind(&tcp_endpoint).expect("bind tcp listener");
    let addr = listener.local_addr().expect("local address");
    let handle = listener.start(PeerRecorder::new()).expect("start listener");

    handle.shutdown();
    handle.join().expect("join listener");

    assert!(TcpStream::connect(addr).is_err(), "port should be closed");
}

#[cfg(unix)]
#[fixture]
fn unix_tempdir() -> tempfile::TempDir {
    tempfile::tempdir().expect("temp dir")
}

#[cfg(unix)]
#[rstest]
fn unix_listener_replaces_stale_sockets_and_reports_loopback(unix_tempdir: tempfile::TempDir) {
    let path = unix_tempdir.path().join("netscheduled.sock");
    {
        let _stale = std::os::unix::net::UnixListener::bind(&path).expect("bind stale listener");
    }
    assert!(path.exists(), "stale socket should remain");

    let endpoint = SocketEndpoint::unix(path.to_str().expect("utf8 path"));
    let listener = SocketListener::bind(&endpoint).expect("bind new listener");
    let recorder = PeerRecorder::new();
    let handle = listener.start(recorder.clone()).expect("start listener");

    std::os::unix::net::UnixStream::connect(&path).expect("connect unix client");
    assert!(recorder.wait_for(1), "expected one connection");
    assert_eq!(recorder.peers(), vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]);

    handle.shutdown();
    handle.join().expect("join listener");
    assert!(!path.exists(), "listener should remove unix socket on shutdown");
}

#[cfg(unix)]
#[rstest]
fn unix_listener_rejects_in_use_socket(unix_tempdir: tempfile::TempDir) {
    let path = unix_tempdir.path().join("netscheduled.sock");
    let _existing = std::os::unix::net::UnixListener::bind(&path).expect("bind existing listener");

    let endpoint = SocketEndpoint::unix(path.to_str().expect("utf8 path"));
    let error = SocketListener::bind(&endpoint).expect_err("should fail bind");
    assert!(matches!(error, ListenerError::UnixInUse { .. }));
}

#[cfg(unix)]
#[rstest]
fn unix_listener_refuses_to_replace_regular_files(unix_tempdir: tempfile::TempDir) {
    let path = unix_tempdir.path().join("netscheduled.sock");
    std::fs::write(&path, b"not a socket").expect("write placeholder");

    let endpoint = SocketEndpoint::unix(path.to_str().expect("utf8 path"));
    let error = SocketListener::bind(&endpoint).expect_err("should fail bind");

    assert!(matches!(error, ListenerError::NotASocket { .. }));
    assert!(path.is_file(), "regular file should be left alone");
}
