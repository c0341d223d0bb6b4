//! Integration tests for the connection lifecycle: three-way handshake and
//! graceful close.
//!
//! Each test spins up two in-process endpoints on loopback; both sides run
//! as separate tokio tasks so they can make progress concurrently.

use std::net::SocketAddr;
use std::time::Duration;

use rmtp::{Config, Connection, ConnectionState, Endpoint, TransportError};

/// Shrunk timeouts so loopback tests run quickly.
fn fast_config() -> Config {
    Config {
        rto_initial: Duration::from_millis(100),
        rto_min: Duration::from_millis(50),
        rto_max: Duration::from_secs(1),
        max_retries: 5,
        ..Config::default()
    }
}

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().expect("loopback addr")
}

/// Two connected endpoints: `(server, client, server_conn, client_conn)`.
async fn pair(cfg: Config) -> (Endpoint, Endpoint, Connection, Connection) {
    let server = Endpoint::bind(loopback(), cfg.clone()).await.expect("bind server");
    let client = Endpoint::bind(loopback(), cfg).await.expect("bind client");
    let server_addr = server.local_addr();

    let (accepted, connected) = tokio::join!(server.accept(), client.connect(server_addr));
    (server, client, accepted.expect("accept"), connected.expect("connect"))
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

#[tokio::test]
async fn handshake_both_sides_reach_established() {
    let (_s, _c, server_conn, client_conn) = pair(fast_config()).await;

    assert_eq!(client_conn.state(), ConnectionState::Established);
    assert_eq!(server_conn.state(), ConnectionState::Established);
}

#[tokio::test]
async fn handshake_agrees_on_conn_id() {
    let (_s, _c, server_conn, client_conn) = pair(fast_config()).await;

    assert_ne!(client_conn.conn_id(), 0, "conn_id must be non-zero");
    assert_eq!(client_conn.conn_id(), server_conn.conn_id());
}

#[tokio::test]
async fn handshake_samples_rtt() {
    let (_s, _c, _server_conn, client_conn) = pair(fast_config()).await;

    // The SYN was acked without retransmission, so srtt has a sample.
    let stats = client_conn.stats().await;
    assert!(stats.srtt.is_some());
    assert!(stats.rto >= Duration::from_millis(50));
}

/// Connecting to an address where nobody is listening must fail with
/// `Timeout` rather than hang forever, and the failed connection must be
/// torn down rather than left retransmitting.
#[tokio::test]
async fn connect_to_silent_peer_times_out_and_stops_retransmitting() {
    // A raw socket that receives SYNs but never answers.
    let silent = tokio::net::UdpSocket::bind("127.0.0.1:0")
        .await
        .expect("bind silent peer");
    let silent_addr = silent.local_addr().expect("silent peer addr");

    let client = Endpoint::bind(loopback(), fast_config()).await.expect("bind");
    let result = client.connect(silent_addr).await;

    assert!(
        matches!(result, Err(TransportError::Timeout)),
        "expected Timeout, got: {result:?}",
    );

    // Drain the SYNs sent before the failure surfaced.
    let mut buf = [0u8; 64];
    while tokio::time::timeout(Duration::from_millis(100), silent.recv_from(&mut buf))
        .await
        .is_ok()
    {}

    // A live connection would retransmit again within rto_max (1 s here);
    // a torn-down one stays silent.
    let quiet = tokio::time::timeout(Duration::from_millis(1300), silent.recv_from(&mut buf)).await;
    assert!(
        quiet.is_err(),
        "failed connection kept retransmitting after Timeout"
    );
}

// ---------------------------------------------------------------------------
// Close
// ---------------------------------------------------------------------------

#[tokio::test]
async fn graceful_close_reaches_closed_on_both_sides() {
    let (_s, _c, server_conn, client_conn) = pair(fast_config()).await;

    // Server consumes the EOF while the client closes.
    let server_task = tokio::spawn(async move {
        assert_eq!(server_conn.recv().await.expect("recv"), None);
        server_conn
    });

    client_conn.close().await.expect("close");
    assert_eq!(client_conn.state(), ConnectionState::Closed);

    let server_conn = server_task.await.expect("server task");
    // The passive side finishes once the final ACK lands.
    tokio::time::timeout(Duration::from_secs(2), async {
        while server_conn.state() != ConnectionState::Closed {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("server side never reached Closed");
}

#[tokio::test]
async fn close_is_idempotent() {
    let (_s, _c, server_conn, client_conn) = pair(fast_config()).await;

    // Passive side drains its EOF in the background.
    tokio::spawn(async move { server_conn.recv().await });

    client_conn.close().await.expect("first close");
    client_conn.close().await.expect("second close");
    client_conn.close().await.expect("third close");
}

#[tokio::test]
async fn send_after_close_is_rejected() {
    let (_s, _c, server_conn, client_conn) = pair(fast_config()).await;
    tokio::spawn(async move { server_conn.recv().await });

    client_conn.close().await.expect("close");
    let result = client_conn.send_msg(b"late").await;
    assert!(
        matches!(result, Err(TransportError::Closed)),
        "expected Closed, got: {result:?}",
    );
}

// ---------------------------------------------------------------------------
// Dispatcher counters
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dispatcher_counts_garbage_and_unknown_segments() {
    use rmtp::segment::{flags, Segment};

    let server = Endpoint::bind(loopback(), fast_config()).await.expect("bind");
    let server_addr = server.local_addr();

    let raw = tokio::net::UdpSocket::bind("127.0.0.1:0").await.expect("raw bind");

    // Garbage datagram: dropped at the codec boundary.
    raw.send_to(b"not a segment at all", server_addr)
        .await
        .expect("send garbage");

    // Unsolicited ACK for a connection the server has never seen.
    let stray_ack = Segment::new(flags::ACK, 0x1234_5678, 3, 9, 10, vec![]);
    raw.send_to(&stray_ack.encode(), server_addr)
        .await
        .expect("send stray ack");

    // DATA without ACK for an unknown conn_id.
    let stray_data = Segment::new(flags::DATA, 0x0bad_cafe, 1, 0, 10, b"hi".to_vec());
    raw.send_to(&stray_data.encode(), server_addr)
        .await
        .expect("send stray data");

    // SYN with the reserved zero conn_id.
    let zero_syn = Segment::new(flags::SYN, 0, 0, 0, 10, vec![]);
    raw.send_to(&zero_syn.encode(), server_addr)
        .await
        .expect("send zero syn");

    tokio::time::sleep(Duration::from_millis(200)).await;

    let stats = server.stats();
    assert_eq!(stats.corrupt_dropped(), 1);
    assert_eq!(stats.unknown_dropped(), 1);
    assert_eq!(stats.protocol_violations(), 2);
}
