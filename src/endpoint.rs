//! Endpoint dispatcher: one UDP socket multiplexed across connections.
//!
//! An [`Endpoint`] owns the socket, the connection table keyed by conn_id,
//! and two background tasks:
//!
//! - a **receive loop** that blocks on the socket, drops corrupt datagrams,
//!   creates responder connections for fresh SYNs, and routes everything
//!   else to the owning connection;
//! - a **timer task** that drives every connection's retransmission and
//!   delayed-ACK deadlines and reaps connections that have lingered in
//!   CLOSED.
//!
//! The same endpoint can initiate connections ([`Endpoint::connect`]) and
//! accept them ([`Endpoint::accept`]); both return the same [`Connection`]
//! handle type.  Connections never reference the endpoint back — they carry
//! only the shared socket — so dropping the endpoint stops dispatch without
//! ownership cycles.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::connection::{self, Connection, Role};
use crate::error::TransportError;
use crate::segment::{flags, Segment};
use crate::sim::Faults;
use crate::socket::Socket;
use crate::stats::EndpointStats;

/// Timer-task granularity.
const TICK: Duration = Duration::from_millis(10);

/// How long a closed connection stays in the table so late retransmissions
/// from the peer still earn a courtesy ACK.
const CLOSED_LINGER: Duration = Duration::from_secs(3);

struct EndpointShared {
    socket: Arc<Socket>,
    cfg: Config,
    conns: Mutex<HashMap<u32, Arc<connection::Shared>>>,
    accept_tx: mpsc::UnboundedSender<Connection>,
    stats: EndpointStats,
}

/// A protocol endpoint bound to one UDP socket.
pub struct Endpoint {
    shared: Arc<EndpointShared>,
    accept_rx: Mutex<mpsc::UnboundedReceiver<Connection>>,
    recv_task: JoinHandle<()>,
    timer_task: JoinHandle<()>,
}

impl Endpoint {
    /// Bind a UDP socket and start dispatching.
    ///
    /// Port 0 asks the OS for an ephemeral port; see [`Endpoint::local_addr`].
    pub async fn bind(addr: SocketAddr, cfg: Config) -> Result<Self, TransportError> {
        let socket = Socket::bind(addr).await?;
        Ok(Self::with_socket(socket, cfg))
    }

    /// Wrap an already-bound [`Socket`] (used by tests that attach faults).
    pub fn with_socket(socket: Socket, cfg: Config) -> Self {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(EndpointShared {
            socket: Arc::new(socket),
            cfg,
            conns: Mutex::new(HashMap::new()),
            accept_tx,
            stats: EndpointStats::default(),
        });
        let recv_task = tokio::spawn(recv_loop(shared.clone()));
        let timer_task = tokio::spawn(timer_loop(shared.clone()));
        Self {
            shared,
            accept_rx: Mutex::new(accept_rx),
            recv_task,
            timer_task,
        }
    }

    /// The resolved local address of the underlying socket.
    pub fn local_addr(&self) -> SocketAddr {
        self.shared.socket.local_addr
    }

    /// Dispatcher-level counters.
    pub fn stats(&self) -> &EndpointStats {
        &self.shared.stats
    }

    /// Attach or remove a fault model on this endpoint's send path.
    pub async fn set_faults(&self, faults: Option<Faults>) {
        self.shared.socket.set_faults(faults).await;
    }

    /// Actively open a connection to `remote`.
    ///
    /// Picks a random non-zero conn_id, sends SYN, and waits for the
    /// handshake; fails with [`TransportError::Timeout`] once the SYN has
    /// exhausted its retransmission schedule (`rto_initial` doubling per
    /// timeout up to `rto_max`, `max_retries` times) without an answer.  A
    /// failed connection is torn down and its conn_id released.
    pub async fn connect(&self, remote: SocketAddr) -> Result<Connection, TransportError> {
        let conn = {
            let mut conns = self.shared.conns.lock().await;
            let conn_id = {
                let mut rng = rand::rng();
                loop {
                    let id: u32 = rng.random();
                    if id != 0 && !conns.contains_key(&id) {
                        break id;
                    }
                }
            };
            let (conn, syn) = Connection::open(
                Role::Initiator,
                conn_id,
                remote,
                self.shared.socket.clone(),
                self.shared.cfg.clone(),
            );
            conns.insert(conn_id, conn.shared.clone());
            log::info!("[conn {conn_id:08x}] connecting to {remote}");
            self.shared.socket.send_segment(&syn, remote).await?;
            conn
        };
        if let Err(err) = conn.wait_established().await {
            self.discard(&conn).await;
            return Err(err);
        }
        Ok(conn)
    }

    /// Wait for the next inbound connection to complete its handshake.
    ///
    /// An inbound connection whose handshake never finishes is torn down
    /// and deregistered, and the failure is surfaced to the caller.
    pub async fn accept(&self) -> Result<Connection, TransportError> {
        let conn = self
            .accept_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::Closed)?;
        if let Err(err) = conn.wait_established().await {
            self.discard(&conn).await;
            return Err(err);
        }
        Ok(conn)
    }

    /// Stop and deregister a connection whose handshake failed, so it
    /// neither retransmits further nor occupies its conn_id slot.
    async fn discard(&self, conn: &Connection) {
        conn.shared.core.lock().await.teardown(Instant::now());
        self.shared.conns.lock().await.remove(&conn.conn_id());
        log::debug!("[conn {:08x}] discarded after failed handshake", conn.conn_id());
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.recv_task.abort();
        self.timer_task.abort();
    }
}

// ---------------------------------------------------------------------------
// Receive loop
// ---------------------------------------------------------------------------

async fn recv_loop(shared: Arc<EndpointShared>) {
    loop {
        let (decoded, addr) = match shared.socket.recv_segment().await {
            Ok(v) => v,
            // UDP read errors (e.g. ICMP port unreachable) are transient.
            Err(e) => {
                log::debug!("socket recv error: {e}");
                continue;
            }
        };
        let segment = match decoded {
            Ok(s) => s,
            Err(e) => {
                shared.stats.note_corrupt();
                log::debug!("dropping corrupt datagram from {addr}: {e}");
                continue;
            }
        };
        dispatch(&shared, segment, addr).await;
    }
}

/// Route one valid segment: fresh SYNs create connections, everything else
/// goes to the connection owning the conn_id.
async fn dispatch(shared: &Arc<EndpointShared>, segment: Segment, addr: SocketAddr) {
    let h = segment.header.clone();

    if h.flags & flags::SYN != 0 && h.flags & flags::ACK == 0 {
        if h.conn_id == 0 {
            shared.stats.note_violation();
            return;
        }
        let mut conns = shared.conns.lock().await;
        match conns.get(&h.conn_id) {
            // Retransmitted SYN from the same peer: the pending SYN|ACK
            // retransmit already covers it.
            Some(existing) if existing.peer == addr => {}
            Some(_) => {
                shared.stats.note_violation();
                log::warn!("SYN for live conn_id {:08x} from {addr}, dropped", h.conn_id);
            }
            None => {
                let (conn, syn_ack) = Connection::open(
                    Role::Responder,
                    h.conn_id,
                    addr,
                    shared.socket.clone(),
                    shared.cfg.clone(),
                );
                conns.insert(h.conn_id, conn.shared.clone());
                log::info!("[conn {:08x}] incoming from {addr}", h.conn_id);
                let _ = shared.socket.send_segment(&syn_ack, addr).await;
                let _ = shared.accept_tx.send(conn);
            }
        }
        return;
    }

    let conn = shared.conns.lock().await.get(&h.conn_id).cloned();
    let Some(conn) = conn else {
        if h.flags & flags::ACK != 0 {
            // Unsolicited ACK for a connection we know nothing about.
            shared.stats.note_violation();
        } else {
            shared.stats.note_unknown();
        }
        return;
    };
    if conn.peer != addr {
        shared.stats.note_violation();
        return;
    }

    let mut core = conn.core.lock().await;
    let replies = core.on_segment(segment, Instant::now());
    for reply in &replies {
        let _ = shared.socket.send_segment(reply, conn.peer).await;
    }
}

// ---------------------------------------------------------------------------
// Timer task
// ---------------------------------------------------------------------------

async fn timer_loop(shared: Arc<EndpointShared>) {
    let mut interval = tokio::time::interval(TICK);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;

        let conns: Vec<Arc<connection::Shared>> =
            shared.conns.lock().await.values().cloned().collect();
        if conns.is_empty() {
            continue;
        }

        let now = Instant::now();
        let mut reap = Vec::new();
        for conn in conns {
            let mut core = conn.core.lock().await;
            let due = core.on_tick(now);
            for segment in &due {
                let _ = shared.socket.send_segment(segment, conn.peer).await;
            }
            if core.reapable(now, CLOSED_LINGER) {
                reap.push(conn.conn_id);
            }
        }

        if !reap.is_empty() {
            let mut conns = shared.conns.lock().await;
            for conn_id in reap {
                conns.remove(&conn_id);
                log::debug!("[conn {conn_id:08x}] reaped");
            }
        }
    }
}
