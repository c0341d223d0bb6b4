//! Entry point for the `rmtp` demo binary.
//!
//! Parses CLI arguments and dispatches into either **server** or **client**
//! mode.  The server echoes every message back to its sender; the client
//! forwards stdin lines and prints the replies.  All protocol work lives in
//! the library; this file owns only process setup.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use rmtp::{Config, Connection, Endpoint};

/// Reliable message transport over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,

    /// Retransmission limit before a connection is aborted.
    #[arg(long, default_value_t = 10)]
    max_retries: u32,
}

#[derive(Subcommand)]
enum Mode {
    /// Run an echo server, listening for incoming connections.
    Server {
        /// Local address to bind (e.g. 0.0.0.0:9000).
        #[arg(short, long, default_value = "0.0.0.0:9000")]
        bind: String,
    },
    /// Connect to a server and forward stdin lines as messages.
    Client {
        /// Remote server address (e.g. 127.0.0.1:9000).
        #[arg(short, long)]
        server: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let config = Config {
        max_retries: cli.max_retries,
        ..Config::default()
    };

    match cli.mode {
        Mode::Server { bind } => {
            let addr: SocketAddr = bind.parse().context("invalid bind address")?;
            run_server(addr, config).await
        }
        Mode::Client { server } => {
            let addr: SocketAddr = server.parse().context("invalid server address")?;
            run_client(addr, config).await
        }
    }
}

async fn run_server(addr: SocketAddr, config: Config) -> Result<()> {
    let endpoint = Endpoint::bind(addr, config).await?;
    log::info!("listening on {}", endpoint.local_addr());

    loop {
        let conn = endpoint.accept().await?;
        log::info!(
            "accepted conn {:08x} from {}",
            conn.conn_id(),
            conn.peer_addr()
        );
        tokio::spawn(echo(conn));
    }
}

async fn echo(conn: Connection) {
    loop {
        match conn.recv().await {
            Ok(Some(msg)) => {
                log::info!(
                    "conn {:08x}: {} byte message",
                    conn.conn_id(),
                    msg.len()
                );
                if let Err(e) = conn.send_msg(&msg).await {
                    log::warn!("echo failed: {e}");
                    break;
                }
            }
            Ok(None) => {
                log::info!("conn {:08x}: peer closed", conn.conn_id());
                break;
            }
            Err(e) => {
                log::warn!("conn {:08x}: {e}", conn.conn_id());
                break;
            }
        }
    }
    let _ = conn.close().await;
}

async fn run_client(server: SocketAddr, config: Config) -> Result<()> {
    let endpoint = Endpoint::bind("0.0.0.0:0".parse()?, config).await?;
    let conn = endpoint.connect(server).await?;
    log::info!("connected to {server} as conn {:08x}", conn.conn_id());

    // Print echoes as they come back.
    let reader_conn = conn.clone();
    let reader = tokio::spawn(async move {
        while let Ok(Some(msg)) = reader_conn.recv().await {
            println!("{}", String::from_utf8_lossy(&msg));
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.is_empty() {
            continue;
        }
        conn.send_msg(line.as_bytes()).await?;
    }

    conn.close().await?;
    reader.abort();

    let stats = conn.stats().await;
    log::info!(
        "sent {} msgs in {} segments ({} retransmitted), srtt {:?}",
        stats.messages_sent,
        stats.segments_sent,
        stats.retransmissions,
        stats.srtt
    );
    Ok(())
}
