//! Two-node in-process demonstration harness for `rfmesh-core`.
//!
//! Wires two [`rfmesh_core::MeshNode`]s back to back over an in-memory
//! loopback "radio" and drives them through a handshake, a unicast
//! exchange, a broadcast, and a graceful disconnect -- exercising the
//! same scenarios the core's own integration test covers, but through
//! the public API a real host application would use.

mod host;
mod radio;
mod store;

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::info;

use rfmesh_core::{Mac, MeshConfig, MeshNode};

use host::LoggingHost;
use radio::LoopbackRadio;
use store::MemoryStore;

type DemoNode = MeshNode<LoggingHost, LoopbackRadio, MemoryStore, host::OsRandom>;

#[derive(Parser)]
#[command(name = "rfmesh", about = "rfmesh protocol demo harness")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a scripted two-node session: connect, unicast, broadcast, disconnect.
    Demo,
}

fn demo_config() -> MeshConfig {
    MeshConfig {
        broadcast_lfsr: [0xdead_beef, 0x1234_5678],
        broadcast_mask1: [1, 3, 5],
        broadcast_mask2: [7, 11, 13],
        dh_p: 0xFFFF_FFFB,
        dh_g: 5,
        broadcast_relay_enabled: true,
        retransmit_tick_interval_ms: 100,
        retransmit_budget_ticks: 5,
        unknown_peer_capacity: 64,
        max_rebroadcast_copies: 2,
    }
}

async fn run_demo() -> Result<(), Box<dyn std::error::Error>> {
    let mac_a = Mac([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
    let mac_b = Mac([0x02, 0x00, 0x00, 0x00, 0x00, 0x02]);

    let radio_a = LoopbackRadio::new();
    let radio_b = LoopbackRadio::new();

    let node_a: Arc<DemoNode> = MeshNode::new(
        mac_a,
        demo_config(),
        LoggingHost::new("a"),
        radio_a.clone(),
        MemoryStore::new(),
        host::OsRandom,
    )
    .await
    .map_err(|e| format!("node a init failed: {e}"))?;

    let node_b: Arc<DemoNode> = MeshNode::new(
        mac_b,
        demo_config(),
        LoggingHost::new("b"),
        radio_b.clone(),
        MemoryStore::new(),
        host::OsRandom,
    )
    .await
    .map_err(|e| format!("node b init failed: {e}"))?;

    let (a, b) = (node_a.clone(), node_b.clone());
    radio_a.set_peer(Arc::new(move |frame| b.on_frame_received(frame)));
    radio_b.set_peer(Arc::new(move |frame| a.on_frame_received(frame)));

    info!("-- connecting a -> b --");
    node_a.connect(mac_b).await?;
    tokio::time::sleep(Duration::from_millis(300)).await;

    info!("connected peers of a: {:?}", node_a.connected_devices());
    info!("connected peers of b: {:?}", node_b.connected_devices());

    info!("-- unicast a -> b --");
    node_a.write(mac_b, b"hello from a").await?;
    tokio::time::sleep(Duration::from_millis(300)).await;

    info!("-- broadcast from a --");
    node_a.write_broadcast(b"hello, mesh").await?;
    tokio::time::sleep(Duration::from_millis(300)).await;

    info!("-- graceful disconnect a -> b --");
    node_a.disconnect(mac_b).await?;
    tokio::time::sleep(Duration::from_millis(300)).await;

    info!("connected peers of a: {:?}", node_a.connected_devices());
    info!("connected peers of b: {:?}", node_b.connected_devices());

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Demo => run_demo().await,
    }
}
