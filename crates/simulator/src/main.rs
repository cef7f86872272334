//! Chunkmesh simulator CLI.
//!
//! Builds an in-process network of chunk-store nodes, stores a random
//! payload on one of them, retrieves it from another through the
//! retrieval protocol, and optionally churns the network with a seeded
//! mocker afterwards.
//!
//! # Example
//!
//! ```bash
//! # Two nodes over in-process pipes, 8100-byte payload
//! chunkmesh-sim
//!
//! # Five nodes over TCP pipes, with offer negotiation and churn
//! chunkmesh-sim -n 5 --flavor tcp --offer-negotiation --mock-steps 50
//! ```
//!
//! Exits 0 on success, 1 on setup error, 2 on simulation failure.

use chunkmesh_network::PipeFlavor;
use chunkmesh_simulation::{
    Journal, Mocker, MockerConfig, NetConfig, ServiceFixture, SimNetwork,
};
use chunkmesh_types::NodeId;
use clap::Parser;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Chunkmesh simulator.
///
/// Runs a store-and-retrieve workload across simulated nodes connected
/// by synchronous message pipes.
#[derive(Parser, Debug)]
#[command(name = "chunkmesh-sim")]
#[command(version, about, long_about = None)]
struct Args {
    /// Number of nodes
    #[arg(short = 'n', long, default_value = "2")]
    nodes: usize,

    /// Payload size in bytes
    #[arg(short = 'p', long, default_value = "8100")]
    payload: usize,

    /// Pipe flavor: channel|socketpair|tcp
    #[arg(long, default_value = "channel")]
    flavor: PipeFlavor,

    /// Random seed for reproducible results. When omitted, a random seed is used.
    #[arg(long)]
    seed: Option<u64>,

    /// Retrieve via offer negotiation instead of direct delivery
    #[arg(long)]
    offer_negotiation: bool,

    /// Post a journal event per message sent
    #[arg(long)]
    trace_msgs: bool,

    /// Random churn actions to run after the workload
    #[arg(long, default_value = "0")]
    mock_steps: usize,

    /// Data directory (a temp dir when omitted)
    #[arg(long)]
    datadir: Option<PathBuf>,

    /// Per-hop retrieve timeout in milliseconds
    #[arg(long, default_value = "3000")]
    hop_timeout_ms: u64,
}

enum RunError {
    Setup(String),
    Simulation(String),
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => {}
        Err(RunError::Setup(message)) => {
            error!(%message, "setup failed");
            std::process::exit(1);
        }
        Err(RunError::Simulation(message)) => {
            error!(%message, "simulation failed");
            std::process::exit(2);
        }
    }
}

fn run(args: &Args) -> Result<(), RunError> {
    if args.nodes < 2 {
        return Err(RunError::Setup("need at least two nodes".into()));
    }
    let seed = args.seed.unwrap_or_else(rand::random);
    info!(
        nodes = args.nodes,
        payload = args.payload,
        flavor = ?args.flavor,
        seed,
        offer_negotiation = args.offer_negotiation,
        "starting simulation"
    );

    // ── Setup ────────────────────────────────────────────────────────
    let tempdir;
    let base_dir = match &args.datadir {
        Some(dir) => dir.clone(),
        None => {
            tempdir = tempfile::TempDir::new()
                .map_err(|e| RunError::Setup(format!("tempdir: {e}")))?;
            tempdir.path().to_path_buf()
        }
    };

    let mut fixture = ServiceFixture::new(base_dir)
        .with_hop_timeout(Duration::from_millis(args.hop_timeout_ms));
    if args.offer_negotiation {
        fixture = fixture.with_offer_negotiation();
    }

    let network = SimNetwork::new(
        NetConfig {
            flavor: args.flavor,
            trace_msgs: args.trace_msgs,
        },
        fixture.factory(),
    );
    let journal = Journal::new();
    let collector = journal.attach(network.events());

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let ids: Vec<NodeId> = (0..args.nodes)
        .map(|_| NodeId::from_bytes(&rng.gen::<[u8; 32]>()))
        .collect();
    for id in &ids {
        network
            .new_node_with_id(*id)
            .map_err(|e| RunError::Setup(e.to_string()))?;
        network.start(id).map_err(|e| RunError::Setup(e.to_string()))?;
    }
    // Full mesh: every node can serve every other directly.
    for (i, a) in ids.iter().enumerate() {
        for b in &ids[i + 1..] {
            network
                .connect(a, b)
                .map_err(|e| RunError::Setup(e.to_string()))?;
        }
    }

    // ── Workload ─────────────────────────────────────────────────────
    let payload: Vec<u8> = (0..args.payload).map(|_| rng.gen()).collect();
    let store_node = *ids.last().expect("at least two nodes");
    let fetch_node = ids[0];

    let started = Instant::now();
    let root = fixture
        .service(&store_node)
        .expect("store node service")
        .store_payload(&payload)
        .map_err(|e| RunError::Simulation(format!("store: {e}")))?;
    info!(root = %root, node = %store_node, "payload stored");

    let fetched = fixture
        .service(&fetch_node)
        .expect("fetch node service")
        .fetch_payload(&root)
        .map_err(|e| RunError::Simulation(format!("retrieve: {e}")))?;
    if fetched != payload {
        return Err(RunError::Simulation(format!(
            "payload mismatch: {} bytes retrieved, {} stored",
            fetched.len(),
            payload.len()
        )));
    }
    info!(
        bytes = fetched.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "payload retrieved intact"
    );

    // ── Optional churn ───────────────────────────────────────────────
    if args.mock_steps > 0 {
        let (actions, action_rx) = crossbeam::channel::unbounded();
        let dispatcher = network.subscribe_actions(action_rx);
        let mocker = Mocker::new(MockerConfig {
            seed,
            steps: args.mock_steps,
            interval: Duration::from_millis(5),
        });
        let posted = mocker.run(&ids, &actions);
        drop(actions);
        dispatcher
            .join()
            .map_err(|_| RunError::Simulation("dispatcher panicked".into()))?;
        info!(posted, "churn complete");
    }

    // ── Teardown ─────────────────────────────────────────────────────
    network.shutdown();
    collector
        .join()
        .map_err(|_| RunError::Simulation("journal collector panicked".into()))?;
    info!(events = journal.len(), "journal recorded");
    Ok(())
}
