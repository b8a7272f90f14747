// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use tlytics_node::config::NodeConfig;
use tlytics_node::errors::NodeError;
use tlytics_node::telemetry::init_telemetry;
use tlytics_node::Node;

#[tokio::main]
async fn main() {
    init_telemetry();

    if let Err(e) = run().await {
        tracing::error!("tlytics node failed: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), NodeError> {
    let cfg = NodeConfig::from_env()?;
    tracing::info!("Initializing tlytics node with config: {:?}", cfg);

    let node = Node::open(cfg).await?;

    // Batches spilled by a previous run go back into the buffer first
    let recovered = node.recover_spilled().await?;
    if recovered > 0 {
        tracing::info!("Re-queued {} spilled events", recovered);
    }

    node.run().await
}
