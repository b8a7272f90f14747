use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tlytics_node::config::NodeConfig;
use tlytics_node::telemetry::init_telemetry;
use tlytics_node::Node;

/// Command-line overrides applied on top of the `TLYTICS_*` environment.
#[derive(Debug, Default, Clone)]
pub struct ServeArgs {
    pub bind: Option<SocketAddr>,
    pub db: Option<PathBuf>,
    pub flush_ms: Option<u64>,
    pub auth_token: Option<String>,
    pub spill: Option<PathBuf>,
}

pub fn resolve_config(base: NodeConfig, args: ServeArgs) -> anyhow::Result<NodeConfig> {
    let mut cfg = base;
    if let Some(bind) = args.bind {
        cfg.bind_addr = bind;
    }
    if let Some(db) = args.db {
        cfg.db_path = db;
    }
    if let Some(ms) = args.flush_ms {
        if ms == 0 {
            anyhow::bail!("--flush-ms must be greater than zero");
        }
        cfg.flush_period = Duration::from_millis(ms);
    }
    if let Some(token) = args.auth_token.filter(|t| !t.is_empty()) {
        cfg.auth_token = Some(token);
    }
    if let Some(spill) = args.spill {
        cfg.delivery.spill_path = Some(spill);
    }
    Ok(cfg)
}

pub async fn run(args: ServeArgs) -> anyhow::Result<()> {
    init_telemetry();

    let cfg = resolve_config(NodeConfig::from_env()?, args)?;
    print_banner(&cfg);

    let node = Node::open(cfg).await?;
    let recovered = node.recover_spilled().await?;
    if recovered > 0 {
        println!("Re-queued {} spilled events", recovered);
    }

    node.run().await?;
    Ok(())
}

fn print_banner(cfg: &NodeConfig) {
    println!(
        "tlytics node on {} (db: {}, flush every {:?}, auth: {})",
        cfg.bind_addr,
        cfg.db_path.display(),
        cfg.flush_period,
        if cfg.auth_token.is_some() { "on" } else { "off" }
    );
}
