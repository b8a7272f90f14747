use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tlytics_cli::commands::serve::ServeArgs;
use tlytics_cli::commands::{emit, serve, view};

#[derive(Parser)]
#[command(name = "tlytics")]
#[command(about = "tlytics - buffered event ingestion node and tools", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an ingestion node. Flags override TLYTICS_* environment variables.
    Serve {
        /// Address to listen on, e.g. 0.0.0.0:8080
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// SQLite database file
        #[arg(long)]
        db: Option<PathBuf>,

        /// Flush period in milliseconds
        #[arg(long)]
        flush_ms: Option<u64>,

        /// Bearer token required on ingestion routes
        #[arg(long)]
        auth_token: Option<String>,

        /// JSON-lines file for batches that could not be stored
        #[arg(long)]
        spill: Option<PathBuf>,
    },
    /// Show stored events, newest first
    View {
        /// SQLite database file
        #[arg(long, default_value = "tlytics.db")]
        db: PathBuf,

        #[arg(long, short)]
        page: Option<i64>,

        #[arg(long, short = 's')]
        page_size: Option<i64>,

        /// Print the page as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Send one event to a running node
    Emit {
        /// Base URL of the node, e.g. http://127.0.0.1:8080
        #[arg(long)]
        server: String,

        key: String,

        /// Event payload as a JSON object
        #[arg(long, short)]
        data: Option<String>,

        #[arg(long)]
        token: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            bind,
            db,
            flush_ms,
            auth_token,
            spill,
        } => {
            serve::run(ServeArgs {
                bind,
                db,
                flush_ms,
                auth_token,
                spill,
            })
            .await
        }
        Commands::View {
            db,
            page,
            page_size,
            json,
        } => view::run(&db, page, page_size, json),
        Commands::Emit {
            server,
            key,
            data,
            token,
        } => emit::run(&server, &key, data.as_deref(), token).await,
    }
}
