//! nodedex MCP server binary
//!
//! Run with: nodedex-mcp [OPTIONS]
//!
//! Serves the node catalog and the workflow validator over the Model
//! Context Protocol on stdin/stdout. Logs go to stderr.
//!
//! ## Client configuration
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "nodedex": {
//!       "command": "nodedex-mcp",
//!       "args": ["--db", "/path/to/nodedex.db"]
//!     }
//!   }
//! }
//! ```

use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nodedex::config::Config;
use nodedex::shutdown::ShutdownCoordinator;
use nodedex::McpServer;

#[derive(Parser)]
#[command(name = "nodedex-mcp")]
#[command(about = "nodedex MCP Server - node catalog and workflow validation via Model Context Protocol")]
#[command(version)]
struct Cli {
    /// Database path (default: <data dir>/nodedex/nodedex.db or $NODEDEX_DB)
    #[arg(long, short)]
    db: Option<PathBuf>,

    /// Catalog asset to seed from (default: the bundled catalog)
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Enable debug logging (writes to stderr)
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout carries the protocol; logs must stay on stderr
    let filter = if cli.debug {
        "nodedex=debug"
    } else {
        "nodedex=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = Config::load();
    if let Some(db) = cli.db {
        config.storage.database_path = Some(db);
    }
    if let Some(catalog) = cli.catalog {
        config.catalog.data_path = Some(catalog);
    }

    let server = match start(&config).await {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to start nodedex MCP server: {:#}", e);
            std::process::exit(1);
        }
    };

    let shutdown = ShutdownCoordinator::new();
    shutdown.start_signal_listener();

    let code = match server.run_stdio(shutdown).await {
        Ok(()) => 0,
        Err(e) => {
            error!("nodedex MCP server stopped: {:#}", e);
            1
        }
    };

    // The stdin reader is a blocking thread that only returns on input or
    // EOF, and the runtime waits for it on drop. Exit without waiting.
    std::io::stdout().flush().ok();
    std::io::stderr().flush().ok();
    std::process::exit(code);
}

async fn start(config: &Config) -> anyhow::Result<McpServer> {
    let server = McpServer::from_config(config)?;

    if let Some(outcome) = server.bootstrap().await? {
        info!(?outcome, "Catalog seeded");
    }
    let stats = server.store().stats().await?;
    info!(
        nodes = stats.total_count,
        revision = ?stats.revision,
        database = %config.database_path().display(),
        "nodedex MCP server ready"
    );

    Ok(server)
}
