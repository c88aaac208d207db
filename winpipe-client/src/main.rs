//! winpipe client entry point.
//!
//! ```text
//! winpipe-client                      Connect with defaults
//! winpipe-client --server host:port   Override the server address
//! winpipe-client --dump-dir shots     Write closed windows as PNG
//! winpipe-client --config <path>      Use custom config TOML
//! winpipe-client --gen-config         Dump default config and exit
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use winpipe_client::config::ClientConfig;
use winpipe_client::connection::ServerConnection;
use winpipe_client::display::Display;
use winpipe_client::session::{ClientSession, SessionEnd};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "winpipe-client", about = "winpipe window streaming client")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "winpipe-client.toml")]
    config: PathBuf,

    /// Server address (overrides config). Example: 192.168.1.100:10000
    #[arg(short, long)]
    server: Option<String>,

    /// Directory to dump closed windows into (overrides config).
    #[arg(short, long)]
    dump_dir: Option<String>,

    /// Accepted encodings, comma separated (overrides config).
    #[arg(short, long, value_delimiter = ',')]
    encodings: Option<Vec<String>>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&ClientConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = ClientConfig::load(&cli.config);
    if let Some(addr) = cli.server {
        config.network.server = addr;
    }
    if let Some(dir) = cli.dump_dir {
        config.display.dump_dir = dir;
    }
    if let Some(encodings) = cli.encodings {
        config.encoding.encodings = encodings;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("winpipe-client v{}", env!("CARGO_PKG_VERSION"));

    let server = ServerConnection::connect(&config).await?;
    let session = ClientSession::new(server, Display::new(config.dump_dir()));

    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, disconnecting");
    };
    let (end, summary) = session.run(shutdown).await?;

    match end {
        SessionEnd::Disconnected(reason) => info!("server closed the session: {reason}"),
        SessionEnd::ConnectionClosed => info!("connection lost"),
        SessionEnd::Shutdown => info!("disconnected"),
    }
    info!(
        "{} windows, {} draws ({} failed), {} dumps",
        summary.windows,
        summary.draws,
        summary.failed_draws,
        summary.dumps.len()
    );

    Ok(())
}
