//! winpipe server entry point.
//!
//! ```text
//! winpipe-server                  Run in the foreground
//! winpipe-server --config <path>  Load a custom config TOML
//! winpipe-server --gen-config     Write default config to stdout
//! winpipe-server --bind 127.0.0.1 --port 10001
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use winpipe_server::config::ServerConfig;
use winpipe_server::service::WinpipeServer;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "winpipe-server", about = "winpipe window streaming server")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "winpipe-server.toml")]
    config: PathBuf,

    /// Override the bind address.
    #[arg(long)]
    bind: Option<String>,

    /// Override the listen port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the preferred encoding.
    #[arg(short, long)]
    encoding: Option<String>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&ServerConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // Load config, then apply CLI overrides.
    let mut config = ServerConfig::load(&cli.config);
    if let Some(bind) = cli.bind {
        config.network.bind = bind;
    }
    if let Some(port) = cli.port {
        config.network.port = port;
    }
    if let Some(encoding) = cli.encoding {
        config.encoding.encoding = encoding;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("winpipe-server v{}", env!("CARGO_PKG_VERSION"));
    info!("listen address: {}", config.listen_addr());
    info!(
        "windows: {} x {:?} {}x{} @ {} fps",
        config.capture.windows,
        config.capture.source,
        config.capture.width,
        config.capture.height,
        config.capture.fps
    );
    info!("preferred encoding: {}", config.preferred_encoding());

    let service = WinpipeServer::new(config);
    let stop = service.shutdown_handle();

    // Ctrl-C handler.
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.cancel();
    });

    service.run().await?;

    Ok(())
}
