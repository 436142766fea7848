//! respmirror - mirror captured RESP requests to another server

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use respmirror::{DispatchMode, Mirror, MirrorConfig};

/// Command-line arguments
#[derive(Parser, Debug, Clone)]
#[command(name = "respmirror")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Rebuild client streams from captured traffic and mirror every RESP request")]
struct Args {
    /// pcap capture to read, or `-` for stdin (e.g. `tcpdump -w - port 6379`)
    #[arg(short, long, default_value = "-")]
    file: PathBuf,

    /// Only mirror packets addressed to this server (host:port)
    #[arg(long, env = "RESPMIRROR_ADDR")]
    addr: Option<String>,

    /// Server to mirror requests to; frames go to stdout when absent
    #[arg(short, long, env = "RESPMIRROR_SERVER")]
    server: Option<String>,

    /// Echo the mirror server's responses to stdout
    #[arg(short, long)]
    debug_response: bool,

    /// Path to a YAML configuration file
    #[arg(short, long, env = "RESPMIRROR_CONFIG")]
    config: Option<PathBuf>,

    /// Queue payload per connection instead of writing inline; a connection
    /// that overflows its queue is evicted rather than stalling capture
    #[arg(long)]
    decoupled: bool,

    /// Fragments queued per connection in decoupled mode
    #[arg(long)]
    queue_depth: Option<usize>,

    /// Stream buffer capacity per connection, in bytes
    #[arg(long)]
    buffer_capacity: Option<usize>,
}

impl Args {
    /// Load the configuration file, if any, and apply flag overrides.
    async fn mirror_config(&self) -> anyhow::Result<MirrorConfig> {
        let mut config = match &self.config {
            Some(path) => MirrorConfig::from_file(path)
                .with_context(|| format!("loading configuration from {}", path.display()))?,
            None => MirrorConfig::default(),
        };

        if let Some(addr) = &self.addr {
            config.target = Some(resolve_target(addr).await?);
        }
        if self.debug_response {
            config.echo_responses = true;
        }
        if self.decoupled {
            config.dispatch_mode = DispatchMode::Decoupled;
        }
        if let Some(depth) = self.queue_depth {
            config.queue_depth = depth;
        }
        if let Some(capacity) = self.buffer_capacity {
            config.buffer_capacity = capacity;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

/// Resolve a `host:port` target filter to the first address it names.
async fn resolve_target(addr: &str) -> anyhow::Result<SocketAddr> {
    let mut resolved = tokio::net::lookup_host(addr)
        .await
        .with_context(|| format!("resolving --addr {}", addr))?;
    let target = resolved
        .next()
        .with_context(|| format!("--addr {} resolved to no address", addr))?;
    debug!("Filtering packets addressed to {} ({})", target, addr);
    Ok(target)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries mirrored frames; logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = args.mirror_config().await?;
    info!(
        "Mirroring {} ({:?} dispatch, {} byte buffers)",
        args.file.display(),
        config.dispatch_mode,
        config.buffer_capacity
    );

    let sink = Mirror::sink(&config, args.server.as_deref())
        .await
        .with_context(|| format!("connecting to {}", args.server.as_deref().unwrap_or("stdout")))?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupted, draining connections");
                on_signal.cancel();
            }
            Err(e) => warn!("Cannot listen for Ctrl-C: {}", e),
        }
    });

    let stats = Mirror::replay(&args.file, config, sink, cancel)
        .await
        .with_context(|| format!("mirroring {}", args.file.display()))?;

    info!(
        "Done: {} packets, {} dispatched, {} connections",
        stats.packets, stats.dispatched, stats.connections_created
    );
    Ok(())
}
