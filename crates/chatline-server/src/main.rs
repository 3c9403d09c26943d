//! Chatline server binary.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default port
//! chatline-server
//!
//! # Custom address and limits
//! chatline-server --bind 127.0.0.1:7000 --max-connections 500 --queue-capacity 64
//! ```

use std::time::Duration;

use chatline_core::SessionConfig;
use chatline_proto::{DEFAULT_MAX_FRAME_SIZE, FrameCodec};
use chatline_server::{
    DEFAULT_MAX_CONNECTIONS, DEFAULT_OUTBOUND_QUEUE_CAPACITY, Server, ServerRuntimeConfig,
};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Chatline chat server
#[derive(Parser, Debug)]
#[command(name = "chatline-server")]
#[command(about = "Multi-user TCP chat server")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:1967")]
    bind: String,

    /// Maximum concurrent connections
    #[arg(long, default_value_t = DEFAULT_MAX_CONNECTIONS)]
    max_connections: usize,

    /// Largest accepted frame, in bytes after the length prefix
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_SIZE)]
    max_frame_size: u32,

    /// Frames buffered per client before a slow client is disconnected
    #[arg(long, default_value_t = DEFAULT_OUTBOUND_QUEUE_CAPACITY)]
    queue_capacity: usize,

    /// Seconds a connection may stay without logging in
    #[arg(long, default_value = "30")]
    login_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Chatline server starting");
    tracing::info!("Binding to {}", args.bind);

    let config = ServerRuntimeConfig {
        bind_address: args.bind,
        max_connections: args.max_connections,
        outbound_queue_capacity: args.queue_capacity,
        session: SessionConfig {
            login_timeout: Duration::from_secs(args.login_timeout_secs),
            codec: FrameCodec::new(args.max_frame_size),
        },
        ..Default::default()
    };

    let server = Server::bind(config).await?;

    tracing::info!("Server listening on {}", server.local_addr()?);

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    tracing::info!("Server stopped");

    Ok(())
}
