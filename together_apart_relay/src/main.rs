// CLI entry point for the Together Apart relay.
//
// Starts a standalone relay that watch clients connect to. The relay routes
// chat and playback messages within groups; it never touches a player. See
// `server.rs` for the networking architecture and `groups.rs` for the group
// state.
//
// Usage:
//   relay [OPTIONS]
//     --host <HOST>    Bind address (default: 0.0.0.0)
//     --port <PORT>    Listen port (default: 8765)
//
// Logs go to stderr; filter with RUST_LOG (default `info`).

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use together_apart_relay::{RelayConfig, start_relay};

#[derive(Parser, Debug)]
#[command(name = "relay")]
#[command(about = "Together Apart watch-party relay")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 8765)]
    port: u16,
}

fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = RelayConfig {
        host: args.host,
        port: args.port,
        ..RelayConfig::default()
    };
    let (handle, addr) = match start_relay(config) {
        Ok(result) => result,
        Err(err) => {
            error!(error = %err, "failed to start relay");
            return ExitCode::FAILURE;
        }
    };

    // The process exits on SIGINT/SIGTERM by default; the relay keeps no
    // state worth flushing.
    info!("relay ready on ws://{addr}");
    handle.wait();
    ExitCode::SUCCESS
}
