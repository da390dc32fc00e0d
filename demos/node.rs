use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use kadlite::Dht;

use clap::Parser;

use tracing::{info, Level};
use tracing_subscriber;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// UDP port to listen on, an ephemeral port if not set
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,
    /// Seed nodes to bootstrap from (`host:port`)
    bootstrap: Vec<String>,
    /// Print debug logs, including every message sent and received
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .init();

    let mut builder = Dht::builder().bootstrap(&cli.bootstrap);
    if let Some(port) = cli.port {
        builder = builder.port(port);
    }

    let mut dht = builder.build().expect("Failed to bind the DHT node");

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("Error setting Ctrl-C handler");

    let bootstrapped = dht.bootstrapped().expect("Node was shutdown");
    let info = dht.info().expect("Node was shutdown");

    info!(
        id = %info.id(),
        address = %info.local_addr(),
        bootstrapped,
        table_size = info.routing_table_size(),
        "Node is running! Press Ctrl+C to stop."
    );

    while let Err(RecvTimeoutError::Timeout) = rx.recv_timeout(Duration::from_secs(30)) {
        if let Ok(info) = dht.info() {
            info!(
                table_size = info.routing_table_size(),
                active_lookups = info.active_lookups(),
                pending_calls = info.pending_calls(),
                "Status"
            );
        }
    }

    info!("Shutting down...");
    dht.shutdown();
}
