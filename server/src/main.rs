use clap::Parser;
use log::{error, info};
use server::config::ServerConfig;
use server::network::{Server, ServerMessage};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "3001")]
    port: u16,

    /// Maximum number of concurrent connections
    #[arg(short = 'c', long, default_value = "256")]
    max_clients: usize,

    /// Maximum players per room, not counting the GM
    #[arg(short = 'm', long, default_value = "6")]
    max_players: usize,

    /// Seconds a room waits for its GM to reconnect
    #[arg(short = 'g', long, default_value = "300")]
    gm_grace: u64,

    /// Seconds of silence before a client is dropped
    #[arg(short = 't', long, default_value = "10")]
    timeout: u64,
}

#[tokio::main]
async fn main() -> server::ServerResult<()> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        max_clients: args.max_clients,
        max_players_per_room: args.max_players,
        gm_reconnect_grace: Duration::from_secs(args.gm_grace),
        client_timeout: Duration::from_secs(args.timeout),
        ..ServerConfig::default()
    };

    info!("Starting room server on {}", config.bind_addr());
    info!(
        "Max clients: {}, max players per room: {}",
        config.max_clients, config.max_players_per_room
    );

    let mut server = Server::new(config).await?;
    let shutdown = server.shutdown_handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down gracefully...");
            if let Err(e) = shutdown.send(ServerMessage::Shutdown) {
                error!("Failed to signal shutdown: {}", e);
            }
        }
    });

    server.run().await
}
