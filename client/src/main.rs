use clap::Parser;
use client::network::Client;
use log::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:3001")]
    server: String,
}

#[tokio::main]
async fn main() -> client::ClientResult<()> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client...");
    info!("Connecting to: {}", args.server);
    info!("Commands: /create, /join, /map, /move, /event, /mapevent, /set, /sync, /roll");
    info!("Plain text is chat; /quit to exit");

    let mut client = Client::new(&args.server).await?;
    client.run().await?;

    Ok(())
}
