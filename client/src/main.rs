use clap::Parser;
use client::config::ClientConfig;
use client::network::Client;
use log::info;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// WebSocket URL of the world server
    #[arg(short = 's', long, env = "METAVERSE_SERVER", default_value = "ws://127.0.0.1:8080")]
    server: String,

    /// Display name to join with
    #[arg(short = 'n', long, env = "METAVERSE_NAME", default_value = "Trader")]
    name: String,

    /// How far from spawn to wander, in meters (0 stands still)
    #[arg(short = 'r', long, default_value = "20")]
    wander_radius: f32,

    /// Seconds between chat messages (0 disables chatting)
    #[arg(short = 'c', long, default_value = "30")]
    chat_every: u64,

    /// Seconds to wait before reconnecting after a dropped connection
    #[arg(long, default_value = "5")]
    reconnect_delay: u64,

    /// Don't announce exploration milestones to the social feed
    #[arg(long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let mut config = ClientConfig {
        server_url: args.server.clone(),
        reconnect_delay: Duration::from_secs(args.reconnect_delay),
        ..ClientConfig::default()
    };
    config.location.announce_milestones = !args.quiet;

    info!("Starting client...");
    info!("Connecting to: {}", args.server);
    info!("Joining as '{}', wandering {}m", args.name, args.wander_radius);
    if args.chat_every > 0 {
        info!("Chatting every {}s", args.chat_every);
    }

    let mut client = Client::new(
        config,
        &args.name,
        args.wander_radius,
        Some(Duration::from_secs(args.chat_every)),
    );

    client.run().await?;

    Ok(())
}
