use clap::Parser;
use log::info;
use server::game::GameConfig;
use server::monster::MonsterSettings;
use server::network::{Server, ServerMessage};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Tick rate (frames per second)
    #[arg(short, long, default_value = "50")]
    tick_rate: u32,

    /// Maximum number of connected clients
    #[arg(short, long, default_value = "16")]
    max_clients: usize,

    /// Number of monsters to spawn
    #[arg(long, default_value = "4")]
    monsters: usize,

    /// Let monsters keep chasing while an attack winds up
    #[arg(long)]
    allow_kiting: bool,

    /// Seed for monster wandering
    #[arg(long, default_value = "0")]
    seed: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let addr = format!("{}:{}", args.host, args.port);
    let tick_duration = Duration::from_secs_f64(1.0 / args.tick_rate.max(1) as f64);

    let config = GameConfig {
        monster: MonsterSettings {
            allow_kiting: args.allow_kiting,
            ..MonsterSettings::default()
        },
        monster_count: args.monsters,
        seed: args.seed,
        ..GameConfig::default()
    };

    info!("Starting server on {}", addr);
    info!(
        "Tick rate: {}Hz, max clients: {}, monsters: {}",
        args.tick_rate, args.max_clients, args.monsters
    );

    let mut server = Server::new(&addr, tick_duration, args.max_clients, config).await?;

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down");
            let _ = shutdown.send(ServerMessage::Shutdown);
        }
    });

    server.run().await?;

    Ok(())
}
