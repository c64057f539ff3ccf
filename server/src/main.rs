use clap::Parser;
use log::{error, info};
use server::client::{Client, ClientInterfacer};
use server::config::ServerConfig;
use server::error::ServerError;
use server::hub::Hub;
use server::store::MemoryStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Number of spores the world is kept at
    #[arg(short, long, default_value = "1000")]
    max_spores: usize,

    /// Player physics tick in milliseconds
    #[arg(short, long, default_value = "50")]
    tick_ms: u64,

    /// Seconds between spore replenishment passes
    #[arg(long, default_value = "2")]
    replenish_secs: u64,

    /// Maximum spores added per replenishment pass
    #[arg(long, default_value = "10")]
    replenish_batch: usize,

    /// Rows on the hiscore board
    #[arg(long, default_value = "10")]
    hiscore_page_size: usize,
}

impl Args {
    fn config(&self) -> ServerConfig {
        ServerConfig {
            max_spores: self.max_spores,
            player_tick: Duration::from_millis(self.tick_ms.max(1)),
            replenish_interval: Duration::from_secs(self.replenish_secs.max(1)),
            replenish_batch: self.replenish_batch,
            hiscore_page_size: self.hiscore_page_size,
            ..ServerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let address = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|e| ServerError::Network(format!("failed to bind {}: {}", address, e)))?;
    info!("Server listening on {}", address);
    info!(
        "World target: {} spores, tick: {}ms",
        args.max_spores, args.tick_ms
    );

    let hub = Hub::new(args.config(), Arc::new(MemoryStore::new()));
    let handle = hub.handle();
    let mut hub_task = tokio::spawn(hub.run());

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        info!("New connection from {}", addr);
                        handle
                            .serve(|hub| Ok(Client::tcp(hub, stream) as Arc<dyn ClientInterfacer>))
                            .await;
                    }
                    Err(e) => error!("Error accepting connection: {}", e),
                }
            }
            result = &mut hub_task => {
                if let Err(e) = result {
                    error!("Hub task panicked: {}", e);
                }
                return Err(ServerError::Internal("hub stopped".to_string()).into());
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down gracefully...");
                break;
            }
        }
    }

    Ok(())
}
