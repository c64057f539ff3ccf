use clap::Parser;
use log::{info, warn};
use server::transport::{PacketReader, PacketWriter, TcpTransport};
use shared::{Msg, Packet};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

#[derive(Parser, Debug)]
#[command(author, version, about = "Smoke-test client for the game server", long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    #[arg(short = 'u', long, default_value = "tester")]
    username: String,

    #[arg(short = 'p', long, default_value = "password")]
    password: String,

    /// Register the account before logging in
    #[arg(short = 'r', long)]
    register: bool,

    /// Ask for the hiscore board instead of joining the game
    #[arg(long)]
    hiscores: bool,

    /// Seconds to steer around after joining
    #[arg(short = 'd', long, default_value = "5")]
    duration: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let stream = TcpStream::connect(&args.server).await?;
    info!("Connected to {}", args.server);
    let (mut reader, mut writer) = TcpTransport::split(stream);

    let my_id = match next_packet(&mut reader).await? {
        Packet {
            msg: Msg::ClientId { id },
            ..
        } => id,
        other => return Err(format!("expected client id, got {:?}", other).into()),
    };
    info!("Assigned client ID: {}", my_id);

    if args.register {
        send(&mut writer, my_id, Msg::RegisterRequest {
            username: args.username.clone(),
            password: args.password.clone(),
        })
        .await?;
        expect_ok(&mut reader, "register").await?;
    }

    if args.hiscores {
        send(&mut writer, my_id, Msg::HiscoreBoardRequest).await?;
        match next_packet(&mut reader).await?.msg {
            Msg::HiscoreBoard { hiscores } => {
                for entry in hiscores {
                    info!("#{} {} - {}", entry.rank, entry.name, entry.score);
                }
            }
            other => warn!("Expected hiscore board, got {:?}", other),
        }
        send(&mut writer, my_id, Msg::FinishedBrowsingHiscores).await?;
        writer.shutdown().await;
        return Ok(());
    }

    send(&mut writer, my_id, Msg::LoginRequest {
        username: args.username.clone(),
        password: args.password.clone(),
    })
    .await?;
    expect_ok(&mut reader, "login").await?;

    let listener = tokio::spawn(async move {
        loop {
            match reader.read_packet().await {
                Ok(Some(packet)) => log_packet(my_id, &packet),
                Ok(None) => {
                    info!("Server closed the connection");
                    break;
                }
                Err(e) => {
                    warn!("Error reading from server: {}", e);
                    break;
                }
            }
        }
    });

    // Steer in a slow circle while the listener logs whatever comes back
    for i in 0..args.duration * 4 {
        let direction = i as f64 * std::f64::consts::PI / 8.0;
        send(&mut writer, my_id, Msg::PlayerDirection { direction }).await?;
        sleep(Duration::from_millis(250)).await;
    }

    send(&mut writer, my_id, Msg::Disconnect {
        reason: "Client test complete".to_string(),
    })
    .await?;
    writer.shutdown().await;
    let _ = timeout(Duration::from_secs(1), listener).await;
    info!("Test client finished");

    Ok(())
}

async fn send(
    writer: &mut impl PacketWriter,
    my_id: u64,
    msg: Msg,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Sending {}", msg.kind());
    writer.write_packet(&Packet::new(my_id, msg)).await?;
    Ok(())
}

async fn next_packet(reader: &mut impl PacketReader) -> Result<Packet, Box<dyn std::error::Error>> {
    match timeout(Duration::from_secs(5), reader.read_packet()).await?? {
        Some(packet) => Ok(packet),
        None => Err("server closed the connection".into()),
    }
}

async fn expect_ok(
    reader: &mut impl PacketReader,
    action: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    match next_packet(reader).await?.msg {
        Msg::OkResponse => {
            info!("{} succeeded", action);
            Ok(())
        }
        Msg::DenyResponse { reason } => Err(format!("{} denied: {}", action, reason).into()),
        other => Err(format!("unexpected reply to {}: {:?}", action, other).into()),
    }
}

fn log_packet(my_id: u64, packet: &Packet) {
    match &packet.msg {
        Msg::Player(player) if player.id == my_id => info!(
            "Own player at ({:.1}, {:.1}) radius {:.1}",
            player.x, player.y, player.radius
        ),
        Msg::Player(player) => info!(
            "Player {} ({}) at ({:.1}, {:.1})",
            player.id, player.name, player.x, player.y
        ),
        Msg::SporesBatch { spores } => info!("Received batch of {} spores", spores.len()),
        other => info!("From {}: {}", packet.sender_id, other.kind()),
    }
}
