use clap::Parser;
use game::config::GameConfig;
use game::input::RawInput;
use game::peer::LocalCluster;
use game::transport::GameMode;
use log::info;
use rand::Rng;
use tokio::time::{interval, Duration, MissedTickBehavior};

const BOT_MESSAGE: &str = "Hey Mate!";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of client bots joining the host
    #[arg(short, long, default_value = "3")]
    bots: u32,

    /// Number of ticks to run before shutting down
    #[arg(short = 'n', long, default_value = "600")]
    ticks: u32,

    /// Tick rate (updates per second)
    #[arg(short, long, default_value = "60")]
    tick_rate: u32,

    /// Session to create
    #[arg(short, long, default_value = "TestRoom")]
    session: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let config = GameConfig {
        session_name: args.session,
        tick_rate: args.tick_rate.max(1),
        player_count: args.bots + 1,
        ..GameConfig::default()
    };
    let frame_dt = config.delta_time();

    info!("Starting arena '{}' with {} bots", config.session_name, args.bots);
    let mut cluster = LocalCluster::new(config);
    cluster.join("host", GameMode::Host).await?;
    for bot in 0..args.bots {
        cluster.join(format!("bot-{}", bot), GameMode::Client).await?;
    }

    let mut interval_timer = interval(Duration::from_secs_f32(frame_dt));
    interval_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut rng = rand::thread_rng();
    for _ in 0..args.ticks {
        interval_timer.tick().await;

        for index in 0..cluster.peers().len() {
            let raw = RawInput {
                forward: rng.gen_bool(0.5),
                back: rng.gen_bool(0.2),
                left: rng.gen_bool(0.3),
                right: rng.gen_bool(0.3),
                primary: rng.gen_bool(0.05),
            };
            let chatty = rng.gen_bool(0.01);

            if let Some(peer) = cluster.peer_mut(index) {
                peer.frame_input(raw);
                if chatty {
                    if let Some(chat) = peer.chat_mut() {
                        chat.set_input(BOT_MESSAGE);
                    }
                    peer.send_chat()?;
                }
            }
        }

        cluster.run_tick(frame_dt)?;
    }

    for peer in cluster.peers() {
        info!(
            "[{}] avatars: {}, projectiles: {}, flashes: {}, chat lines: {}",
            peer.name(),
            peer.world().avatars().count(),
            peer.world().projectile_count(),
            peer.flash_count(),
            peer.chat().map_or(0, |chat| chat.len())
        );
    }
    if let Some(chat) = cluster.peer(0).and_then(|host| host.chat()) {
        println!("{}", chat.text());
    }

    Ok(())
}
