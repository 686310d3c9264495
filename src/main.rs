use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use log::info;
use npc_chat::client::{
    deliver_reply, ChatOverlay, Game, RelayClient, ReplyOutcome, Roster, Vec2, APOLOGY,
};
use npc_chat::config::{load_env_file, RelayConfig};
use npc_chat::relay;
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug, Parser)]
#[command(version, about = "NPC chat relay and terminal client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the chat relay
    Serve(RelayConfig),
    /// Chat with whichever character is within reach of the given position
    Talk(TalkArgs),
}

#[derive(Debug, clap::Args)]
struct TalkArgs {
    /// Relay chat endpoint
    #[arg(long, env = "RELAY_URL", default_value = "http://127.0.0.1:3001/chat")]
    relay: String,

    /// JSON roster of `{name, sprite, x, y, message}` entries
    #[arg(long)]
    roster: Option<PathBuf>,

    #[arg(long, default_value_t = 300.0)]
    x: f32,

    #[arg(long, default_value_t = 140.0)]
    y: f32,
}

fn load_roster(path: Option<&Path>) -> anyhow::Result<Roster> {
    let Some(path) = path else {
        return Ok(Roster::default());
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read roster {}", path.display()))?;
    Roster::from_json(&json).with_context(|| format!("Failed to parse roster {}", path.display()))
}

async fn talk(args: TalkArgs) -> anyhow::Result<()> {
    let mut game = Game::new(load_roster(args.roster.as_deref())?, ChatOverlay::default());
    game.player.position = Vec2::new(args.x, args.y);

    let character = game
        .interact()
        .cloned()
        .ok_or_else(|| anyhow!("Nobody is within reach of ({}, {})", args.x, args.y))?;
    println!("{}: {}", character.name, character.greeting);

    let overlay = Mutex::new(game.into_overlay());
    let client = RelayClient::new(args.relay);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim() == "/quit" {
            break;
        }
        let pending = overlay
            .lock()
            .map_err(|_| anyhow!("overlay lock poisoned"))?
            .submit(&line);
        let Some(pending) = pending else {
            continue;
        };

        print!("{}: ", character.name);
        std::io::stdout().flush()?;
        let outcome = deliver_reply(&overlay, &client, pending, |delta| {
            print!("{}", delta);
            let _ = std::io::stdout().flush();
        })
        .await;
        match outcome {
            ReplyOutcome::Failed => println!("{}", APOLOGY),
            ReplyOutcome::Completed(_) | ReplyOutcome::Stale => println!(),
        }
    }

    if let Ok(mut overlay) = overlay.lock() {
        info!(
            "[talk] Leaving {} after {} turns",
            character.name,
            overlay.session().turn_count(&character.name)
        );
        overlay.close();
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    // Must happen before the runtime spawns worker threads, and before the
    // logger reads RUST_LOG.
    let loaded = load_env_file(Path::new(".env"));
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if loaded > 0 {
        info!("[config] Loaded {} variables from .env", loaded);
    }
    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(async {
        match cli.command {
            Command::Serve(config) => relay::serve(config).await,
            Command::Talk(args) => talk(args).await,
        }
    })
}
