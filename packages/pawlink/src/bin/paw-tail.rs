//! `paw-tail` — tail a conversation from the terminal.
//!
//! Connects as the given session, opens the room for an animal listing,
//! and prints messages as they arrive. Mostly useful for poking at a
//! backend without a UI in the way.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use pawlink::{
    ChatClient, ConnectionEvent, DeliveryState, FileConfig, PawConfig, Role, Session,
};

#[derive(Parser)]
#[command(name = "paw-tail", about = "Tail a pawlink conversation")]
struct Args {
    /// Animal listing to open the conversation for
    #[arg(long)]
    subject: i64,

    /// Acting user id
    #[arg(long)]
    user_id: String,

    /// Bearer token for the session
    #[arg(long)]
    token: String,

    /// Act as a shelter operator instead of an adopter
    #[arg(long)]
    operator: bool,

    /// REST base URL (overrides pawlink.toml / PAW_SERVER__BASE_URL)
    #[arg(long)]
    base_url: Option<String>,

    /// WebSocket URL (overrides pawlink.toml / PAW_SERVER__WS_URL)
    #[arg(long)]
    ws_url: Option<String>,

    /// Send this message after opening the room, then keep tailing
    #[arg(long)]
    say: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let file_config: FileConfig = pawlink::load_config(std::path::Path::new(".")).extract()?;
    let mut config = PawConfig::from_file(&file_config);
    if let Some(base_url) = args.base_url {
        config.base_url = base_url;
    }
    if let Some(ws_url) = args.ws_url {
        config.ws_url = ws_url;
    }

    let role = if args.operator { Role::Operator } else { Role::User };
    let session = Session::new(args.user_id, role, args.token);
    let client = ChatClient::new(session, config);

    let mut events = client.subscribe_events();
    client.connect();

    let room = client.open_room(args.subject).await?;
    let who = room
        .counterparty_name
        .clone()
        .unwrap_or_else(|| room.counterparty_id.clone());
    eprintln!(
        "[paw-tail: room {} with {} — Ctrl-C to quit]",
        room.id, who
    );

    if let Some(text) = args.say {
        client.send_message(room.id, &text).await?;
    }

    let mut printed = 0usize;
    let mut tick = tokio::time::interval(std::time::Duration::from_millis(500));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,

            event = events.recv() => {
                match event {
                    Ok(ConnectionEvent::State(state)) => {
                        eprintln!("[paw-tail: connection {:?}]", state);
                    }
                    Ok(ConnectionEvent::AuthRequired) => {
                        eprintln!("[paw-tail: session expired, re-authenticate]");
                        break;
                    }
                    Err(_) => break,
                }
            }

            _ = tick.tick() => {
                let messages = client.messages(room.id).await;
                for msg in messages.iter().skip(printed) {
                    let marker = match msg.delivery {
                        DeliveryState::Pending => " …",
                        DeliveryState::Confirmed => "",
                        DeliveryState::Failed => " ✗ (failed, resend?)",
                    };
                    println!("{} {}: {}{}", msg.sent_at.format("%H:%M:%S"), msg.sender_id, msg.content, marker);
                }
                printed = messages.len();
            }
        }
    }

    client.disconnect().await;
    eprintln!("[paw-tail: disconnected]");
    Ok(())
}
