mod config;

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use client_core::{ClientEvent, ClientStateStore, DurableStateStore, ShippingFeedClient};
use shared::protocol::{LabelRequest, QuoteRequest};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "shipfeed", about = "Follow a shipping assistant session from the terminal")]
struct Args {
    #[arg(long, default_value = "shipfeed.toml")]
    config: PathBuf,
    #[arg(long)]
    url: Option<String>,
    #[arg(long)]
    token: Option<String>,
    #[arg(long)]
    session_id: Option<String>,
    #[arg(long)]
    state_db: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect and print events until interrupted.
    Watch {
        #[arg(long)]
        duration_secs: Option<u64>,
    },
    /// Send a ping and print what comes back.
    Ping {
        #[arg(long, default_value_t = 3)]
        wait_secs: u64,
    },
    /// Ask the assistant for shipping quotes.
    Quotes {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        weight: f64,
        #[arg(long)]
        dimensions: Option<String>,
        #[arg(long)]
        pickup: bool,
        #[arg(long, default_value_t = 10)]
        wait_secs: u64,
    },
    /// Ask the assistant to create a label for a carrier service.
    Label {
        #[arg(long)]
        carrier: String,
        #[arg(long)]
        service: String,
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
        #[arg(long, default_value_t = 10)]
        wait_secs: u64,
    },
    /// Show or change the sound effects preference.
    Sound {
        #[arg(value_enum, default_value_t = SoundAction::Status)]
        action: SoundAction,
    },
    /// Show the current session and its share link.
    Session {
        #[arg(long)]
        forget: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SoundAction {
    Status,
    On,
    Off,
    Toggle,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let args = Args::parse();

    let mut settings = config::load_settings(&args.config);
    if let Some(url) = args.url {
        settings.ws_url = url;
    }
    if let Some(token) = args.token {
        settings.token = Some(token);
    }
    if let Some(session_id) = args.session_id {
        settings.session_id = Some(session_id);
    }
    if let Some(state_db) = args.state_db {
        settings.state_db_url = state_db;
    }

    let database_url = config::prepare_database_url(&settings.state_db_url)?;
    let store = DurableStateStore::initialize(&database_url).await?;
    let client = ShippingFeedClient::new(
        settings.connection_options(),
        store.clone(),
        settings.notify_throttle(),
    )
    .await;
    let wait_for_ready = Duration::from_millis(settings.connect_timeout_ms) + Duration::from_secs(1);

    match args.command {
        Command::Watch { duration_secs } => {
            let events = client.subscribe_events();
            client.connect().await;
            print_events(&client, events, duration_secs.map(Duration::from_secs)).await?;
        }
        Command::Ping { wait_secs } => {
            send_and_follow(&client, wait_for_ready, wait_secs, |client| client.send_ping())
                .await?;
        }
        Command::Quotes {
            from,
            to,
            weight,
            dimensions,
            pickup,
            wait_secs,
        } => {
            let request = QuoteRequest {
                origin_zip: from,
                destination_zip: to,
                weight,
                dimensions,
                pickup_requested: pickup,
            };
            send_and_follow(&client, wait_for_ready, wait_secs, |client| {
                client.request_quotes(&request)
            })
            .await?;
        }
        Command::Label {
            carrier,
            service,
            from,
            to,
            wait_secs,
        } => {
            let request = LabelRequest {
                carrier,
                service,
                origin_zip: from,
                destination_zip: to,
            };
            send_and_follow(&client, wait_for_ready, wait_secs, |client| {
                client.request_label(&request)
            })
            .await?;
        }
        Command::Sound { action } => {
            let enabled = match action {
                SoundAction::Status => client.sound_effects_enabled().await?,
                SoundAction::On => {
                    client.set_sound_effects_enabled(true).await?;
                    true
                }
                SoundAction::Off => {
                    client.set_sound_effects_enabled(false).await?;
                    false
                }
                SoundAction::Toggle => client.toggle_sound_effects().await?,
            };
            println!("sound effects: {}", if enabled { "on" } else { "off" });
        }
        Command::Session { forget } => {
            if forget {
                store
                    .clear_session_id()
                    .await
                    .context("failed to forget session")?;
                println!("session forgotten");
            } else {
                match client.session_id() {
                    Some(session_id) => {
                        println!("session: {session_id}");
                        if let Some(url) = client.session_share_url() {
                            println!("share: {url}");
                        }
                    }
                    None => println!("no session yet"),
                }
            }
        }
    }

    client.disconnect().await;
    Ok(())
}

async fn send_and_follow(
    client: &Arc<ShippingFeedClient>,
    wait_for_ready: Duration,
    wait_secs: u64,
    send: impl FnOnce(&ShippingFeedClient) -> bool,
) -> Result<()> {
    let events = client.subscribe_events();
    client.connect().await;
    let mut state = client.connection().subscribe_state();
    let ready = tokio::time::timeout(
        wait_for_ready,
        state.wait_for(|state| state.connected || state.using_fallback),
    )
    .await
    .is_ok();
    if !ready {
        warn!("channel did not open in time");
    }

    if send(client.as_ref()) {
        info!("request sent");
    } else {
        warn!(
            using_fallback = client.connection_state().using_fallback,
            "request not sent"
        );
    }
    print_events(client, events, Some(Duration::from_secs(wait_secs))).await
}

async fn print_events(
    client: &ShippingFeedClient,
    mut events: broadcast::Receiver<ClientEvent>,
    duration: Option<Duration>,
) -> Result<()> {
    let sound = client.sound_effects_enabled().await.unwrap_or(true);
    let deadline = async {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => {
                    if sound && matches!(event, ClientEvent::StepCompleted(_)) {
                        print!("\x07");
                    }
                    println!("{}", serde_json::to_string(&event)?);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event output fell behind");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    println!("{}", serde_json::to_string_pretty(&client.snapshot())?);
    Ok(())
}
