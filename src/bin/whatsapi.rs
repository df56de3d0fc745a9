//! WhatsApi CLI binary.
//!
//! # Commands
//!
//! - `listen` - Connect, log in and print every event
//! - `send` - Send one text message and wait for the server ack

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::sync::oneshot;
use whatsapi::{Client, Config, Event, EventStream, VERSION};

#[derive(Parser)]
#[command(name = "whatsapi")]
#[command(version = VERSION)]
#[command(about = "WhatsApi - binary messaging protocol client", long_about = None)]
struct Cli {
    /// Config file (TOML); environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and print events until the connection ends
    Listen {
        /// Announce ourselves as available after login
        #[arg(long)]
        online: bool,
    },

    /// Send a text message
    Send {
        /// Recipient number or address
        to: String,

        /// Message text
        text: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let config = load_config(cli.config)?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        match cli.command {
            Commands::Listen { online } => cmd_listen(config, online).await,
            Commands::Send { to, text } => cmd_send(config, &to, &text).await,
        }
    })
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    let env = Config::from_env();
    let config = match path {
        Some(path) => Config::from_file(path)?.merge(env),
        None => env,
    };
    config.validate()?;
    Ok(config)
}

fn start(config: Config) -> anyhow::Result<(Client, EventStream)> {
    let mut client = Client::new(config)?;
    let events = client
        .take_events()
        .ok_or_else(|| anyhow::anyhow!("event stream already taken"))?;
    client.connect(None);
    Ok((client, events))
}

/// Log in on connect; returns false once the connection is gone for good
fn on_lifecycle(client: &mut Client, event: &Event) -> anyhow::Result<bool> {
    match event {
        Event::Connected => client.login(None)?,
        Event::ConnectError(reason) => anyhow::bail!("connect failed: {reason}"),
        Event::Ended => return Ok(false),
        _ => {},
    }
    Ok(true)
}

async fn cmd_listen(config: Config, online: bool) -> anyhow::Result<()> {
    let (mut client, mut events) = start(config)?;

    loop {
        client.step().await;
        while let Ok(event) = events.try_recv() {
            if !on_lifecycle(&mut client, &event)? {
                println!("connection ended");
                return Ok(());
            }
            if online && event == Event::LoggedIn {
                client.send_presence(true)?;
            }
            println!("[{}] {:?}", event.name(), event);
        }
    }
}

async fn cmd_send(config: Config, to: &str, text: &str) -> anyhow::Result<()> {
    let (mut client, mut events) = start(config)?;

    let (tx, mut acked) = oneshot::channel();
    let id = client.send_message(
        to,
        text,
        Some(Box::new(move |result, _id| {
            let _ = tx.send(result);
        })),
    )?;
    tracing::info!("Message {} queued for {}", id, to);

    loop {
        tokio::select! {
            result = &mut acked => {
                match result? {
                    Ok(_) => println!("sent {id}"),
                    Err(e) => anyhow::bail!("server rejected message: {e}"),
                }
                client.disconnect();
                return Ok(());
            }
            () = client.step() => {
                while let Ok(event) = events.try_recv() {
                    if let Event::Error(reason) = &event {
                        anyhow::bail!("{reason}");
                    }
                    if !on_lifecycle(&mut client, &event)? {
                        anyhow::bail!("connection ended before the message was acknowledged");
                    }
                }
            }
        }
    }
}
