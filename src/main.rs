//! roomchat - terminal chat client
//!
//! Reads commands from stdin, drives a [`ChatSession`] and prints the room's
//! messages to stdout. Logs go to stderr.

mod app;
mod cli;
mod ui;

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use futures_util::StreamExt;
use roomchat_client::{ChatSession, ClientConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use crate::app::{App, Flow};
use crate::cli::{Args, Input};
use crate::ui::Screen;

/// Time given to the link to flush DISCONNECT before the runtime stops.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("roomchat=info,roomchat_client=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = ClientConfig::from_env().context("invalid configuration")?;
    args.apply(&mut config);
    tracing::info!(
        "Using {} via {:?} as {}",
        config.endpoint,
        config.transports,
        config.sender
    );

    let mut session = ChatSession::open(&config).context("failed to set up transports")?;
    let mut inbound = session
        .take_inbound()
        .context("inbound stream already taken")?;

    let mut app = App::new(
        session,
        Screen::new(std::io::stdout()),
        args.token.clone(),
        args.room.clone(),
    )
    .with_reconnect(!config.reconnect_delay.is_zero());
    app.start()?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                if app.handle(Input::parse(&line))? == Flow::Quit {
                    break;
                }
            }
            Some(update) = app.session.next_update() => app.on_update(update)?,
            Some(event) = inbound.next() => app.on_message(&event)?,
        }
    }

    app.session.disconnect();
    tokio::time::sleep(SHUTDOWN_GRACE).await;
    Ok(())
}
