//! Command-line flags and the commands typed at the prompt.

use clap::Parser;
use roomchat_client::ClientConfig;
use url::Url;

/// Terminal chat client for a STOMP-over-SockJS chat server.
#[derive(Parser, Debug)]
#[command(name = "roomchat", version, about, long_about = None)]
pub struct Args {
    /// SockJS endpoint. Overrides ROOMCHAT_ENDPOINT.
    #[arg(long)]
    pub endpoint: Option<Url>,

    /// Name shown as the sender of your messages. Overrides ROOMCHAT_SENDER.
    #[arg(long)]
    pub sender: Option<String>,

    /// Bearer token used by `/connect` when none is given.
    #[arg(long, env = "ROOMCHAT_TOKEN")]
    pub token: Option<String>,

    /// Room used by `/subscribe` when none is given.
    #[arg(long, default_value = "lobby")]
    pub room: String,
}

impl Args {
    /// Apply flag overrides on top of the environment configuration.
    pub fn apply(&self, config: &mut ClientConfig) {
        if let Some(endpoint) = &self.endpoint {
            config.endpoint = endpoint.clone();
        }
        if let Some(sender) = &self.sender {
            config.sender = sender.clone();
        }
    }
}

/// One line typed by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Connect(Option<String>),
    Subscribe(Option<String>),
    Disconnect,
    Quit,
    Help,
    /// Anything that is not a command goes to the current room as is.
    Say(String),
    Unknown(String),
}

impl Input {
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        let Some(command) = line.strip_prefix('/') else {
            return Input::Say(line.to_string());
        };

        let mut parts = command.split_whitespace();
        let name = parts.next().unwrap_or_default();
        let arg = parts.next().map(str::to_string);
        match name {
            "connect" => Input::Connect(arg),
            "subscribe" | "join" => Input::Subscribe(arg),
            "disconnect" => Input::Disconnect,
            "quit" | "exit" => Input::Quit,
            "help" => Input::Help,
            other => Input::Unknown(other.to_string()),
        }
    }
}

pub const HELP: &str = "\
/connect [token]    connect with a bearer token
/subscribe [room]   join a room (leaves the current one)
/disconnect         close the session
/quit               exit
anything else       send to the current room";
