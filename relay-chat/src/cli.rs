use std::net::IpAddr;

use clap::{Args, Parser, Subcommand};

use crate::config::{DEFAULT_ALLOWED_ORIGIN, DEFAULT_PORT, RelayConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay, rebroadcasting every event to every connected client.
    Relay(RelayArgs),
    /// Connect to a relay and chat from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RelayArgs {
    /// Address the relay binds to.
    #[arg(long, env = "RELAY_HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// TCP port to listen on. Use 0 for an ephemeral port.
    #[arg(long, env = "RELAY_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Browser origin allowed by CORS.
    #[arg(long, env = "RELAY_ALLOWED_ORIGIN", default_value = DEFAULT_ALLOWED_ORIGIN)]
    pub allowed_origin: String,
}

impl From<RelayArgs> for RelayConfig {
    fn from(args: RelayArgs) -> Self {
        Self {
            host: args.host,
            port: args.port,
            allowed_origin: args.allowed_origin,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Display name, also used to route private messages.
    #[arg(long)]
    pub username: String,

    /// Websocket URL of the relay.
    #[arg(long, default_value = "ws://127.0.0.1:3000/ws")]
    pub server: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_defaults_match_config_defaults() {
        let cli = Cli::try_parse_from(["relay_chat", "relay"]).expect("parse relay args");
        let Command::Relay(args) = cli.command else {
            panic!("expected relay command");
        };
        assert_eq!(RelayConfig::from(args), RelayConfig::default());
    }

    #[test]
    fn client_requires_username() {
        assert!(Cli::try_parse_from(["relay_chat", "client"]).is_err());
        let cli = Cli::try_parse_from(["relay_chat", "client", "--username", "alice"])
            .expect("parse client args");
        let Command::Client(args) = cli.command else {
            panic!("expected client command");
        };
        assert_eq!(args.username, "alice");
        assert_eq!(args.server, "ws://127.0.0.1:3000/ws");
    }
}
