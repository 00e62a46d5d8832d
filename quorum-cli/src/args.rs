use std::path::PathBuf;

pub use clap::Parser;
use clap::Subcommand;
use quorum_net::{ClientConfig, ServerConfig, DEFAULT_PORT};

#[derive(Parser, Debug)]
#[command(name = "quorum", version, about = "Live quiz server and client", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a quiz server and drive it from the console
    Serve {
        /// Address to listen on
        #[arg(long, default_value_t = format!("0.0.0.0:{DEFAULT_PORT}"))]
        bind: String,
        /// Script of prepared questions to load
        #[arg(long)]
        script: Option<PathBuf>,
        /// Where `save` writes the response log
        #[arg(long, default_value = "responses.xml")]
        log: PathBuf,
    },
    /// Join a quiz server and answer its questions
    Join {
        #[arg(long, default_value = "guest")]
        user: String,
        #[arg(long, default_value = "localhost")]
        server: String,
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },
}

impl Command {
    pub fn server_config(bind: &str) -> ServerConfig {
        ServerConfig {
            bind_addr: bind.to_string(),
            ..ServerConfig::default()
        }
    }

    pub fn client_config(user: &str, server: &str, port: u16) -> ClientConfig {
        ClientConfig {
            user: user.to_string(),
            host: server.to_string(),
            port,
            ..ClientConfig::default()
        }
    }
}
