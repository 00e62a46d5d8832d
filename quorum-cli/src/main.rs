//! Quorum: live quiz server and client.
//!
//! `quorum serve` runs the server and reads operator commands from stdin;
//! `quorum join` connects as one user and submits each typed line as the
//! answer to the open question.

mod args;
mod console;
mod join;
mod serve;

use args::{Cli, Command, Parser};
use log::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { bind, script, log } => {
            info!("Starting Quorum server on {bind}");
            serve::run(Command::server_config(&bind), script.as_deref(), &log).await
        }
        Command::Join { user, server, port } => {
            info!("Joining {server}:{port} as {user}");
            join::run(Command::client_config(&user, &server, port)).await
        }
    }
}
