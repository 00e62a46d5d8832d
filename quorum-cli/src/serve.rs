use std::error::Error;
use std::path::Path;

use quorum_core::{standard_registry, Script};
use quorum_net::{QuizServer, ServerConfig, SessionHandle};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::console::{ConsoleCommand, HELP};

pub async fn run(
    config: ServerConfig,
    script: Option<&Path>,
    log_path: &Path,
) -> Result<(), Box<dyn Error>> {
    let script = match script {
        Some(path) => {
            let script: Script = standard_registry().load_as(path)?;
            log::info!("Loaded {} questions from {}", script.len(), path.display());
            script
        }
        None => Script::new(),
    };

    let server = QuizServer::new(config);
    let handle = server.handle();
    let server_task = tokio::spawn(server.run());

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<ConsoleCommand>() {
            Ok(ConsoleCommand::Quit) => break,
            Ok(command) => {
                if let Err(e) = execute(command, &handle, &script, log_path).await {
                    println!("{e}");
                }
            }
            Err(e) => println!("{e}"),
        }
    }

    handle.shutdown().await?;
    server_task.await??;
    Ok(())
}

async fn execute(
    command: ConsoleCommand,
    handle: &SessionHandle,
    script: &Script,
    log_path: &Path,
) -> Result<(), Box<dyn Error>> {
    match command {
        ConsoleCommand::List => {
            if script.is_empty() {
                println!("(no script loaded)");
            }
            for (i, question) in script.iter().enumerate() {
                println!("[{}] {}", i + 1, question.prompt());
            }
        }
        ConsoleCommand::Start(n) => {
            let question = script
                .get(n)
                .ok_or_else(|| format!("No question {n} in the script"))?;
            let report = handle.start_question(question.clone()).await?;
            println!(
                "Question {n} sent to {} users ({} dropped)",
                report.delivered, report.dropped
            );
        }
        ConsoleCommand::Stop => {
            let report = handle.stop_question().await?;
            println!("Time's up sent to {} users", report.delivered);
        }
        ConsoleCommand::Abort => {
            handle.abort_question().await?;
            println!("Question aborted");
        }
        ConsoleCommand::Users => {
            let users = handle.live_users().await?;
            println!("{} connected: {}", users.len(), users.join(", "));
        }
        ConsoleCommand::Log => {
            let log = handle.log_snapshot().await?;
            let tallies: Vec<_> = (1..=log.len()).filter_map(|i| log.tally(i)).collect();
            println!("{}", serde_json::to_string_pretty(&tallies)?);
        }
        ConsoleCommand::Stats => {
            let stats = handle.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        ConsoleCommand::Save => {
            let log = handle.log_snapshot().await?;
            quorum_markup::save(&log, log_path)?;
            println!("Saved {} questions to {}", log.len(), log_path.display());
        }
        ConsoleCommand::Help => println!("{HELP}"),
        ConsoleCommand::Quit => {}
    }
    Ok(())
}
