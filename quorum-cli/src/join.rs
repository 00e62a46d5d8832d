use std::error::Error;

use quorum_net::{ClientConfig, ClientEvent, QuizClient};
use tokio::io::{AsyncBufReadExt, BufReader};

pub async fn run(config: ClientConfig) -> Result<(), Box<dyn Error>> {
    let mut client = QuizClient::connect(config).await?;
    let mut events = client.take_event_rx().ok_or("event stream already taken")?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ClientEvent::QuestionStarted(question)) => {
                    println!("{} received a Question from the server.", client.user());
                    print!("{question}");
                    if question.is_choice() {
                        println!("Your answer: ");
                    } else {
                        println!();
                    }
                }
                Some(ClientEvent::QuestionClosed { answer }) => {
                    println!("Time's up.");
                    if let Some(answer) = answer {
                        println!("Sent draft answer: {}", answer.text());
                    }
                }
                Some(ClientEvent::AnswerDropped(answer)) => {
                    println!("Could not send answer: {}", answer.text());
                }
                Some(ClientEvent::ServerError(message)) => {
                    println!("{} received an Error: {message}", client.user());
                }
                Some(ClientEvent::Disconnected { reason }) => {
                    match reason {
                        Some(reason) => println!("Disconnected: {reason}"),
                        None => println!("Server closed the session."),
                    }
                    break;
                }
                None => break,
            },
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => match client.submit(line.trim()).await {
                    Ok(_) => println!("Answer submitted."),
                    Err(e) => println!("{e}"),
                },
                None => {
                    stdin_open = false;
                    client.close().await?;
                }
            },
        }
    }
    Ok(())
}
