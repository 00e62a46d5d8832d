//! Quiz client: one connection to a quiz server.
//!
//! Questions arrive on the server's `Requests` stream and open a local
//! answer window. An answer is either submitted while the window is open,
//! or kept as a draft that is sent when the server says time is up. The
//! server has stopped taking answers by then, so only submitted answers are
//! sure to be logged.

use std::io::BufReader;
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;

use chrono::Local;
use quorum_core::{
    standard_registry, LogError, Question, Request, Requests, Response, SessionLog, UserResponses,
};
use quorum_markup::Registry;
use tokio::sync::{mpsc, oneshot};

use crate::error::NetError;
use crate::protocol::{EnvelopeReader, DEFAULT_PORT};
use crate::queue::OutboundQueue;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub user: String,
    pub host: String,
    pub port: u16,
    pub queue_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user: "guest".to_string(),
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            queue_capacity: 10,
        }
    }
}

/// Events surfaced to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A question is open for answers.
    QuestionStarted(Question),
    /// Time is up; `answer` is the draft sent in reply, if any.
    QuestionClosed { answer: Option<Response> },
    /// The answer could not be queued for sending.
    AnswerDropped(Response),
    /// The server reported a problem; the session continues.
    ServerError(String),
    /// The server's stream ended or failed.
    Disconnected { reason: Option<String> },
}

enum ClientCommand {
    Draft {
        text: String,
        reply: oneshot::Sender<Result<(), NetError>>,
    },
    Submit {
        text: String,
        reply: oneshot::Sender<Result<Response, NetError>>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionLog>,
    },
    Close,
}

enum Inbound {
    Request(Request),
    Ended(Option<String>),
}

pub struct QuizClient {
    user: String,
    commands: mpsc::Sender<ClientCommand>,
    event_rx: Option<mpsc::Receiver<ClientEvent>>,
}

impl QuizClient {
    /// Connect and send the handshake.
    pub async fn connect(config: ClientConfig) -> Result<Self, NetError> {
        Self::connect_with_registry(config, standard_registry()).await
    }

    pub async fn connect_with_registry(
        config: ClientConfig,
        registry: Registry,
    ) -> Result<Self, NetError> {
        let stream = tokio::net::TcpStream::connect((config.host.as_str(), config.port)).await?;
        let stream = stream.into_std()?;
        stream.set_nonblocking(false)?;
        let reader = stream.try_clone()?;
        let queue = OutboundQueue::open(
            stream,
            UserResponses::ELEMENT,
            &[("user", config.user.as_str())],
            config.queue_capacity,
        )?;
        log::info!(
            "Connected to {}:{} as {}",
            config.host,
            config.port,
            config.user
        );

        let (inbound_tx, inbound_rx) = mpsc::channel(32);
        let (commands_tx, commands_rx) = mpsc::channel(32);
        let (event_tx, event_rx) = mpsc::channel(256);

        let registry = Arc::new(registry);
        thread::Builder::new()
            .name(format!("quorum-reader-{}", config.user))
            .spawn(move || read_server(reader, registry, inbound_tx))?;

        let session = ClientSession {
            user: config.user.clone(),
            queue: Some(queue),
            log: SessionLog::new(),
            capturing: false,
            pending: None,
            events: event_tx,
        };
        tokio::spawn(session.run(inbound_rx, commands_rx));

        Ok(Self {
            user: config.user,
            commands: commands_tx,
            event_rx: Some(event_rx),
        })
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.event_rx.take()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> ClientCommand,
    ) -> Result<T, NetError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| NetError::Shutdown)?;
        rx.await.map_err(|_| NetError::Shutdown)
    }

    /// Keep `text` as the draft answer to the open question, replacing any
    /// earlier draft. The draft is sent when time is up.
    pub async fn answer(&self, text: impl Into<String>) -> Result<(), NetError> {
        let text = text.into();
        self.request(|reply| ClientCommand::Draft { text, reply }).await?
    }

    /// Send an answer now and close the answer window.
    pub async fn submit(&self, text: impl Into<String>) -> Result<Response, NetError> {
        let text = text.into();
        self.request(|reply| ClientCommand::Submit { text, reply }).await?
    }

    /// Questions seen so far and the answers sent for them.
    pub async fn log_snapshot(&self) -> Result<SessionLog, NetError> {
        self.request(|reply| ClientCommand::Snapshot { reply }).await
    }

    /// End the `UserResponses` stream and hang up.
    pub async fn close(&self) -> Result<(), NetError> {
        self.commands
            .send(ClientCommand::Close)
            .await
            .map_err(|_| NetError::Shutdown)
    }
}

struct ClientSession {
    user: String,
    queue: Option<OutboundQueue>,
    log: SessionLog,
    /// The answer window is open.
    capturing: bool,
    /// Latest draft answer to the open question.
    pending: Option<Response>,
    events: mpsc::Sender<ClientEvent>,
}

impl ClientSession {
    async fn run(
        mut self,
        mut inbound: mpsc::Receiver<Inbound>,
        mut commands: mpsc::Receiver<ClientCommand>,
    ) {
        let mut commands_open = true;
        loop {
            tokio::select! {
                item = inbound.recv() => match item {
                    Some(Inbound::Request(request)) => self.on_request(request).await,
                    Some(Inbound::Ended(reason)) => {
                        self.emit(ClientEvent::Disconnected { reason }).await;
                        break;
                    }
                    None => break,
                },
                command = commands.recv(), if commands_open => match command {
                    Some(command) => self.on_command(command),
                    None => {
                        commands_open = false;
                        self.hang_up();
                    }
                },
            }
        }
        self.hang_up();
        log::info!("{} left the session", self.user);
    }

    async fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event).await;
    }

    async fn on_request(&mut self, request: Request) {
        match request {
            Request::Question(question) => {
                log::info!("{} received a question from the server", self.user);
                if self.log.abort_question().is_some() {
                    log::debug!("New question replaces one still open");
                }
                self.capturing = true;
                self.pending = None;
                let epoch = Local::now().naive_local();
                if let Err(e) = self.log.start_question(question.clone(), epoch) {
                    log::warn!("Could not log question: {e}");
                }
                self.emit(ClientEvent::QuestionStarted(question)).await;
            }
            Request::TimesUp(_) => {
                if !self.log.in_progress() {
                    log::debug!("Time's up with no question open, ignored");
                    return;
                }
                let answer = if self.capturing { self.pending.take() } else { None };
                self.capturing = false;
                if let Some(response) = &answer {
                    if let Err(e) = self.log.add_response(response.clone()) {
                        log::debug!("Local log refused answer: {e}");
                    }
                    if let Err(e) = self.send_response(response.clone()) {
                        log::warn!("Answer from {} not sent: {e}", self.user);
                        self.emit(ClientEvent::AnswerDropped(response.clone())).await;
                    }
                }
                let _ = self.log.stop_question();
                self.emit(ClientEvent::QuestionClosed { answer }).await;
            }
            Request::Error(report) => {
                log::warn!("Server error: {report}");
                self.emit(ClientEvent::ServerError(report.message().to_string()))
                    .await;
            }
        }
    }

    fn on_command(&mut self, command: ClientCommand) {
        match command {
            ClientCommand::Draft { text, reply } => {
                let result = if self.capturing {
                    self.pending = Some(Response::new(self.user.clone(), text));
                    Ok(())
                } else {
                    Err(LogError::NotInProgress.into())
                };
                let _ = reply.send(result);
            }
            ClientCommand::Submit { text, reply } => {
                let _ = reply.send(self.submit_now(text));
            }
            ClientCommand::Snapshot { reply } => {
                let _ = reply.send(self.log.clone());
            }
            ClientCommand::Close => self.hang_up(),
        }
    }

    fn submit_now(&mut self, text: String) -> Result<Response, NetError> {
        if !self.capturing {
            return Err(LogError::NotInProgress.into());
        }
        let response = Response::new(self.user.clone(), text);
        self.send_response(response.clone())?;
        self.capturing = false;
        self.pending = None;
        if let Err(e) = self.log.add_response(response.clone()) {
            log::debug!("Local log refused answer: {e}");
        }
        Ok(response)
    }

    fn send_response(&self, response: Response) -> Result<(), NetError> {
        let queue = self.queue.as_ref().ok_or(NetError::Shutdown)?;
        queue.send(response)?;
        Ok(())
    }

    /// Close the outbound stream; the server then closes its side, which
    /// ends the reader thread.
    fn hang_up(&mut self) {
        if let Some(queue) = self.queue.take() {
            log::debug!("{} closing its response stream", self.user);
            drop(queue.close());
        }
    }
}

/// Blocking read loop over the server's `Requests` stream.
fn read_server(stream: TcpStream, registry: Arc<Registry>, inbound: mpsc::Sender<Inbound>) {
    let mut reader = EnvelopeReader::new(registry, BufReader::new(stream), Requests::ELEMENT);
    let result = (|| -> Result<(), NetError> {
        reader.read_open()?;
        if !reader.finish_start_tag()? {
            return Ok(());
        }
        while let Some(doc) = reader.next_document()? {
            let request = Request::from_document(doc)
                .map_err(|doc| NetError::UnexpectedDocument(doc.element_name().to_string()))?;
            log::debug!("Received <{}>", request.as_document().element_name());
            if inbound.blocking_send(Inbound::Request(request)).is_err() {
                return Ok(());
            }
        }
        Ok(())
    })();
    let reason = result.err().map(|e| e.to_string());
    if let Some(reason) = &reason {
        log::warn!("Server stream failed: {reason}");
    }
    let _ = inbound.blocking_send(Inbound::Ended(reason));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::Sink;
    use quorum_core::{ErrorReport, TimesUp};
    use std::io::{self, Write};
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Sink for Capture {}

    fn session(out: &Capture) -> (ClientSession, mpsc::Receiver<ClientEvent>) {
        let queue =
            OutboundQueue::open(out.clone(), UserResponses::ELEMENT, &[("user", "ann")], 10).unwrap();
        let (events, rx) = mpsc::channel(16);
        let session = ClientSession {
            user: "ann".into(),
            queue: Some(queue),
            log: SessionLog::new(),
            capturing: false,
            pending: None,
            events,
        };
        (session, rx)
    }

    /// Close the stream and parse what was sent.
    fn sent(mut session: ClientSession, out: &Capture) -> Vec<Response> {
        if let Some(queue) = session.queue.take() {
            queue.close().join().unwrap();
        }
        let text = String::from_utf8(out.0.lock().unwrap().clone()).unwrap();
        let parsed = standard_registry().parse_str(&text).unwrap();
        parsed.downcast::<UserResponses>().unwrap().responses
    }

    fn draft(session: &mut ClientSession, text: &str) -> Result<(), NetError> {
        let (reply, mut rx) = oneshot::channel();
        session.on_command(ClientCommand::Draft {
            text: text.into(),
            reply,
        });
        rx.try_recv().unwrap()
    }

    #[tokio::test]
    async fn test_times_up_without_question_is_ignored() {
        let out = Capture::default();
        let (mut session, mut events) = session(&out);
        session.on_request(Request::TimesUp(TimesUp)).await;
        assert!(events.try_recv().is_err());
        assert!(session.log.is_empty());
        assert!(sent(session, &out).is_empty());
    }

    #[tokio::test]
    async fn test_draft_sent_on_times_up() {
        let out = Capture::default();
        let (mut session, mut events) = session(&out);
        assert!(draft(&mut session, "early").is_err());

        let question = Question::free_response("Why?");
        session.on_request(Request::Question(question.clone())).await;
        assert_eq!(events.try_recv().unwrap(), ClientEvent::QuestionStarted(question));
        draft(&mut session, "first").unwrap();
        draft(&mut session, "second").unwrap();
        session.on_request(Request::TimesUp(TimesUp)).await;

        match events.try_recv().unwrap() {
            ClientEvent::QuestionClosed { answer: Some(r) } => assert_eq!(r.text(), "second"),
            other => panic!("Expected QuestionClosed, got {other:?}"),
        }
        assert!(!session.log.in_progress());
        assert_eq!(session.log.responses(1).map(|r| r.len()), Some(1));
        let responses = sent(session, &out);
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].user(), "ann");
    }

    #[tokio::test]
    async fn test_submit_closes_window() {
        let out = Capture::default();
        let (mut session, mut events) = session(&out);
        session
            .on_request(Request::Question(Question::free_response("Now?")))
            .await;
        let _ = events.try_recv();

        assert_eq!(session.submit_now("yes".into()).unwrap().text(), "yes");
        assert!(session.submit_now("again".into()).is_err());
        assert!(draft(&mut session, "late").is_err());

        session.on_request(Request::TimesUp(TimesUp)).await;
        assert_eq!(
            events.try_recv().unwrap(),
            ClientEvent::QuestionClosed { answer: None }
        );
        assert_eq!(sent(session, &out).len(), 1);
    }

    #[tokio::test]
    async fn test_server_error_keeps_session() {
        let out = Capture::default();
        let (mut session, mut events) = session(&out);
        session
            .on_request(Request::Error(ErrorReport::new("Duplicate user.")))
            .await;
        assert_eq!(
            events.try_recv().unwrap(),
            ClientEvent::ServerError("Duplicate user.".into())
        );
        assert!(session.queue.is_some());
    }
}
