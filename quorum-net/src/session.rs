//! Server-side session coordinator.
//!
//! One tokio task owns every piece of shared state:
//!
//! ```text
//!   reader threads ── ServerEvent ──┐
//!                                   ├──► Coordinator { connections, users, log, stats }
//!   SessionHandle  ── Command ──────┘          │
//!                  ◄── oneshot reply ──────────┤
//!                                              └──► OutboundQueue per connection
//! ```
//!
//! Connections start out pending and become live once their handshake names
//! a user nobody else holds.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Local;
use quorum_core::{ErrorReport, LogError, Question, Response, SessionLog, TimesUp};
use quorum_markup::Document;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::error::{NetError, QueueError};
use crate::protocol::DUPLICATE_USER;
use crate::queue::OutboundQueue;

pub type ConnectionId = Uuid;

/// Posted by the accept loop and the per-connection reader threads.
#[derive(Debug)]
pub(crate) enum ServerEvent {
    Accepted {
        id: ConnectionId,
        peer: SocketAddr,
        queue: OutboundQueue,
    },
    Handshake {
        id: ConnectionId,
        user: String,
    },
    Inbound {
        id: ConnectionId,
        response: Response,
    },
    /// The peer broke protocol; `reason` is sent back before closing.
    Violation {
        id: ConnectionId,
        reason: String,
    },
    Closed {
        id: ConnectionId,
    },
}

pub(crate) enum Command {
    Start {
        question: Question,
        reply: oneshot::Sender<Result<BroadcastReport, LogError>>,
    },
    Stop {
        reply: oneshot::Sender<Result<BroadcastReport, LogError>>,
    },
    Abort {
        reply: oneshot::Sender<Result<BroadcastReport, LogError>>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionLog>,
    },
    ClearLog {
        reply: oneshot::Sender<()>,
    },
    LiveUsers {
        reply: oneshot::Sender<Vec<String>>,
    },
    Stats {
        reply: oneshot::Sender<ServerStats>,
    },
    Shutdown,
}

/// Outcome of sending one document to every live connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ServerStats {
    pub total_connections: u64,
    pub live_connections: usize,
    pub pending_connections: usize,
    pub rejected_handshakes: u64,
    pub protocol_violations: u64,
    pub responses_logged: u64,
    pub responses_rejected: u64,
    pub documents_sent: u64,
    pub documents_dropped: u64,
    pub questions_asked: u64,
    pub question_in_progress: bool,
}

/// Cloneable access to a running server's session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
}

impl SessionHandle {
    pub(crate) fn new(commands: mpsc::Sender<Command>) -> Self {
        Self { commands }
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, NetError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| NetError::Shutdown)?;
        rx.await.map_err(|_| NetError::Shutdown)
    }

    /// Log `question` as in progress and send it to every live user.
    pub async fn start_question(&self, question: Question) -> Result<BroadcastReport, NetError> {
        Ok(self
            .request(|reply| Command::Start { question, reply })
            .await??)
    }

    /// Keep the question in progress and tell every live user time is up.
    pub async fn stop_question(&self) -> Result<BroadcastReport, NetError> {
        Ok(self.request(|reply| Command::Stop { reply }).await??)
    }

    /// Drop the question in progress and its responses.
    pub async fn abort_question(&self) -> Result<BroadcastReport, NetError> {
        Ok(self.request(|reply| Command::Abort { reply }).await??)
    }

    pub async fn log_snapshot(&self) -> Result<SessionLog, NetError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    pub async fn clear_log(&self) -> Result<(), NetError> {
        self.request(|reply| Command::ClearLog { reply }).await
    }

    /// Users with a completed handshake, sorted.
    pub async fn live_users(&self) -> Result<Vec<String>, NetError> {
        self.request(|reply| Command::LiveUsers { reply }).await
    }

    pub async fn stats(&self) -> Result<ServerStats, NetError> {
        self.request(|reply| Command::Stats { reply }).await
    }

    /// Close every connection and stop the server.
    pub async fn shutdown(&self) -> Result<(), NetError> {
        self.commands
            .send(Command::Shutdown)
            .await
            .map_err(|_| NetError::Shutdown)
    }
}

struct Connection {
    peer: SocketAddr,
    user: Option<String>,
    queue: OutboundQueue,
}

#[derive(Default)]
pub(crate) struct Coordinator {
    connections: HashMap<ConnectionId, Connection>,
    users: HashMap<String, ConnectionId>,
    log: SessionLog,
    stats: ServerStats,
}

impl Coordinator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn run(
        mut self,
        mut events: mpsc::Receiver<ServerEvent>,
        mut commands: mpsc::Receiver<Command>,
    ) {
        let mut commands_open = true;
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
                command = commands.recv(), if commands_open => match command {
                    Some(Command::Shutdown) => break,
                    Some(command) => self.handle_command(command),
                    None => commands_open = false,
                },
            }
        }

        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        for id in ids {
            self.drop_connection(id);
        }
        log::info!("Session coordinator stopped");
    }

    fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Accepted { id, peer, queue } => {
                log::debug!("Connection {id} accepted from {peer}");
                self.stats.total_connections += 1;
                self.connections.insert(
                    id,
                    Connection {
                        peer,
                        user: None,
                        queue,
                    },
                );
            }
            ServerEvent::Handshake { id, user } => self.on_handshake(id, user),
            ServerEvent::Inbound { id, response } => self.on_response(id, response),
            ServerEvent::Violation { id, reason } => {
                let Some(conn) = self.connections.get(&id) else {
                    return;
                };
                log::warn!("Protocol violation from {}: {reason}", conn.peer);
                self.stats.protocol_violations += 1;
                self.send_to(id, ErrorReport::new(reason));
                self.drop_connection(id);
            }
            ServerEvent::Closed { id } => self.drop_connection(id),
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { question, reply } => {
                let _ = reply.send(self.start_question(question));
            }
            Command::Stop { reply } => {
                let result = match self.log.stop_question() {
                    Ok(entry) => {
                        log::info!(
                            "Question stopped with {} responses: {}",
                            entry.responses.len(),
                            entry.question.prompt()
                        );
                        Ok(())
                    }
                    Err(e) => Err(e),
                };
                let _ = reply.send(result.map(|()| self.broadcast(Arc::new(TimesUp))));
            }
            Command::Abort { reply } => {
                let result = match self.log.abort_question() {
                    Some(entry) => {
                        log::info!("Aborted question: {}", entry.question.prompt());
                        Ok(self.broadcast(Arc::new(TimesUp)))
                    }
                    None => Err(LogError::NotInProgress),
                };
                let _ = reply.send(result);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.log.clone());
            }
            Command::ClearLog { reply } => {
                self.log.clear();
                let _ = reply.send(());
            }
            Command::LiveUsers { reply } => {
                let mut users: Vec<String> = self.users.keys().cloned().collect();
                users.sort();
                let _ = reply.send(users);
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.snapshot_stats());
            }
            Command::Shutdown => {}
        }
    }

    fn start_question(&mut self, question: Question) -> Result<BroadcastReport, LogError> {
        let epoch = Local::now().naive_local();
        self.log.start_question(question.clone(), epoch)?;
        self.stats.questions_asked += 1;
        log::info!("Question started: {}", question.prompt());
        Ok(self.broadcast(Arc::new(question)))
    }

    fn on_handshake(&mut self, id: ConnectionId, user: String) {
        let Some(conn) = self.connections.get(&id) else {
            return;
        };
        if self.users.contains_key(&user) {
            log::warn!("Rejecting duplicate user {user} from {}", conn.peer);
            self.stats.rejected_handshakes += 1;
            self.send_to(id, ErrorReport::new(DUPLICATE_USER));
            self.drop_connection(id);
            return;
        }

        log::info!("User {user} joined from {}", conn.peer);
        self.users.insert(user.clone(), id);
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.user = Some(user);
        }
        // Late joiners still get to answer the question in progress.
        if let Some(question) = self.log.current_question() {
            let question: Arc<dyn Document> = Arc::new(question.clone());
            self.deliver(id, question);
        }
    }

    fn on_response(&mut self, id: ConnectionId, response: Response) {
        let Some(user) = self.connections.get(&id).and_then(|c| c.user.as_deref()) else {
            return;
        };
        log::debug!("Response from {user}: {response}");
        match self.log.add_response(response) {
            Ok(()) => self.stats.responses_logged += 1,
            Err(e) => {
                log::warn!("Rejected response from {user}: {e}");
                self.stats.responses_rejected += 1;
                self.send_to(id, ErrorReport::new(e.to_string()));
            }
        }
    }

    /// Send to every live connection; connections whose stream is gone are
    /// torn down.
    fn broadcast(&mut self, doc: Arc<dyn Document>) -> BroadcastReport {
        let live: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, conn)| conn.user.is_some())
            .map(|(id, _)| *id)
            .collect();
        let mut report = BroadcastReport::default();
        for id in live {
            if self.deliver(id, doc.clone()) {
                report.delivered += 1;
            } else {
                report.dropped += 1;
            }
        }
        log::debug!(
            "Broadcast <{}>: {} delivered, {} dropped",
            doc.element_name(),
            report.delivered,
            report.dropped
        );
        report
    }

    fn send_to<D: Document>(&mut self, id: ConnectionId, doc: D) -> bool {
        self.deliver(id, Arc::new(doc))
    }

    fn deliver(&mut self, id: ConnectionId, doc: Arc<dyn Document>) -> bool {
        let Some(conn) = self.connections.get(&id) else {
            return false;
        };
        match conn.queue.enqueue(doc) {
            Ok(()) => {
                self.stats.documents_sent += 1;
                true
            }
            Err(QueueError::Full) => {
                log::warn!("Outbound queue full for {}, message dropped", conn.peer);
                self.stats.documents_dropped += 1;
                false
            }
            Err(QueueError::Closed) => {
                log::warn!("Outbound stream to {} is gone", conn.peer);
                self.stats.documents_dropped += 1;
                self.drop_connection(id);
                false
            }
        }
    }

    fn drop_connection(&mut self, id: ConnectionId) {
        let Some(conn) = self.connections.remove(&id) else {
            return;
        };
        if let Some(user) = &conn.user {
            if self.users.get(user) == Some(&id) {
                self.users.remove(user);
            }
            log::info!("User {user} disconnected ({})", conn.peer);
        } else {
            log::debug!("Connection {id} from {} closed", conn.peer);
        }
        // The drain thread finishes on its own; nothing waits for it here.
        drop(conn.queue.close());
    }

    fn snapshot_stats(&self) -> ServerStats {
        let live = self.users.len();
        ServerStats {
            live_connections: live,
            pending_connections: self.connections.len() - live,
            question_in_progress: self.log.in_progress(),
            ..self.stats.clone()
        }
    }
}
