//! Quiz server: TCP accept loop feeding the session coordinator.
//!
//! ```text
//!   accept ──► OutboundQueue("Requests")  ──► drain thread ──► socket
//!          └─► reader thread: <UserResponses user=".."  ──► Handshake
//!                             <Response/>*                ──► Inbound
//!                             </UserResponses> | EOF      ──► Closed
//! ```

use std::io::BufReader;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;

use quorum_core::{standard_registry, Requests, Response, UserResponses};
use quorum_markup::Registry;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::NetError;
use crate::protocol::{EnvelopeReader, DEFAULT_PORT, MALFORMED_HANDSHAKE};
use crate::queue::OutboundQueue;
use crate::session::{Command, ConnectionId, Coordinator, ServerEvent, SessionHandle};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: String,
    /// Documents buffered per connection before sends start failing.
    pub queue_capacity: usize,
    /// Capacity of the reader-to-coordinator event channel.
    pub event_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{DEFAULT_PORT}"),
            queue_capacity: 10,
            event_capacity: 256,
        }
    }
}

pub struct QuizServer {
    config: ServerConfig,
    registry: Arc<Registry>,
    handle: SessionHandle,
    commands: mpsc::Receiver<Command>,
}

impl QuizServer {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_registry(config, standard_registry())
    }

    /// Use a custom registry for parsing client streams. It must know
    /// `Response`.
    pub fn with_registry(config: ServerConfig, registry: Registry) -> Self {
        let (commands_tx, commands) = mpsc::channel(32);
        Self {
            config,
            registry: Arc::new(registry),
            handle: SessionHandle::new(commands_tx),
            commands,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Handle for driving the session while [`run`](Self::run) is going.
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Accept connections until the session is shut down.
    pub async fn run(self) -> Result<(), NetError> {
        let QuizServer {
            config,
            registry,
            commands,
            ..
        } = self;

        let listener = TcpListener::bind(&config.bind_addr).await?;
        log::info!("Quiz server listening on {}", listener.local_addr()?);

        let (events_tx, events_rx) = mpsc::channel(config.event_capacity.max(1));
        let coordinator = tokio::spawn(Coordinator::new().run(events_rx, commands));

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    if let Err(e) = accept_connection(stream, peer, &config, &registry, &events_tx).await {
                        log::error!("Connection setup failed for {peer}: {e}");
                    }
                }
                _ = events_tx.closed() => break,
            }
        }

        let _ = coordinator.await;
        log::info!("Quiz server on {} stopped", config.bind_addr);
        Ok(())
    }
}

async fn accept_connection(
    stream: tokio::net::TcpStream,
    peer: SocketAddr,
    config: &ServerConfig,
    registry: &Arc<Registry>,
    events: &mpsc::Sender<ServerEvent>,
) -> Result<(), NetError> {
    let stream = stream.into_std()?;
    stream.set_nonblocking(false)?;
    let reader = stream.try_clone()?;
    let queue = OutboundQueue::open(stream, Requests::ELEMENT, &[], config.queue_capacity)?;

    let id = Uuid::new_v4();
    log::debug!("New TCP connection {id} from {peer}");
    events
        .send(ServerEvent::Accepted { id, peer, queue })
        .await
        .map_err(|_| NetError::Shutdown)?;

    let registry = Arc::clone(registry);
    let reader_events = events.clone();
    let spawned = thread::Builder::new()
        .name(format!("quorum-reader-{peer}"))
        .spawn(move || read_client(id, reader, registry, reader_events));
    if let Err(e) = spawned {
        let _ = events.send(ServerEvent::Closed { id }).await;
        return Err(e.into());
    }
    Ok(())
}

/// Blocking read loop for one client connection.
fn read_client(
    id: ConnectionId,
    stream: TcpStream,
    registry: Arc<Registry>,
    events: mpsc::Sender<ServerEvent>,
) {
    let mut reader = EnvelopeReader::new(registry, BufReader::new(stream), UserResponses::ELEMENT);

    let handshake = reader
        .read_open()
        .and_then(|()| reader.read_attribute("user"));
    let user = match handshake {
        Ok(user) => user,
        Err(NetError::Io(e)) => {
            log::debug!("Connection {id} read failed before handshake: {e}");
            let _ = events.blocking_send(ServerEvent::Closed { id });
            return;
        }
        Err(e) => {
            log::warn!("Bad handshake on connection {id}: {e}");
            let _ = events.blocking_send(ServerEvent::Violation {
                id,
                reason: MALFORMED_HANDSHAKE.to_string(),
            });
            return;
        }
    };
    if events
        .blocking_send(ServerEvent::Handshake { id, user })
        .is_err()
    {
        return;
    }

    let event = match read_responses(id, &mut reader, &events) {
        Ok(()) => ServerEvent::Closed { id },
        Err(NetError::Shutdown) => return,
        Err(NetError::Io(e)) => {
            log::debug!("Connection {id} read failed: {e}");
            ServerEvent::Closed { id }
        }
        Err(e) => ServerEvent::Violation {
            id,
            reason: e.to_string(),
        },
    };
    let _ = events.blocking_send(event);
}

fn read_responses<R: std::io::BufRead>(
    id: ConnectionId,
    reader: &mut EnvelopeReader<R>,
    events: &mpsc::Sender<ServerEvent>,
) -> Result<(), NetError> {
    if !reader.finish_start_tag()? {
        return Ok(());
    }
    while let Some(doc) = reader.next_document()? {
        let response = doc
            .downcast::<Response>()
            .map_err(|doc| NetError::UnexpectedDocument(doc.element_name().to_string()))?;
        events
            .blocking_send(ServerEvent::Inbound {
                id,
                response: *response,
            })
            .map_err(|_| NetError::Shutdown)?;
    }
    Ok(())
}
