//! # quorum-net — Live quiz sessions over TCP
//!
//! Streams `quorum-core` documents between one quiz server and many
//! clients. Each direction of a connection is a single long-lived envelope
//! element written one child at a time.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   <UserResponses user="..">   ┌─────────────┐
//! │ QuizClient  │ ─────────────────────────────► │ QuizServer  │
//! │ (per user)  │ ◄───────────────────────────── │ (central)   │
//! └──────┬──────┘          <Requests>            └──────┬──────┘
//!        │                                              │
//!        ▼                                              ▼
//! ┌─────────────┐                               ┌───────────────┐
//! │ local log   │                               │ Coordinator   │
//! │ + answer    │                               │ (users, log)  │
//! └─────────────┘                               └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — Envelope reading, handshake, port and message constants
//! - [`queue`] — Bounded per-connection outbound stream with a drain thread
//! - [`session`] — Server coordinator actor and its handle
//! - [`server`] — TCP accept loop and per-connection readers
//! - [`client`] — Client connection, answer window and events

pub mod client;
pub mod error;
pub mod protocol;
pub mod queue;
pub mod server;
pub mod session;

pub use client::{ClientConfig, ClientEvent, QuizClient};
pub use error::{NetError, QueueError};
pub use protocol::{EnvelopeReader, DEFAULT_PORT};
pub use queue::{OutboundQueue, Sink};
pub use server::{QuizServer, ServerConfig};
pub use session::{BroadcastReport, ConnectionId, ServerStats, SessionHandle};
