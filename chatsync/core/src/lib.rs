//! Chatsync Core - Realtime Message Synchronization Engine
//!
//! This crate keeps a chat conversation with a remote assistant in sync over
//! an unreliable socket, and turns incrementally arriving assistant text into a
//! stable, monotonically advancing display list. It has no rendering or
//! terminal dependencies; any surface can consume its snapshots.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                      Rendering layer                          │
//! │        reads SyncSnapshot, calls submit()/connect()           │
//! └───────────────────────────────┬───────────────────────────────┘
//!                                 │
//! ┌───────────────────────────────┼───────────────────────────────┐
//! │                         CHATSYNC CORE                         │
//! │  ┌────────────────────────────┴────────────────────────────┐  │
//! │  │               ChatClient (one tokio task)               │  │
//! │  │  ┌───────────────────────────────────────────────────┐  │  │
//! │  │  │                    SyncFacade                     │  │  │
//! │  │  │  ┌────────────┐  ┌──────────────┐  ┌───────────┐  │  │  │
//! │  │  │  │ Connection │  │   Message    │  │  Reveal   │  │  │  │
//! │  │  │  │ Supervisor │─▶│   Ledger     │─▶│ Scheduler │  │  │  │
//! │  │  │  └─────┬──────┘  └──────────────┘  └───────────┘  │  │  │
//! │  │  └────────┼──────────────────────────────────────────┘  │  │
//! │  └───────────┼─────────────────────────────────────────────┘  │
//! │       ┌──────┴──────┐                                         │
//! │       │  Transport  │  WebSocket | Loopback                   │
//! │       └─────────────┘                                         │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`ChatClient`]: async handle owning the engine task
//! - [`SyncFacade`]: the sans-IO engine (explicit `Instant`s, no clock reads)
//! - [`ConnectionSupervisor`]: bounded fixed-delay reconnection
//! - [`MessageLedger`]: ordered append/update store keyed by id
//! - [`RevealScheduler`]: per-message fixed-cadence reveal
//! - [`SyncSnapshot`]: connection state plus display list
//!
//! # Quick Start
//!
//! ```ignore
//! use chatsync_core::{ChatClient, config::load_config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config()?;
//!     let client = ChatClient::spawn_websocket(&config);
//!
//!     let mut updates = client.subscribe();
//!     client.submit("What is my balance?").await?;
//!
//!     while updates.changed().await.is_ok() {
//!         let snapshot = updates.borrow().clone();
//!         // render snapshot.messages
//!     }
//!
//!     client.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`transport`]: transport channels (WebSocket, loopback) and the frame codec
//! - [`supervisor`]: connection lifecycle and reconnection
//! - [`ledger`]: message ledger
//! - [`reveal`]: reveal scheduler
//! - [`facade`]: synchronization facade
//! - [`client`]: async driver
//! - [`messages`]: records, roles and ids
//! - [`endpoint`]: target address resolution
//! - [`config`]: layered configuration
//! - [`error`]: error taxonomy

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod facade;
pub mod ledger;
pub mod messages;
pub mod reveal;
pub mod supervisor;
pub mod transport;

pub use client::{ChatClient, ShutdownReport};
pub use config::{ClientConfig, ConfigError, ConfigOverrides, ConfigSource};
pub use endpoint::{resolve_endpoint, EndpointContext};
pub use error::SyncError;
pub use facade::{SyncConfig, SyncFacade, SyncSnapshot};
pub use ledger::{AppendOutcome, MessageLedger};
pub use messages::{AuxiliaryPayload, DisplayRecord, MessageId, MessageRecord, MessageRole};
pub use reveal::{RevealConfig, RevealPhase, RevealScheduler, RevealState};
pub use supervisor::{ConnectionState, ConnectionStatus, ConnectionSupervisor, ReconnectPolicy};
