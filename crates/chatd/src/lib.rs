//! chatd - real-time chat daemon
//!
//! This crate provides the daemon's building blocks:
//! - `store` - persistence behind the `ChatStore` trait (memory, SQLite)
//! - `cache` - keyed TTL cache holding the recent-history list
//! - `service` - Message Service: read-through history, invalidating writes
//! - `registry` - connection registry actor and non-blocking broadcast
//! - `session` - per-client validate/persist/broadcast behavior
//! - `server` - TCP socket server, one `ConnectionHandler` per client
//! - `http` - axum routes for login, history and sample generation
//! - `auth`, `generator`, `config`, `pidfile` - supporting pieces
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         chatd daemon                         │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  ┌─────────────────┐        ┌─────────────────────────────┐  │
//! │  │   ChatServer    │───────▶│  RegistryActor              │  │
//! │  │  (TCP, NDJSON)  │        │  (connection map owner)     │  │
//! │  └────────┬────────┘        └──────────────┬──────────────┘  │
//! │           │ SendMessage                    │ try_send        │
//! │           ▼                                ▼                 │
//! │  ┌─────────────────┐        ┌─────────────────────────────┐  │
//! │  │ MessageService  │        │ per-connection writer tasks │  │
//! │  │  TtlCache ◀─┐   │        └─────────────────────────────┘  │
//! │  └────────┬────┼───┘                                         │
//! │           ▼    │ invalidate after commit                     │
//! │  ┌─────────────┴───┐        ┌─────────────────────────────┐  │
//! │  │   ChatStore     │◀───────│  axum HTTP surface          │  │
//! │  └─────────────────┘        └─────────────────────────────┘  │
//! │                                                              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! Production code in this crate does not use `.unwrap()`, `.expect()`
//! or `panic!()`. Fallible operations return `Result` or `Option`, and
//! channel closure is handled as a normal shutdown path.

pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod generator;
pub mod http;
pub mod pidfile;
pub mod registry;
pub mod server;
pub mod service;
pub mod session;
pub mod store;
