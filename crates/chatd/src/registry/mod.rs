//! Connection registry using the actor pattern.
//!
//! ```text
//! ┌──────────────────┐  RegistryCommand  ┌─────────────────┐  try_send  ┌──────────────────┐
//! │ connection tasks │──────────────────▶│  RegistryActor  │───────────▶│ outbound queues  │
//! └──────────────────┘   (mpsc + reply)  └─────────────────┘            │ (one per client) │
//!                                        HashMap<ConnectionId,          └──────────────────┘
//!                                                Outbound>                       │
//!                                                                        writer task per
//!                                                                        connection
//! ```
//!
//! The actor is the only code that touches the map, so register,
//! deregister and broadcast never race. Delivery is a non-blocking push
//! into each connection's bounded queue; the socket write happens in that
//! connection's own writer task.

use tokio::sync::mpsc;

mod actor;
mod commands;
mod handle;

pub use actor::{RegistryActor, MAX_CONNECTIONS};
pub use commands::{BroadcastReport, Outbound, RegistryCommand, RegistryError};
pub use handle::RegistryHandle;

const COMMAND_BUFFER: usize = 256;

/// Spawns the registry actor and returns a handle to it.
///
/// The actor stops once every clone of the handle is dropped.
pub fn spawn_registry(max_connections: usize) -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let actor = RegistryActor::new(cmd_rx, max_connections);
    tokio::spawn(actor.run());
    RegistryHandle::new(cmd_tx)
}
