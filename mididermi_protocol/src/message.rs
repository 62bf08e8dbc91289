// Protocol messages between workers and the pool server.
//
// - `ClientMessage`: sent by a worker.
// - `ServerMessage`: sent by the server, one reply per client message.
//
// A connection opens with `Hello`/`Welcome`, then carries any number of
// request/response exchanges, then `Goodbye`. Tasks travel whole, population
// included, as JSON (see `framing.rs`).

use serde::{Deserialize, Serialize};

use crate::task::Task;

/// Server-assigned worker id, unique for the server's lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId(pub u32);

/// Messages sent by a worker to the server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Handshake.
    Hello {
        protocol_version: u32,
        worker_name: String,
    },
    /// Ask for a new task.
    Request,
    /// Hand a calculated task back for merging.
    Response { task: Task },
    /// Worker is leaving gracefully.
    Goodbye,
}

/// Messages sent by the server to a worker.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Handshake accepted.
    Welcome { worker_id: WorkerId },
    /// Handshake or request refused.
    Rejected { reason: String },
    /// A fresh task.
    Assigned { task: Task },
    /// A returned task was merged; the pool now holds `pool_size` melodies.
    Merged { pool_size: usize },
}
