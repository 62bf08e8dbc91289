// mididermi_protocol — work units and the worker/server wire protocol.
//
// The distributed system exposes exactly two operations:
//   request()      -> Task   hand a worker a random slice of the pool
//   response(Task)           merge a worker's evolved slice back in
// `Distribution` is that surface as a trait. The server-side coordinator
// implements it directly against the reservoir; the TCP client implements it
// by sending `ClientMessage`s and waiting for the matching `ServerMessage`.
// Workers only see the trait, so the same session code runs in-process
// (tests) or over the network.
//
// Module overview:
// - `task.rs`:     `Task`, the one-shot work unit and its local driver.
// - `message.rs`:  Client-to-server and server-to-client message enums.
// - `framing.rs`:  4-byte big-endian length prefix + JSON payload over any
//                  `Read`/`Write`.
//
// A transport failure during `response` leaves the result unknown: the merge
// may or may not have happened and there is no idempotency token, so callers
// must not blindly retry.

pub mod framing;
pub mod message;
pub mod task;

pub use framing::{MAX_FRAME_SIZE, read_frame, receive, send, write_frame};
pub use message::{ClientMessage, ServerMessage, WorkerId};
pub use task::{Task, TaskError, TaskStatus};

/// Bumped on any incompatible change to the message enums.
pub const PROTOCOL_VERSION: u32 = 1;

/// Default TCP port of the pool server.
pub const DEFAULT_PORT: u16 = 1099;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("transport: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("frame too large: {0} bytes (max {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),
    #[error("connection closed")]
    Closed,
    #[error("rejected by server: {0}")]
    Rejected(String),
    #[error("unexpected message: {0}")]
    Unexpected(String),
}

/// The two remote operations.
pub trait Distribution: Send + Sync {
    fn request(&self) -> Result<Task, ProtocolError>;

    fn response(&self, task: Task) -> Result<(), ProtocolError>;
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use mididermi_music::{Melody, Note, Population};

    use super::*;

    fn task() -> Task {
        let mut p = Population::new();
        p.add(Melody::with_notes(
            0,
            9,
            vec![Note::new(60, 1, 10, 64), Note::new(64, 11, 10, 80)],
        ));
        Task::new(&p, 2)
    }

    #[test]
    fn conversation_survives_framing() {
        let mut wire = Vec::new();
        send(
            &mut wire,
            &ClientMessage::Hello {
                protocol_version: PROTOCOL_VERSION,
                worker_name: "w".into(),
            },
        )
        .unwrap();
        send(&mut wire, &ClientMessage::Request).unwrap();
        send(&mut wire, &ClientMessage::Response { task: task() }).unwrap();
        send(&mut wire, &ClientMessage::Goodbye).unwrap();

        let mut cursor = Cursor::new(wire);
        assert!(matches!(
            receive::<_, ClientMessage>(&mut cursor).unwrap(),
            ClientMessage::Hello { protocol_version: PROTOCOL_VERSION, .. }
        ));
        assert!(matches!(receive::<_, ClientMessage>(&mut cursor).unwrap(), ClientMessage::Request));
        match receive::<_, ClientMessage>(&mut cursor).unwrap() {
            ClientMessage::Response { task: got } => {
                assert_eq!(got.epoch_count(), 2);
                assert_eq!(got.result().melodies(), task().result().melodies());
            }
            other => panic!("expected Response, got {other:?}"),
        }
        assert!(matches!(receive::<_, ClientMessage>(&mut cursor).unwrap(), ClientMessage::Goodbye));
    }

    #[test]
    fn server_replies_survive_framing() {
        let mut wire = Vec::new();
        send(&mut wire, &ServerMessage::Welcome { worker_id: WorkerId(3) }).unwrap();
        send(&mut wire, &ServerMessage::Merged { pool_size: 12 }).unwrap();
        send(&mut wire, &ServerMessage::Rejected { reason: "version".into() }).unwrap();

        let mut cursor = Cursor::new(wire);
        assert!(matches!(
            receive::<_, ServerMessage>(&mut cursor).unwrap(),
            ServerMessage::Welcome { worker_id: WorkerId(3) }
        ));
        assert!(matches!(
            receive::<_, ServerMessage>(&mut cursor).unwrap(),
            ServerMessage::Merged { pool_size: 12 }
        ));
        assert!(matches!(
            receive::<_, ServerMessage>(&mut cursor).unwrap(),
            ServerMessage::Rejected { reason } if reason == "version"
        ));
    }
}
