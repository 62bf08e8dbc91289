// TCP front end for the coordinator.
//
// Architecture: one accept thread plus one thread per connection.
//
// - **Accept thread**: polls a non-blocking `TcpListener` so it can notice
//   `ServerHandle::stop`. Each accepted stream gets its own handler thread.
// - **Connection threads**: read the `Hello` handshake (5 s timeout), then
//   serve `Request`/`Response` messages in order, one reply per message,
//   until `Goodbye`, EOF or a protocol error. They call straight into the
//   shared `Coordinator`; the pool's own lock provides the mutual exclusion.
//
// There is no central event loop: a worker may sit in a single exchange for
// as long as its listener takes, and other workers are unaffected.
//
// Shutdown stops accepting. Connections already open finish when their worker
// disconnects.

use std::io::{BufReader, BufWriter};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use mididermi_protocol::{
    ClientMessage, Distribution, PROTOCOL_VERSION, ProtocolError, ServerMessage, WorkerId,
    receive, send,
};

use crate::coordinator::Coordinator;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Handle returned by `start_server` to control the running server.
pub struct ServerHandle {
    keep_running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl ServerHandle {
    /// Stop accepting connections and wait for the accept thread to exit.
    pub fn stop(mut self) {
        self.keep_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

/// Start serving on a background thread. Returns a handle for stopping it
/// and the bound address (port 0 lets the OS pick a free port).
pub fn start_server(
    coordinator: Arc<Coordinator>,
    bind: &str,
    port: u16,
) -> std::io::Result<(ServerHandle, SocketAddr)> {
    let listener = TcpListener::bind((bind, port))?;
    let addr = listener.local_addr()?;
    listener.set_nonblocking(true)?;
    let keep_running = Arc::new(AtomicBool::new(true));
    let keep_running_clone = Arc::clone(&keep_running);

    let thread = thread::spawn(move || {
        accept_loop(listener, coordinator, keep_running_clone);
    });
    info!("listening on {addr}");

    Ok((
        ServerHandle {
            keep_running,
            thread: Some(thread),
        },
        addr,
    ))
}

fn accept_loop(listener: TcpListener, coordinator: Arc<Coordinator>, keep_running: Arc<AtomicBool>) {
    let next_worker = Arc::new(AtomicU32::new(0));
    while keep_running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!("connection from {peer}");
                let coordinator = Arc::clone(&coordinator);
                let next_worker = Arc::clone(&next_worker);
                thread::spawn(move || {
                    if let Err(e) = serve_connection(stream, &coordinator, &next_worker) {
                        warn!("connection from {peer} ended with error: {e}");
                    }
                    debug!("connection from {peer} closed");
                });
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                warn!("accept failed, shutting down listener: {e}");
                break;
            }
        }
    }
}

fn serve_connection(
    stream: TcpStream,
    coordinator: &Coordinator,
    next_worker: &AtomicU32,
) -> Result<(), ProtocolError> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = BufWriter::new(stream);

    let worker_id = match receive::<_, ClientMessage>(&mut reader)? {
        ClientMessage::Hello {
            protocol_version,
            worker_name,
        } => {
            if protocol_version != PROTOCOL_VERSION {
                let reason = format!(
                    "protocol version {protocol_version} not supported (server speaks {PROTOCOL_VERSION})"
                );
                send(&mut writer, &ServerMessage::Rejected { reason: reason.clone() })?;
                return Err(ProtocolError::Rejected(reason));
            }
            let id = WorkerId(next_worker.fetch_add(1, Ordering::Relaxed));
            info!("worker {} ({worker_name}) joined", id.0);
            id
        }
        other => {
            return Err(ProtocolError::Unexpected(format!(
                "expected Hello, got {}",
                message_name(&other)
            )));
        }
    };
    send(&mut writer, &ServerMessage::Welcome { worker_id })?;
    // Exchanges wait on a human; no timeout after the handshake.
    writer.get_ref().set_read_timeout(None)?;

    loop {
        let message = match receive::<_, ClientMessage>(&mut reader) {
            Ok(message) => message,
            Err(ProtocolError::Closed) => return Ok(()),
            Err(e) => return Err(e),
        };
        let reply = match message {
            ClientMessage::Request => match coordinator.request() {
                Ok(task) => ServerMessage::Assigned { task },
                Err(e) => ServerMessage::Rejected {
                    reason: e.to_string(),
                },
            },
            ClientMessage::Response { task } => match coordinator.response(task) {
                Ok(()) => ServerMessage::Merged {
                    pool_size: coordinator.pool().len(),
                },
                Err(e) => ServerMessage::Rejected {
                    reason: e.to_string(),
                },
            },
            ClientMessage::Goodbye => {
                info!("worker {} left", worker_id.0);
                return Ok(());
            }
            ClientMessage::Hello { .. } => ServerMessage::Rejected {
                reason: "already greeted".into(),
            },
        };
        send(&mut writer, &reply)?;
    }
}

fn message_name(message: &ClientMessage) -> &'static str {
    match message {
        ClientMessage::Hello { .. } => "Hello",
        ClientMessage::Request => "Request",
        ClientMessage::Response { .. } => "Response",
        ClientMessage::Goodbye => "Goodbye",
    }
}
