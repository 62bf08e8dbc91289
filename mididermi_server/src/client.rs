// TCP client side of the protocol.
//
// `WorkerClient::connect` opens a connection and performs the Hello/Welcome
// handshake on the calling thread. After that the client is a plain
// `Distribution`: each call writes one message and blocks for the matching
// reply. The stream pair sits behind a mutex so the client can be shared,
// but exchanges on one connection are strictly sequential.
//
// This lives next to the server rather than in the worker crate so that
// integration tests can drive a real server without pulling in any audio or
// terminal code.

use std::io::{BufReader, BufWriter};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use mididermi_protocol::{
    ClientMessage, Distribution, PROTOCOL_VERSION, ProtocolError, ServerMessage, Task, WorkerId,
    receive, send,
};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

struct Connection {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl Connection {
    fn exchange(&mut self, message: &ClientMessage) -> Result<ServerMessage, ProtocolError> {
        send(&mut self.writer, message)?;
        receive(&mut self.reader)
    }
}

pub struct WorkerClient {
    connection: Mutex<Connection>,
    worker_id: WorkerId,
}

impl WorkerClient {
    pub fn connect<A: ToSocketAddrs>(addr: A, worker_name: &str) -> Result<Self, ProtocolError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
        let mut connection = Connection {
            reader: BufReader::new(stream.try_clone()?),
            writer: BufWriter::new(stream),
        };

        let reply = connection.exchange(&ClientMessage::Hello {
            protocol_version: PROTOCOL_VERSION,
            worker_name: worker_name.into(),
        })?;
        let worker_id = match reply {
            ServerMessage::Welcome { worker_id } => worker_id,
            ServerMessage::Rejected { reason } => return Err(ProtocolError::Rejected(reason)),
            other => return Err(unexpected("Welcome", &other)),
        };
        connection.writer.get_ref().set_read_timeout(None)?;
        debug!("connected as worker {}", worker_id.0);

        Ok(WorkerClient {
            connection: Mutex::new(connection),
            worker_id,
        })
    }

    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    /// Say goodbye and close the connection.
    pub fn close(self) -> Result<(), ProtocolError> {
        let mut connection = self.connection.into_inner();
        send(&mut connection.writer, &ClientMessage::Goodbye)
    }
}

impl Distribution for WorkerClient {
    fn request(&self) -> Result<Task, ProtocolError> {
        match self.connection.lock().exchange(&ClientMessage::Request)? {
            ServerMessage::Assigned { task } => Ok(task),
            ServerMessage::Rejected { reason } => Err(ProtocolError::Rejected(reason)),
            other => Err(unexpected("Assigned", &other)),
        }
    }

    fn response(&self, task: Task) -> Result<(), ProtocolError> {
        match self
            .connection
            .lock()
            .exchange(&ClientMessage::Response { task })?
        {
            ServerMessage::Merged { pool_size } => {
                debug!("merged, pool now holds {pool_size}");
                Ok(())
            }
            ServerMessage::Rejected { reason } => Err(ProtocolError::Rejected(reason)),
            other => Err(unexpected("Merged", &other)),
        }
    }
}

fn unexpected(wanted: &str, got: &ServerMessage) -> ProtocolError {
    let got = match got {
        ServerMessage::Welcome { .. } => "Welcome",
        ServerMessage::Rejected { .. } => "Rejected",
        ServerMessage::Assigned { .. } => "Assigned",
        ServerMessage::Merged { .. } => "Merged",
    };
    ProtocolError::Unexpected(format!("expected {wanted}, got {got}"))
}
