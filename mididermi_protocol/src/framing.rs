// Length-delimited JSON framing.
//
// Wire format: a 4-byte big-endian length prefix followed by that many bytes
// of JSON. `write_frame`/`read_frame` move raw payloads; `send`/`receive`
// add the serde step for any message type.
//
// `MAX_FRAME_SIZE` (16 MB) bounds the allocation a length prefix can cause.
// Tasks are the largest messages: a population of a few dozen melodies is a
// few hundred KB of JSON at most.

use std::io::{self, Read, Write};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::ProtocolError;

pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Write one frame: length prefix, then payload, then flush.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), ProtocolError> {
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|&len| len <= MAX_FRAME_SIZE)
        .ok_or(ProtocolError::FrameTooLarge(payload.len()))?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame.
///
/// A stream that ends cleanly before the length prefix is `Closed`; one that
/// ends mid-frame is an I/O error (`UnexpectedEof`).
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>, ProtocolError> {
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        match reader.read(&mut len_buf[filled..]) {
            Ok(0) if filled == 0 => return Err(ProtocolError::Closed),
            Ok(0) => return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into()),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(len as usize));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn send<W: Write, T: Serialize>(writer: &mut W, msg: &T) -> Result<(), ProtocolError> {
    write_frame(writer, &serde_json::to_vec(msg)?)
}

pub fn receive<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<T, ProtocolError> {
    Ok(serde_json::from_slice(&read_frame(reader)?)?)
}
