//! Service actions layered on top of [`crate::session::request_session`]:
//! power-cycling a backend and uploading its image.

use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddrV4, TcpStream};

use thiserror::Error;

use crate::protocol::BackendRecord;
use crate::session::{self, SessionError};

/// Fixed-size chunks used when streaming an image to the backend.
pub const UPLOAD_CHUNK_SIZE: usize = 4096;

const POWERCYCLE_SENTINEL: &[u8; 4] = b"boop";

/// Errors from [`powercycle`] or [`upload_image`].
#[derive(Error, Debug)]
pub enum ActionError {
    /// The session request (for the TCP port) failed.
    #[error("requesting session: {0}")]
    Session(#[from] SessionError),
    /// Reading the image source, or writing/closing the TCP socket, failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Powers off and on the given backend. Opens the POWERCYCLE service TCP
/// socket, writes the 4-byte sentinel `"boop"`, half-closes the write side,
/// and closes — the remote interprets the write-then-close as the signal.
pub fn powercycle(server_addr: Ipv4Addr, backend: &BackendRecord, user: &str) -> Result<(), ActionError> {
    let server = format!("{}-pc", backend.name);
    let ticket = session::request_session(server_addr, user, &server, "POWERCYCLE")?;

    let mut stream = TcpStream::connect(SocketAddrV4::new(ticket.remote, ticket.port))?;
    stream.write_all(POWERCYCLE_SENTINEL)?;
    stream.shutdown(std::net::Shutdown::Write)?;

    Ok(())
}

/// Uploads an image to the given backend. Opens the DOWNLOAD service TCP
/// socket, streams `source` in fixed 4096-byte chunks (the final chunk may
/// be shorter), half-closes, and closes.
pub fn upload_image(
    server_addr: Ipv4Addr,
    backend: &BackendRecord,
    user: &str,
    mut source: impl Read,
) -> Result<(), ActionError> {
    let server = format!("{}-dl", backend.name);
    let ticket = session::request_session(server_addr, user, &server, "DOWNLOAD")?;

    let mut stream = TcpStream::connect(SocketAddrV4::new(ticket.remote, ticket.port))?;

    let mut chunk = [0u8; UPLOAD_CHUNK_SIZE];
    loop {
        let n = source.read(&mut chunk)?;
        if n == 0 {
            break;
        }

        write_all_retrying(&mut stream, &chunk[..n])?;
    }

    stream.shutdown(std::net::Shutdown::Write)?;
    Ok(())
}

/// Writes the whole buffer, retrying on short writes without reordering any
/// bytes.
fn write_all_retrying(stream: &mut TcpStream, mut buf: &[u8]) -> io::Result<()> {
    while !buf.is_empty() {
        let n = stream.write(buf)?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "peer closed during upload"));
        }
        buf = &buf[n..];
    }

    Ok(())
}
