//! Session requester: turn a CONNECT request into a dialable TCP endpoint.

use std::io;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::time::Duration;

use thiserror::Error;

use crate::discovery::DEFAULT_TIMEOUT;
use crate::model::SessionTicket;
use crate::protocol::{self, DecodeError, RequestKind};

/// Errors from [`request_session`].
#[derive(Error, Debug)]
pub enum SessionError {
    /// The request payload didn't fit a 16-byte field.
    #[error("encoding request: {0}")]
    Encoding(#[from] protocol::EncodingError),
    /// No response arrived within the timeout.
    #[error("timed out waiting for session response")]
    Timeout,
    /// The response couldn't be parsed.
    #[error("bad response: {0}")]
    BadResponse(#[from] DecodeError),
    /// An I/O error occurred on the request socket.
    #[error("network error: {0}")]
    Network(#[from] io::Error),
}

/// Requests an ephemeral TCP port for `server`/`class` from `addr`, returning
/// a ticket naming the (IP, port) pair to dial.
pub fn request_session(
    addr: Ipv4Addr,
    user: &str,
    server: &str,
    class: &str,
) -> Result<SessionTicket, SessionError> {
    request_session_with_timeout(addr, user, server, class, DEFAULT_TIMEOUT)
}

/// Like [`request_session`], with an explicit receive timeout.
pub fn request_session_with_timeout(
    addr: Ipv4Addr,
    user: &str,
    server: &str,
    class: &str,
    timeout: Duration,
) -> Result<SessionTicket, SessionError> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.set_read_timeout(Some(timeout))?;

    let request = protocol::encode_request(RequestKind::Connect, user, server, class)?;
    socket.send_to(&request, SocketAddrV4::new(addr, protocol::BACKEND_PORT))?;

    let mut buf = [0u8; 1024];
    let (n, from) = match socket.recv_from(&mut buf) {
        Ok(v) => v,
        Err(err) if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
            return Err(SessionError::Timeout);
        }
        Err(err) => return Err(err.into()),
    };

    log::debug!("session response payload: {:?}", &buf[..n]);
    let port = protocol::decode_session_response(&buf[..n])?;

    let remote = match from.ip() {
        std::net::IpAddr::V4(ip) => ip,
        std::net::IpAddr::V6(_) => addr,
    };

    Ok(SessionTicket { remote, port })
}
