//! Broadcast discovery: enumerate backend servers reachable from this host.

use std::io;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::time::Duration;

use socket2::{Domain, Socket, Type};
use thiserror::Error;

use crate::model::{DiscoveredFleet, ServerRecord};
use crate::protocol::{self, RequestKind};

/// Default per-address receive timeout used by [`discover`].
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Worst-case LIST response size (mirrors the original client's receive buffer).
const MAX_RESPONSE_SIZE: usize = 125_004;

/// Minimum socket receive buffer requested for the discovery socket.
const MIN_RECV_BUFFER: usize = 40_000;

/// Errors that can abort discovery outright. Per-address timeouts and
/// malformed per-address responses are not included here — they just cause
/// that address to be skipped (see [`discover`]).
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// The request payload for `class` didn't fit a 16-byte field.
    #[error("encoding request: {0}")]
    Encoding(#[from] protocol::EncodingError),
    /// Setting up or using the UDP socket failed.
    #[error("network error: {0}")]
    Network(#[from] io::Error),
}

/// Sends the LIST request to every address in `broadcast_addrs` on the
/// backend UDP port, collecting at most one response per responding
/// address.
///
/// A missing response for a given address (receive timeout) skips that
/// address without failing the overall operation; a malformed response does
/// the same, after logging a warning.
pub fn discover(
    class: &str,
    user: &str,
    broadcast_addrs: &[Ipv4Addr],
    timeout: Duration,
) -> Result<DiscoveredFleet, DiscoveryError> {
    let socket = bind_discovery_socket(timeout)?;
    let request = protocol::encode_request(RequestKind::List, user, "", class)?;

    let mut fleet = DiscoveredFleet::new();
    let mut buf = vec![0u8; MAX_RESPONSE_SIZE];

    for &addr in broadcast_addrs {
        let dest = SocketAddrV4::new(addr, protocol::BACKEND_PORT);
        if let Err(err) = socket.send_to(&request, dest) {
            log::warn!("discovery: send to {addr} failed: {err}");
            continue;
        }

        let (n, from) = match socket.recv_from(&mut buf) {
            Ok(v) => v,
            Err(err) if is_timeout(&err) => {
                log::debug!("discovery: no response from {addr}");
                continue;
            }
            Err(err) => return Err(err.into()),
        };

        let source_ip = match from.ip() {
            std::net::IpAddr::V4(ip) => ip,
            std::net::IpAddr::V6(_) => {
                log::warn!("discovery: unexpected IPv6 response from {from}");
                continue;
            }
        };

        match protocol::decode_list_response(&buf[..n]) {
            Ok((name, backends)) => fleet.insert(ServerRecord {
                name,
                address: source_ip,
                backends,
            }),
            Err(err) => log::warn!("discovery: malformed response from {source_ip}: {err}"),
        }
    }

    Ok(fleet)
}

fn bind_discovery_socket(timeout: Duration) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, None)?;
    socket.set_broadcast(true)?;
    socket.set_reuse_address(true)?;
    let _ = socket.set_recv_buffer_size(MIN_RECV_BUFFER);
    socket.set_read_timeout(Some(timeout))?;

    let addr: std::net::SocketAddr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0).into();
    socket.bind(&addr.into())?;

    Ok(socket.into())
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}
