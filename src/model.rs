//! Higher-level data model built on top of [`crate::protocol`]'s wire types.

use std::net::Ipv4Addr;

use crate::protocol::BackendRecord;

/// A backend server discovered via broadcast, along with the backends it
/// reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRecord {
    /// The server's self-reported name.
    pub name: String,
    /// The address it answered discovery from.
    pub address: Ipv4Addr,
    /// Backends it reported, in the order the response listed them.
    pub backends: Vec<BackendRecord>,
}

/// The set of servers discovered in one `discover` call.
///
/// Insertion-ordered so iteration is deterministic; duplicate responding
/// addresses within one round are collapsed to the first response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveredFleet {
    servers: Vec<ServerRecord>,
}

impl DiscoveredFleet {
    /// An empty fleet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a server, unless its address already appears in the fleet.
    pub fn insert(&mut self, server: ServerRecord) {
        if !self.servers.iter().any(|s| s.address == server.address) {
            self.servers.push(server);
        }
    }

    /// Iterates servers in discovery order.
    pub fn servers(&self) -> impl Iterator<Item = &ServerRecord> {
        self.servers.iter()
    }

    /// True if no server responded.
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

/// The (address, port) pair returned by a session request, ready to dial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTicket {
    /// The server that answered the session request.
    pub remote: Ipv4Addr,
    /// The ephemeral TCP port allocated for this session.
    pub port: u16,
}
