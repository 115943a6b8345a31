//! Selection policy: choosing a free backend, or locating a named one.

use thiserror::Error;

use crate::model::{DiscoveredFleet, ServerRecord};
use crate::protocol::{BackendRecord, Holder};

/// Diagnostics from selecting a backend, named or automatic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    /// No backend in the fleet matched the requested name.
    #[error("Backend {0} not found")]
    NotFound(String),
    /// The named backend exists, but is already held.
    #[error("Backend {0} is in use by {1}", .0, .1.user)]
    InUse(String, Holder),
    /// Automatic selection found no free backend in the whole fleet.
    #[error("no free backend available")]
    NoneAvailable,
}

/// Returns the first backend, in fleet/server order, with no holder.
pub fn pick_free(fleet: &DiscoveredFleet) -> Result<(ServerRecord, BackendRecord), SelectionError> {
    for server in fleet.servers() {
        for backend in &server.backends {
            if backend.is_free() {
                return Ok((server.clone(), backend.clone()));
            }
        }
    }

    Err(SelectionError::NoneAvailable)
}

/// Finds a backend by exact name match. Distinguishes "doesn't exist" from
/// "exists but is held" so callers can render the right diagnostic.
pub fn pick_named(
    fleet: &DiscoveredFleet,
    name: &str,
) -> Result<(ServerRecord, BackendRecord), SelectionError> {
    for server in fleet.servers() {
        for backend in &server.backends {
            if backend.name == name {
                return match &backend.holder {
                    None => Ok((server.clone(), backend.clone())),
                    Some(holder) => Err(SelectionError::InUse(backend.name.clone(), holder.clone())),
                };
            }
        }
    }

    Err(SelectionError::NotFound(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn fleet() -> DiscoveredFleet {
        let mut fleet = DiscoveredFleet::new();
        fleet.insert(ServerRecord {
            name: "server1".into(),
            address: Ipv4Addr::new(10, 0, 0, 1),
            backends: vec![
                BackendRecord {
                    name: "xinu01".into(),
                    kind: "quark".into(),
                    holder: None,
                },
                BackendRecord {
                    name: "xinu02".into(),
                    kind: "galileo".into(),
                    holder: Some(Holder {
                        user: "anon".into(),
                        since: "21:30".into(),
                    }),
                },
            ],
        });
        fleet
    }

    #[test]
    fn pick_free_skips_held_backends() {
        let mut fleet = DiscoveredFleet::new();
        fleet.insert(ServerRecord {
            name: "server1".into(),
            address: Ipv4Addr::new(10, 0, 0, 1),
            backends: vec![BackendRecord {
                name: "xinu02".into(),
                kind: "galileo".into(),
                holder: Some(Holder {
                    user: "anon".into(),
                    since: "21:30".into(),
                }),
            }],
        });
        fleet.insert(ServerRecord {
            name: "server2".into(),
            address: Ipv4Addr::new(10, 0, 0, 2),
            backends: vec![BackendRecord {
                name: "xinu03".into(),
                kind: "quark".into(),
                holder: None,
            }],
        });

        let (server, backend) = pick_free(&fleet).unwrap();
        assert_eq!(server.name, "server2");
        assert_eq!(backend.name, "xinu03");
    }

    #[test]
    fn pick_free_none_available() {
        let fleet = DiscoveredFleet::new();
        assert_eq!(pick_free(&fleet).unwrap_err(), SelectionError::NoneAvailable);
    }

    #[test]
    fn pick_named_in_use() {
        // S3.
        let err = pick_named(&fleet(), "xinu02").unwrap_err();
        assert_eq!(err.to_string(), "Backend xinu02 is in use by anon");
    }

    #[test]
    fn pick_named_not_found() {
        // S4.
        let err = pick_named(&fleet(), "nope").unwrap_err();
        assert_eq!(err.to_string(), "Backend nope not found");
    }

    #[test]
    fn pick_named_free() {
        let (server, backend) = pick_named(&fleet(), "xinu01").unwrap();
        assert_eq!(server.name, "server1");
        assert_eq!(backend.name, "xinu01");
    }
}
