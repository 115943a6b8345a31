//! Status reporter: a deduplicated tabular view of a discovered fleet.

use std::fmt::Write as _;

use crate::model::DiscoveredFleet;

const NAME_WIDTH: usize = 12;
const TYPE_WIDTH: usize = 10;
const USER_WIDTH: usize = 12;
const TIME_WIDTH: usize = 10;

/// Renders the four-column status table (Backend, Type, User, Time) for
/// `fleet`. A backend name seen on more than one server is reported once,
/// at its first occurrence.
pub fn render(fleet: &DiscoveredFleet) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<nw$}{:<tw$}{:<uw$}{:<sw$}",
        "Backend",
        "Type",
        "User",
        "Time",
        nw = NAME_WIDTH,
        tw = TYPE_WIDTH,
        uw = USER_WIDTH,
        sw = TIME_WIDTH
    );
    let _ = writeln!(
        out,
        "{}",
        "-".repeat(NAME_WIDTH + TYPE_WIDTH + USER_WIDTH + TIME_WIDTH)
    );

    let mut seen = std::collections::HashSet::new();
    for server in fleet.servers() {
        for backend in &server.backends {
            if !seen.insert(backend.name.clone()) {
                continue;
            }

            let (user, time) = match &backend.holder {
                Some(holder) => (holder.user.as_str(), holder.since.as_str()),
                None => ("None", "None"),
            };

            let _ = writeln!(
                out,
                "{:<nw$}{:<tw$}{:<uw$}{:<sw$}",
                backend.name,
                backend.kind,
                user,
                time,
                nw = NAME_WIDTH,
                tw = TYPE_WIDTH,
                uw = USER_WIDTH,
                sw = TIME_WIDTH
            );
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ServerRecord;
    use crate::protocol::{BackendRecord, Holder};
    use std::net::Ipv4Addr;

    #[test]
    fn status_rendering_contains_every_backend_once() {
        // S2.
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
        fleet.insert(ServerRecord {
            name: "server2".into(),
            address: Ipv4Addr::new(10, 0, 0, 2),
            backends: vec![
                BackendRecord {
                    name: "xinu03".into(),
                    kind: "quark".into(),
                    holder: None,
                },
                BackendRecord {
                    name: "xinu04".into(),
                    kind: "quark".into(),
                    holder: None,
                },
            ],
        });

        let rendered = render(&fleet);
        for needle in ["xinu01", "xinu02", "xinu03", "xinu04", "quark", "galileo", "anon", "21:30"] {
            assert!(rendered.contains(needle), "missing {needle:?} in:\n{rendered}");
        }
    }

    #[test]
    fn status_dedup_keeps_first_occurrence() {
        let mut fleet = DiscoveredFleet::new();
        fleet.insert(ServerRecord {
            name: "server1".into(),
            address: Ipv4Addr::new(10, 0, 0, 1),
            backends: vec![BackendRecord {
                name: "xinu01".into(),
                kind: "quark".into(),
                holder: Some(Holder {
                    user: "alice".into(),
                    since: "10:00".into(),
                }),
            }],
        });
        // Different address, same backend name, conflicting state. The first
        // server's response wins.
        fleet.insert(ServerRecord {
            name: "server2".into(),
            address: Ipv4Addr::new(10, 0, 0, 2),
            backends: vec![BackendRecord {
                name: "xinu01".into(),
                kind: "quark".into(),
                holder: None,
            }],
        });

        let rendered = render(&fleet);
        assert_eq!(rendered.matches("xinu01").count(), 1);
        assert!(rendered.contains("alice"));
    }

    #[test]
    fn status_absent_holder_renders_none() {
        let mut fleet = DiscoveredFleet::new();
        fleet.insert(ServerRecord {
            name: "server1".into(),
            address: Ipv4Addr::new(10, 0, 0, 1),
            backends: vec![BackendRecord {
                name: "xinu01".into(),
                kind: "quark".into(),
                holder: None,
            }],
        });

        let rendered = render(&fleet);
        let data_line = rendered.lines().nth(2).unwrap();
        assert!(data_line.contains("None"));
    }
}
