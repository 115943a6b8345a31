//! Orchestration: glues discovery, selection, the service actions, the
//! session requester, and tunnel construction into the sequence the CLI
//! drives (§4.8). Raw-mode terminal setup, argument parsing, and the actual
//! bytes of the debugger script are left to external collaborators.

use std::io;
use std::net::{Ipv4Addr, SocketAddrV4, TcpStream};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::actions::{self, ActionError};
use crate::discovery::{self, DiscoveryError};
use crate::model::{DiscoveredFleet, ServerRecord};
use crate::protocol::BackendRecord;
use crate::select::{self, SelectionError};
use crate::session::{self, SessionError};
use crate::status;
use crate::tunnel::ConsoleTunnel;

/// Enumerates the host's IPv4 broadcast addresses. The core has no
/// interface-enumeration primitive of its own; the CLI supplies one.
pub trait BroadcastSource {
    fn broadcast_addresses(&self) -> io::Result<Vec<Ipv4Addr>>;
}

/// Persists the debugger startup script once the session's loopback port is
/// known.
pub trait DebuggerScript {
    fn write(&self, debugger_port: u16, executable: &Path) -> io::Result<()>;
}

/// Parameters gathered from the CLI surface (§6), independent of how they
/// were parsed.
pub struct Options<'a> {
    pub class: String,
    pub user: String,
    pub backend_name: Option<String>,
    pub image_path: &'a Path,
    pub executable_path: &'a Path,
    pub status_only: bool,
    pub powercycle: bool,
    pub upload: bool,
}

/// Terminal outcome of everything up to (but not including) the interactive
/// multiplex loop.
pub enum Outcome {
    /// `--status` was requested; this is the rendered table.
    Status(String),
    /// Selection failed in a user-visible, non-fatal way (S3/S4). The caller
    /// prints this and exits 0.
    Diagnostic(String),
    /// A session was established; drive `tunnel` to completion next.
    Connected { tunnel: ConsoleTunnel, debugger_port: u16 },
}

/// Fatal errors: everything that isn't a user-visible selection diagnostic.
#[derive(Error, Debug)]
pub enum OrchestrationError {
    #[error("enumerating broadcast addresses: {0}")]
    BroadcastEnumeration(io::Error),
    #[error("discovery: {0}")]
    Discovery(#[from] DiscoveryError),
    #[error("no image at {0}")]
    MissingImage(PathBuf),
    #[error("uploading image: {0}")]
    Upload(ActionError),
    #[error("requesting session: {0}")]
    Session(#[from] SessionError),
    #[error("connecting to backend: {0}")]
    Connect(io::Error),
    #[error("setting up debug tunnel: {0}")]
    Tunnel(io::Error),
    #[error("writing debugger script: {0}")]
    DebuggerScript(io::Error),
    #[error("power-cycling backend: {0}")]
    Powercycle(ActionError),
}

/// Resolves the effective backend class: explicit option, else `CS_CLASS`,
/// else `"quark"`.
pub fn resolve_class(explicit: Option<String>, env: impl Fn(&str) -> Option<String>) -> String {
    explicit.or_else(|| env("CS_CLASS")).unwrap_or_else(|| "quark".to_string())
}

/// Runs discovery, selection, upload, session negotiation, and tunnel
/// construction. Returns once the caller has everything needed to drive the
/// interactive loop, or a `Status`/`Diagnostic` outcome that ends the
/// program with exit code 0.
pub fn run(
    opts: &Options<'_>,
    broadcast: &dyn BroadcastSource,
    script: &dyn DebuggerScript,
) -> Result<Outcome, OrchestrationError> {
    let addrs = broadcast.broadcast_addresses().map_err(OrchestrationError::BroadcastEnumeration)?;
    let fleet = discovery::discover(&opts.class, &opts.user, &addrs, discovery::DEFAULT_TIMEOUT)?;

    if opts.status_only {
        return Ok(Outcome::Status(status::render(&fleet)));
    }

    let (server, backend) = match pick(&fleet, opts.backend_name.as_deref()) {
        Ok(pair) => pair,
        Err(diagnostic) => return Ok(Outcome::Diagnostic(diagnostic.to_string())),
    };

    if opts.upload {
        let image = std::fs::File::open(opts.image_path)
            .map_err(|_| OrchestrationError::MissingImage(opts.image_path.to_path_buf()))?;
        actions::upload_image(server.address, &backend, &opts.user, image).map_err(OrchestrationError::Upload)?;
    }

    let ticket = session::request_session(server.address, &opts.user, &backend.name, &backend.kind)?;
    let stream = TcpStream::connect(SocketAddrV4::new(ticket.remote, ticket.port))
        .map_err(OrchestrationError::Connect)?;

    let tunnel = ConsoleTunnel::new(stream).map_err(OrchestrationError::Tunnel)?;
    let debugger_port = tunnel.debugger_port();
    log::info!("debugger listening on 127.0.0.1:{debugger_port}");

    script.write(debugger_port, opts.executable_path).map_err(OrchestrationError::DebuggerScript)?;

    if opts.powercycle {
        actions::powercycle(server.address, &backend, &opts.user).map_err(OrchestrationError::Powercycle)?;
    }

    Ok(Outcome::Connected { tunnel, debugger_port })
}

fn pick(
    fleet: &DiscoveredFleet,
    name: Option<&str>,
) -> Result<(ServerRecord, BackendRecord), SelectionError> {
    match name {
        Some(name) => select::pick_named(fleet, name),
        None => select::pick_free(fleet),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoBroadcasts;
    impl BroadcastSource for NoBroadcasts {
        fn broadcast_addresses(&self) -> io::Result<Vec<Ipv4Addr>> {
            Ok(Vec::new())
        }
    }

    struct NoopScript;
    impl DebuggerScript for NoopScript {
        fn write(&self, _debugger_port: u16, _executable: &Path) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn status_only_short_circuits_before_selection() {
        let opts = Options {
            class: "quark".into(),
            user: "test".into(),
            backend_name: None,
            image_path: Path::new("xinu"),
            executable_path: Path::new("xinu.elf"),
            status_only: true,
            powercycle: false,
            upload: false,
        };

        let outcome = run(&opts, &NoBroadcasts, &NoopScript).unwrap();
        assert!(matches!(outcome, Outcome::Status(_)));
    }

    #[test]
    fn no_backends_discovered_yields_none_available_diagnostic() {
        let opts = Options {
            class: "quark".into(),
            user: "test".into(),
            backend_name: None,
            image_path: Path::new("xinu"),
            executable_path: Path::new("xinu.elf"),
            status_only: false,
            powercycle: false,
            upload: false,
        };

        let outcome = run(&opts, &NoBroadcasts, &NoopScript).unwrap();
        match outcome {
            Outcome::Diagnostic(msg) => assert_eq!(msg, "no free backend available"),
            _ => panic!("expected a diagnostic outcome"),
        }
    }

    #[test]
    fn resolve_class_prefers_explicit_over_env() {
        assert_eq!(resolve_class(Some("galileo".into()), |_| Some("quark".into())), "galileo");
    }

    #[test]
    fn resolve_class_falls_back_to_env_then_default() {
        assert_eq!(resolve_class(None, |_| Some("galileo".into())), "galileo");
        assert_eq!(resolve_class(None, |_| None), "quark");
    }
}
