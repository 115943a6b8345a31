//! IPv4 broadcast address enumeration via `/proc/net/dev` and
//! `SIOCGIFBRDADDR`, mirroring the original client's interface helper.

use std::ffi::CString;
use std::fs;
use std::io;
use std::mem;
use std::net::{Ipv4Addr, UdpSocket};
use std::os::unix::io::AsRawFd;

use xkdb_proto::orchestrate::BroadcastSource;

const SIOCGIFBRDADDR: libc::c_ulong = 0x8919;

#[repr(C)]
struct IfReq {
    ifr_name: [libc::c_char; libc::IF_NAMESIZE],
    ifr_addr: libc::sockaddr,
}

pub struct ProcNetDevBroadcastSource;

impl BroadcastSource for ProcNetDevBroadcastSource {
    fn broadcast_addresses(&self) -> io::Result<Vec<Ipv4Addr>> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        let mut addrs = Vec::new();

        for name in interface_names()? {
            match broadcast_address(&socket, &name) {
                Ok(Some(addr)) if !addr.is_unspecified() => addrs.push(addr),
                Ok(_) => {}
                Err(err) => log::debug!("broadcast lookup failed for {name}: {err}"),
            }
        }

        Ok(addrs)
    }
}

fn interface_names() -> io::Result<Vec<String>> {
    let contents = fs::read_to_string("/proc/net/dev")?;
    Ok(contents
        .lines()
        .skip(2)
        .filter_map(|line| line.split(':').next())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect())
}

fn broadcast_address(socket: &UdpSocket, name: &str) -> io::Result<Option<Ipv4Addr>> {
    let cname = CString::new(name)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "interface name contains a NUL"))?;
    let bytes = cname.as_bytes_with_nul();
    if bytes.len() > libc::IF_NAMESIZE {
        return Ok(None);
    }

    let mut req: IfReq = unsafe { mem::zeroed() };
    for (dst, &src) in req.ifr_name.iter_mut().zip(bytes.iter()) {
        *dst = src as libc::c_char;
    }

    // SAFETY: `req` is a valid, zero-initialized ifreq; SIOCGIFBRDADDR
    // fills in ifr_addr (aliased here as a plain sockaddr) on success.
    let ret = unsafe { libc::ioctl(socket.as_raw_fd(), SIOCGIFBRDADDR, &mut req) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: the kernel wrote a sockaddr_in into ifr_addr; both structs
    // start with the same two-byte family field and are the same size.
    let sockaddr_in: libc::sockaddr_in = unsafe { mem::transmute_copy(&req.ifr_addr) };
    Ok(Some(Ipv4Addr::from(sockaddr_in.sin_addr.s_addr.to_ne_bytes())))
}
