//! Listener probe.
//!
//! Binding and immediately dropping a socket answers "is this port taken"
//! without parsing `ss` output. The answer is stale the moment it is returned;
//! callers only use it to warn.

use std::io;
use std::net::{IpAddr, SocketAddr, TcpListener, UdpSocket};

use crate::config::Protocol;
use crate::host::PortProbe;

#[derive(Debug, Default, Clone)]
pub struct BindProbe;

impl PortProbe for BindProbe {
    fn is_bound(&self, protocol: Protocol, address: IpAddr, port: u16) -> bool {
        let addr = SocketAddr::new(address, port);
        let result = match protocol {
            Protocol::Udp => UdpSocket::bind(addr).map(drop),
            Protocol::Tcp => TcpListener::bind(addr).map(drop),
        };
        matches!(result, Err(e) if e.kind() == io::ErrorKind::AddrInUse)
    }
}
