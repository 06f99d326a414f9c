//! Open-port discovery for the convenience constructors

use std::net::{Ipv4Addr, SocketAddr, TcpListener, UdpSocket};

/// Number of consecutive ports probed
pub const PORT_SCAN_RANGE: u16 = 100;

/// First port in `start..start + 100` where both TCP and UDP can bind
///
/// The ports are released again before returning, so another process may
/// still take the port before the caller binds it.
pub fn find_open_port(start: u16) -> Option<u16> {
    let end = start.saturating_add(PORT_SCAN_RANGE);
    (start..end).filter(|port| *port != 0).find(|port| is_port_free(*port))
}

fn is_port_free(port: u16) -> bool {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    TcpListener::bind(addr).is_ok() && UdpSocket::bind(addr).is_ok()
}
