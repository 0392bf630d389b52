//! Listener creation for the proxy server.

use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use tokio::net::TcpListener;

/// Create a TCP listener bound to `addr`.
///
/// SO_REUSEADDR lets a restart rebind a port still in TIME_WAIT. SO_REUSEPORT
/// is left off so a second bind to a port that is already listening fails.
pub fn create_listener(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    // On Windows SO_REUSEADDR permits stealing a live port.
    #[cfg(unix)]
    socket.set_reuse_address(true)?;

    socket.set_nonblocking(true)?;

    socket.bind(&addr.into())?;
    socket.listen(1024)?; // Backlog size

    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener)
}
