use std::io;
use std::net::{Ipv4Addr, TcpListener, TcpStream};

use tracing::trace;

/// Reserve an ephemeral port on the loopback interface.
///
/// The port is bound, connected to and closed again, which leaves it in `TIME_WAIT`. While it
/// lingers there the kernel does not hand it out to other `bind(0)` calls, but a server that
/// sets `SO_REUSEADDR` can still bind it explicitly.
pub fn reserve_port() -> io::Result<u16> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    let addr = listener.local_addr()?;

    let client = TcpStream::connect(addr)?;
    let (accepted, _) = listener.accept()?;

    // The server side closes first, so the reserved address is the one left in `TIME_WAIT`.
    drop(accepted);
    drop(client);
    drop(listener);

    trace!("Reserved port {}", addr.port());
    Ok(addr.port())
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, TcpListener};

    use super::reserve_port;

    #[test]
    fn reserved_ports_are_nonzero() {
        assert_ne!(reserve_port().unwrap(), 0);
    }

    /// The standard library sets `SO_REUSEADDR` on Unix listeners, like index servers do.
    #[cfg(unix)]
    #[test]
    fn reserved_port_can_be_bound() {
        let port = reserve_port().unwrap();
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port)).unwrap();
        assert_eq!(listener.local_addr().unwrap().port(), port);
    }
}
