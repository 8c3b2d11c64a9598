//! UDP socket facade with per-call deadlines.
//!
//! The session never touches a socket directly; it drives a [`Transport`],
//! which blocks only as long as the timeout each call carries. Non-blocking
//! behavior emerges from those deadlines, not from an event loop.

use std::io;
use std::net::{SocketAddr, SocketAddrV4, UdpSocket};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// A bound datagram endpoint the session sends and receives through.
///
/// Implementations must not buffer across calls. All calls happen on the
/// session thread; `close` may additionally be called during disposal and
/// must be idempotent.
pub trait Transport {
    /// Attempt a datagram send within `timeout`, returning bytes written.
    /// A correctly sent datagram returns `buf.len()`.
    fn send_to(&self, buf: &[u8], timeout: Duration, remote: SocketAddrV4) -> io::Result<usize>;

    /// Wait up to `timeout` for a datagram. `Ok(None)` means the deadline
    /// passed with nothing received; it is distinguishable from a real
    /// zero-length datagram.
    fn recv_from(
        &self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> io::Result<Option<(usize, SocketAddrV4)>>;

    /// Local address of the bound socket.
    fn local_addr(&self) -> io::Result<SocketAddrV4>;

    /// Release the socket. Idempotent; later calls on the transport fail
    /// with `NotConnected`.
    fn close(&self);
}

/// Production transport over a blocking `std::net::UdpSocket`.
pub struct UdpTransport {
    socket: Mutex<Option<UdpSocket>>,
}

impl UdpTransport {
    /// Bind to `local`. Port 0 requests an ephemeral port.
    pub fn bind(local: SocketAddrV4) -> io::Result<Self> {
        let socket = UdpSocket::bind(local)?;
        Ok(Self {
            socket: Mutex::new(Some(socket)),
        })
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "transport closed")
}

fn is_timeout(e: &io::Error) -> bool {
    // WouldBlock on Unix, TimedOut on Windows.
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

impl Transport for UdpTransport {
    fn send_to(&self, buf: &[u8], timeout: Duration, remote: SocketAddrV4) -> io::Result<usize> {
        let guard = self.socket.lock();
        let socket = guard.as_ref().ok_or_else(closed)?;
        socket.set_write_timeout(Some(timeout))?;
        match socket.send_to(buf, SocketAddr::V4(remote)) {
            Ok(n) => Ok(n),
            Err(ref e) if is_timeout(e) => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn recv_from(
        &self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> io::Result<Option<(usize, SocketAddrV4)>> {
        let guard = self.socket.lock();
        let socket = guard.as_ref().ok_or_else(closed)?;

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            socket.set_read_timeout(Some(remaining))?;
            match socket.recv_from(buf) {
                // The wire protocol is IPv4-only; datagrams from IPv6
                // senders are foreign traffic.
                Ok((n, SocketAddr::V4(from))) => return Ok(Some((n, from))),
                Ok((_, SocketAddr::V6(_))) => continue,
                Err(ref e) if is_timeout(e) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddrV4> {
        let guard = self.socket.lock();
        let socket = guard.as_ref().ok_or_else(closed)?;
        match socket.local_addr()? {
            SocketAddr::V4(addr) => Ok(addr),
            SocketAddr::V6(addr) => Err(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("bound to non-IPv4 address {addr}"),
            )),
        }
    }

    fn close(&self) {
        self.socket.lock().take();
    }
}
