//! Public client operations.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::SessionConfig;
use crate::error::PunchError;
use crate::role::PeerRole;
use crate::session::{PunchSession, SessionMetrics};
use crate::token::Token;
use crate::transport::UdpTransport;

/// Rendezvous client: one server endpoint, one set of tunables.
///
/// Each operation binds its own transport and runs a complete session on
/// the calling thread. Share the client behind an [`Arc`] to call
/// [`dispose`](Self::dispose) from another thread; cancellation takes
/// effect at the next outer-loop iteration and a disposed client stays
/// disposed.
///
/// # Example
/// ```no_run
/// use std::net::{Ipv4Addr, SocketAddrV4};
/// use puncture::client::PunchClient;
///
/// let server = SocketAddrV4::new(Ipv4Addr::new(198, 51, 100, 7), 3478);
/// let client = PunchClient::new(server);
/// if let Some(peer) = client.punch(Ipv4Addr::new(203, 0, 113, 5))? {
///     println!("direct path established to {peer}");
/// }
/// # Ok::<(), puncture::error::PunchError>(())
/// ```
pub struct PunchClient {
    server: SocketAddrV4,
    config: SessionConfig,
    running: Arc<AtomicBool>,
    metrics: SessionMetrics,
}

impl PunchClient {
    /// Create a client with default tunables.
    pub fn new(server: SocketAddrV4) -> Self {
        Self::with_config(server, SessionConfig::default())
    }

    /// Create a client with explicit tunables, snapshotted per session.
    pub fn with_config(server: SocketAddrV4, config: SessionConfig) -> Self {
        Self {
            server,
            config,
            running: Arc::new(AtomicBool::new(true)),
            metrics: SessionMetrics::new(),
        }
    }

    /// Run as Connector toward `peer` from an ephemeral local port.
    ///
    /// Generates a fresh session token, registers, and punches. Returns the
    /// established peer endpoint, or `None` when the server reports the
    /// peer as unregistered or the attempt budget runs out.
    pub fn punch(&self, peer: Ipv4Addr) -> Result<Option<SocketAddrV4>, PunchError> {
        let transport = UdpTransport::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))?;
        let mut session = PunchSession::connector(
            transport,
            self.server,
            peer,
            Token::generate(),
            self.config.clone(),
            self.running.clone(),
            self.metrics.clone(),
        );
        session.run()
    }

    /// Run as Listener on `local` until cancelled or the transport fails.
    pub fn listen_for_punches(&self, local: SocketAddrV4) -> Result<(), PunchError> {
        self.run_listener(local, PeerRole::Listener).map(|_| ())
    }

    /// Run as ListenerSingle on `local`; returns the first connector's
    /// endpoint, or `None` on cancellation.
    pub fn listen_for_single_punch(
        &self,
        local: SocketAddrV4,
    ) -> Result<Option<SocketAddrV4>, PunchError> {
        self.run_listener(local, PeerRole::ListenerSingle)
    }

    fn run_listener(
        &self,
        local: SocketAddrV4,
        role: PeerRole,
    ) -> Result<Option<SocketAddrV4>, PunchError> {
        let transport = UdpTransport::bind(local)?;
        let mut session = PunchSession::listener(
            transport,
            self.server,
            role,
            self.config.clone(),
            self.running.clone(),
            self.metrics.clone(),
        );
        session.run()
    }

    /// Cancel any running session. Idempotent; callable from any thread.
    /// An in-flight receive unblocks at its per-call deadline.
    pub fn dispose(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// True until [`dispose`](Self::dispose) is called.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Counters accumulated across this client's sessions.
    pub fn metrics(&self) -> &SessionMetrics {
        &self.metrics
    }
}
