//! The punching state machine.
//!
//! A [`PunchSession`] owns one bound transport, one role, and one token. It
//! registers with the rendezvous server, then consumes inbound datagrams
//! until a punch succeeds, the server reports a fatal error, the attempt
//! budget runs out, or the caller cancels.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::config::SessionConfig;
use crate::error::PunchError;
use crate::packet::{ErrorCode, Message, DATAGRAM_LEN, KIND_PUNCH_SUCCESS};
use crate::role::PeerRole;
use crate::token::Token;
use crate::transport::Transport;

/// Send deadline for every outbound datagram. Sends are expected to return
/// promptly; the deadline only bounds a wedged socket.
const SEND_TIMEOUT: Duration = Duration::from_millis(5000);

/// Poll granularity of the connector's listen phase. The phase re-checks
/// its own deadline and the cancellation flag between polls.
const LISTEN_POLL_TIMEOUT: Duration = Duration::from_millis(1000);

/// Real-time operational counters for punch sessions.
///
/// All fields are behind mutexes so a monitoring thread can read them while
/// the session thread runs.
#[derive(Clone, Debug)]
pub struct SessionMetrics {
    /// Datagrams received, any size and sender
    pub datagrams_received_total: Arc<Mutex<u64>>,
    /// Datagrams silently discarded (size, sender, kind, or token mismatch)
    pub datagrams_discarded_total: Arc<Mutex<u64>>,
    /// Punch datagrams sent across all bursts
    pub punches_sent_total: Arc<Mutex<u64>>,
    /// Completed prediction-window bursts
    pub bursts_total: Arc<Mutex<u64>>,
    /// Extra punches sent to observed out-of-window ports
    pub retargets_total: Arc<Mutex<u64>>,
    /// Punches reflected back as PunchSuccess by a listener
    pub punches_reflected_total: Arc<Mutex<u64>>,
}

impl SessionMetrics {
    /// Create a new metrics container with all counters at zero.
    pub fn new() -> Self {
        Self {
            datagrams_received_total: Arc::new(Mutex::new(0)),
            datagrams_discarded_total: Arc::new(Mutex::new(0)),
            punches_sent_total: Arc::new(Mutex::new(0)),
            bursts_total: Arc::new(Mutex::new(0)),
            retargets_total: Arc::new(Mutex::new(0)),
            punches_reflected_total: Arc::new(Mutex::new(0)),
        }
    }

    /// Export counters in Prometheus text exposition format.
    pub fn export_metrics(&self) -> String {
        format!(
            "puncture_datagrams_received_total {{}} {}\n\
             puncture_datagrams_discarded_total {{}} {}\n\
             puncture_punches_sent_total {{}} {}\n\
             puncture_bursts_total {{}} {}\n\
             puncture_retargets_total {{}} {}\n\
             puncture_punches_reflected_total {{}} {}\n",
            self.datagrams_received_total.lock(),
            self.datagrams_discarded_total.lock(),
            self.punches_sent_total.lock(),
            self.bursts_total.lock(),
            self.retargets_total.lock(),
            self.punches_reflected_total.lock(),
        )
    }
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A single rendezvous session.
///
/// Owns its transport, token, and scratch buffers exclusively; nothing is
/// shared between sessions except the cancellation flag and metrics handed
/// in at construction.
pub struct PunchSession<T: Transport> {
    transport: T,
    server: SocketAddrV4,
    role: PeerRole,
    config: SessionConfig,
    // Connector: generated at registration. Listener: learned from the
    // server's ConnectTo.
    token: Option<Token>,
    target: Option<Ipv4Addr>,
    running: Arc<AtomicBool>,
    metrics: SessionMetrics,
    send_buf: [u8; DATAGRAM_LEN],
    recv_buf: [u8; DATAGRAM_LEN],
}

impl<T: Transport> PunchSession<T> {
    /// Create a connector session toward `target`, correlated by `token`.
    pub fn connector(
        transport: T,
        server: SocketAddrV4,
        target: Ipv4Addr,
        token: Token,
        config: SessionConfig,
        running: Arc<AtomicBool>,
        metrics: SessionMetrics,
    ) -> Self {
        Self {
            transport,
            server,
            role: PeerRole::Connector,
            config,
            token: Some(token),
            target: Some(target),
            running,
            metrics,
            send_buf: [0u8; DATAGRAM_LEN],
            recv_buf: [0u8; DATAGRAM_LEN],
        }
    }

    /// Create a listener session. `role` must be one of the listener
    /// variants; a connector role is treated as plain Listener.
    pub fn listener(
        transport: T,
        server: SocketAddrV4,
        role: PeerRole,
        config: SessionConfig,
        running: Arc<AtomicBool>,
        metrics: SessionMetrics,
    ) -> Self {
        let role = if role.is_listener() {
            role
        } else {
            PeerRole::Listener
        };
        Self {
            transport,
            server,
            role,
            config,
            token: None,
            target: None,
            running,
            metrics,
            send_buf: [0u8; DATAGRAM_LEN],
            recv_buf: [0u8; DATAGRAM_LEN],
        }
    }

    /// Counters shared with this session.
    pub fn metrics(&self) -> &SessionMetrics {
        &self.metrics
    }

    /// Local address of the bound transport.
    pub fn local_addr(&self) -> std::io::Result<SocketAddrV4> {
        self.transport.local_addr()
    }

    /// Register with the server, then drive the state machine to its end.
    ///
    /// Returns the established peer endpoint, or `None` on server-reported
    /// failure, attempt exhaustion, or cancellation. The transport is
    /// closed before returning.
    pub fn run(&mut self) -> Result<Option<SocketAddrV4>, PunchError> {
        self.register();
        let result = self.outer_loop();
        self.transport.close();
        result
    }

    // The send result is advisory: a lost Register surfaces as receive
    // timeouts, and retries are the operator's concern.
    fn register(&mut self) {
        let msg = match (self.role, self.target, self.token) {
            (PeerRole::Connector, Some(target), Some(token)) => {
                Message::RegisterConnector { target, token }
            }
            _ => Message::RegisterListener,
        };
        msg.encode(&mut self.send_buf);

        match self
            .transport
            .send_to(&self.send_buf, SEND_TIMEOUT, self.server)
        {
            Ok(n) if n == DATAGRAM_LEN => {
                debug!(server = %self.server, role = ?self.role, "registered")
            }
            Ok(n) => warn!(sent = n, "short register send"),
            Err(e) => warn!(error = %e, "register send failed"),
        }
    }

    fn outer_loop(&mut self) -> Result<Option<SocketAddrV4>, PunchError> {
        // Iterations spent waiting for the server, connector only. Counts
        // timeouts and consumed 64-byte datagrams; runt datagrams are free.
        let mut attempts: u32 = 0;

        while self.running.load(Ordering::Relaxed) {
            if self.role == PeerRole::Connector
                && attempts >= self.config.max_server_response_attempts
            {
                debug!("server response budget exhausted");
                return Ok(None);
            }

            let (len, from) = match self
                .transport
                .recv_from(&mut self.recv_buf, self.config.max_response_wait)?
            {
                Some(pair) => pair,
                None => {
                    if self.role == PeerRole::Connector {
                        attempts += 1;
                    }
                    continue;
                }
            };
            *self.metrics.datagrams_received_total.lock() += 1;

            if len != DATAGRAM_LEN {
                *self.metrics.datagrams_discarded_total.lock() += 1;
                continue;
            }
            if self.role == PeerRole::Connector {
                attempts += 1;
            }

            match Message::decode(&self.recv_buf) {
                Ok(Message::ConnectTo { peer, port, token }) if from == self.server => {
                    if let Some(endpoint) = self.handle_connect_to(peer, port, token)? {
                        return Ok(Some(endpoint));
                    }
                }
                Ok(Message::Error { code })
                    if from == self.server && self.role == PeerRole::Connector =>
                {
                    match code {
                        ErrorCode::ClientNotFound => {
                            debug!("server reported peer not registered");
                            return Ok(None);
                        }
                        // Unknown codes are ignored for forward
                        // compatibility.
                        ErrorCode::Unknown(raw) => trace!(code = raw, "ignoring server error"),
                    }
                }
                Ok(Message::Punch { .. }) if self.role.is_listener() => {
                    // Echo in place: the reply differs from the punch only
                    // in its kind byte.
                    self.recv_buf[0] = KIND_PUNCH_SUCCESS;
                    match self.transport.send_to(&self.recv_buf, SEND_TIMEOUT, from) {
                        Ok(n) if n == DATAGRAM_LEN => {
                            *self.metrics.punches_reflected_total.lock() += 1;
                            debug!(connector = %from, "reflected punch");
                        }
                        Ok(n) => trace!(sent = n, "short punch reflection"),
                        Err(e) => trace!(error = %e, "punch reflection failed"),
                    }
                    if self.role == PeerRole::ListenerSingle {
                        return Ok(Some(from));
                    }
                }
                _ => {
                    *self.metrics.datagrams_discarded_total.lock() += 1;
                }
            }
        }

        debug!("session cancelled");
        Ok(None)
    }

    // Punching sub-procedure, both roles. Returns the established endpoint,
    // or None once the attempt budget is spent and the outer loop resumes.
    fn handle_connect_to(
        &mut self,
        peer: Ipv4Addr,
        anchor: u16,
        token: Token,
    ) -> Result<Option<SocketAddrV4>, PunchError> {
        if self.role == PeerRole::Connector {
            // A forwarded token that differs from our own is a crossed or
            // stale server reply, not our introduction.
            if self.token != Some(token) {
                debug!("connect-to token mismatch, discarding");
                *self.metrics.datagrams_discarded_total.lock() += 1;
                return Ok(None);
            }
        } else {
            // Listeners have no prior token; adopt whatever the server
            // forwarded.
            self.token = Some(token);
        }

        debug!(peer = %peer, anchor, "starting punch attempts");
        Message::Punch { token }.encode(&mut self.send_buf);

        for attempt in 0..self.config.max_punch_attempts {
            if !self.running.load(Ordering::Relaxed) {
                return Ok(None);
            }

            self.send_burst(peer, anchor);

            // The listener skips the listen phase; its outer loop detects
            // the connector's reply punch and reflects it.
            if self.role == PeerRole::Connector {
                if let Some(endpoint) = self.listen_for_reply(peer, anchor, token)? {
                    return Ok(Some(endpoint));
                }
            }

            if attempt + 1 < self.config.max_punch_attempts && !self.config.retry_delay.is_zero() {
                thread::sleep(self.config.retry_delay);
            }
        }

        debug!(peer = %peer, "punch attempts exhausted");
        Ok(None)
    }

    // Ascending sweep over the prediction window. Per-port send errors are
    // not fatal and do not abort the burst.
    fn send_burst(&mut self, peer: Ipv4Addr, anchor: u16) {
        for i in 0..self.config.port_predictions {
            self.send_punch(SocketAddrV4::new(peer, anchor.wrapping_add(i)));
        }
        *self.metrics.bursts_total.lock() += 1;
    }

    fn send_punch(&self, dest: SocketAddrV4) {
        match self.transport.send_to(&self.send_buf, SEND_TIMEOUT, dest) {
            Ok(n) if n == DATAGRAM_LEN => {
                *self.metrics.punches_sent_total.lock() += 1;
                trace!(%dest, "punch sent");
            }
            Ok(n) => trace!(%dest, sent = n, "short punch send"),
            Err(e) => trace!(%dest, error = %e, "punch send failed"),
        }
    }

    fn listen_for_reply(
        &mut self,
        peer: Ipv4Addr,
        anchor: u16,
        token: Token,
    ) -> Result<Option<SocketAddrV4>, PunchError> {
        let deadline = Instant::now() + self.config.max_response_wait;
        // At most one adaptive extra per observed out-of-window port.
        let mut retargeted: Option<u16> = None;

        while self.running.load(Ordering::Relaxed) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            let (len, from) = match self
                .transport
                .recv_from(&mut self.recv_buf, remaining.min(LISTEN_POLL_TIMEOUT))?
            {
                Some(pair) => pair,
                None => continue,
            };
            *self.metrics.datagrams_received_total.lock() += 1;

            if len != DATAGRAM_LEN || *from.ip() != peer {
                *self.metrics.datagrams_discarded_total.lock() += 1;
                continue;
            }

            match Message::decode(&self.recv_buf) {
                Ok(Message::Punch { token: got }) if got == token => {
                    let observed = from.port();
                    let outside =
                        !window_contains(anchor, self.config.port_predictions, observed);
                    if outside && retargeted != Some(observed) {
                        // Symmetric NAT: the peer's mapping landed outside
                        // the predicted window, so punch the port it
                        // actually used.
                        debug!(observed, "re-targeting outside prediction window");
                        self.send_punch(from);
                        *self.metrics.retargets_total.lock() += 1;
                        retargeted = Some(observed);
                    }
                }
                Ok(Message::PunchSuccess { token: got }) if got == token => {
                    debug!(endpoint = %from, "punch acknowledged");
                    return Ok(Some(from));
                }
                _ => {
                    *self.metrics.datagrams_discarded_total.lock() += 1;
                }
            }
        }

        Ok(None)
    }
}

// Window membership for {anchor .. anchor+window-1}, wrapping at u16::MAX.
fn window_contains(anchor: u16, window: u16, port: u16) -> bool {
    port.wrapping_sub(anchor) < window
}
