use std::{
    io,
    net::{Shutdown, SocketAddr, TcpListener},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use crate::{error::DiscoveryError, net::registry::EndpointRegistry};

const BIND_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Operator switch for discovery. Clones share the same flag.
#[derive(Clone, Debug, Default)]
pub struct DiscoveryToggle {
    enabled: Arc<AtomicBool>,
}

impl DiscoveryToggle {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(enabled)),
        }
    }

    pub fn set(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// No pending connection.
    Idle,
    Registered { slot: usize, peer: SocketAddr },
    /// Registry already full; the connection was closed unrecorded.
    Ignored { peer: SocketAddr },
}

/// Non-blocking TCP listener that turns each inbound connection into an
/// endpoint registration. No payload is read.
pub struct DiscoveryListener {
    listener: TcpListener,
}

impl DiscoveryListener {
    pub fn bind(port: u16) -> Result<Self, DiscoveryError> {
        let bind_error = |source| DiscoveryError::Bind { port, source };
        let listener = TcpListener::bind(("0.0.0.0", port)).map_err(bind_error)?;
        listener.set_nonblocking(true).map_err(bind_error)?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// One accept attempt; never blocks.
    pub fn poll(&self, registry: &EndpointRegistry) -> Result<DiscoveryEvent, DiscoveryError> {
        let (stream, peer) = match self.listener.accept() {
            Ok(accepted) => accepted,
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                return Ok(DiscoveryEvent::Idle);
            }
            Err(err) => return Err(DiscoveryError::Accept(err)),
        };

        // Only the address matters; the peer gets an immediate close.
        let _ = stream.shutdown(Shutdown::Both);
        drop(stream);

        match registry.claim_free(peer.ip().to_string(), peer.port().to_string()) {
            Some(slot) => {
                log::info!("discovery registered {peer} in endpoint slot {slot}");
                Ok(DiscoveryEvent::Registered { slot, peer })
            }
            None => {
                log::debug!("discovery ignored {peer}: all endpoint slots occupied");
                Ok(DiscoveryEvent::Ignored { peer })
            }
        }
    }
}

/// Worker-side owner of the listener: opens it while the toggle is on, closes
/// it as soon as the toggle goes off or the port changes.
#[derive(Default)]
pub struct DiscoveryDriver {
    listener: Option<(u16, DiscoveryListener)>,
    retry_bind_at: Option<Instant>,
}

impl DiscoveryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener
            .as_ref()
            .and_then(|(_, listener)| listener.local_addr().ok())
    }

    pub fn tick(
        &mut self,
        enabled: bool,
        port: u16,
        registry: &EndpointRegistry,
    ) -> DiscoveryEvent {
        if !self.sync(enabled, port) {
            return DiscoveryEvent::Idle;
        }
        let Some((_, listener)) = self.listener.as_ref() else {
            return DiscoveryEvent::Idle;
        };
        match listener.poll(registry) {
            Ok(event) => event,
            Err(err) => {
                log::warn!("discovery: {err}");
                DiscoveryEvent::Idle
            }
        }
    }

    /// Returns whether a listener is open after reconciling with the toggle.
    fn sync(&mut self, enabled: bool, port: u16) -> bool {
        if !enabled {
            if self.listener.take().is_some() {
                log::info!("discovery listener closed");
            }
            self.retry_bind_at = None;
            return false;
        }

        if let Some((bound_port, _)) = &self.listener {
            if *bound_port == port {
                return true;
            }
            log::info!("discovery port changed from {bound_port} to {port}, rebinding");
            self.listener = None;
        }

        if self.retry_bind_at.is_some_and(|at| Instant::now() < at) {
            return false;
        }

        match DiscoveryListener::bind(port) {
            Ok(listener) => {
                log::info!(
                    "discovery listening on {}",
                    listener
                        .local_addr()
                        .map(|addr| addr.to_string())
                        .unwrap_or_else(|_| format!("port {port}"))
                );
                self.listener = Some((port, listener));
                self.retry_bind_at = None;
                true
            }
            Err(err) => {
                log::error!("{err}");
                self.retry_bind_at = Some(Instant::now() + BIND_RETRY_INTERVAL);
                false
            }
        }
    }
}
