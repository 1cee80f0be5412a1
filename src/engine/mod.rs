//! Userspace WireGuard engine
//!
//! This module wires boringtun, a TUN device and a UDP socket into a working
//! WireGuard device. Three tasks move packets:
//!
//! - outbound: TUN -> route by allowed IPs -> encrypt -> UDP
//! - inbound: UDP -> decrypt -> source check -> TUN
//! - timers: handshakes, keepalives and rekeys
//!
//! Each peer owns its own boringtun `Tunn`, as `Tunn` represents a single
//! pairwise tunnel. Configuration arrives through [`Engine::apply`], usually
//! from the UAPI socket via [`Engine::handle_ipc`].

mod peer;
mod routing;

pub use routing::{destination, AllowedIps};

use crate::control::{handle_connection, UapiHandler};
use crate::error::{Result, WgEmbedError};
use crate::wireguard::{Device, DeviceConfig, PeerConfig, PrivateKey, PublicKey};
use async_trait::async_trait;
use boringtun::noise::errors::WireGuardError;
use boringtun::noise::TunnResult;
use peer::EnginePeer;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{UdpSocket as TokioUdpSocket, UnixStream};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

/// Maximum packet size for WireGuard
const MAX_PACKET_SIZE: usize = 65535;

/// Timer tick interval for WireGuard operations
const TIMER_TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Back-off while the TUN device has nothing to read
const TUN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long `close` waits for the packet tasks
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Packet source and sink for the engine
///
/// Reads must not block: an empty device reports `WouldBlock`.
pub trait TunDevice: Read + Write + Send {}

impl<T: Read + Write + Send> TunDevice for T {}

/// Verbosity of an [`EngineLogger`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Log nothing
    Silent,
    /// Log failures only
    Error,
    /// Log failures and per-packet detail
    Verbose,
}

/// Logger handed to an engine, prefixing every line
#[derive(Debug, Clone)]
pub struct EngineLogger {
    level: LogLevel,
    prefix: String,
}

impl EngineLogger {
    /// Create a logger
    pub fn new(level: LogLevel, prefix: impl Into<String>) -> Self {
        Self {
            level,
            prefix: prefix.into(),
        }
    }

    /// Configured level
    pub fn level(&self) -> LogLevel {
        self.level
    }

    /// Log detail at debug level when verbose
    pub fn verbose(&self, args: fmt::Arguments<'_>) {
        if self.level >= LogLevel::Verbose {
            debug!("{}{}", self.prefix, args);
        }
    }

    /// Log a failure unless silent
    pub fn error(&self, args: fmt::Arguments<'_>) {
        if self.level >= LogLevel::Error {
            error!("{}{}", self.prefix, args);
        }
    }
}

struct EngineState {
    private_key: Option<PrivateKey>,
    peers: HashMap<PublicKey, EnginePeer>,
    routes: AllowedIps<PublicKey>,
    next_index: u32,
}

/// What decrypting one datagram produced
enum Inbound {
    Nothing,
    Reply(Vec<u8>),
    Packet(Vec<u8>, IpAddr),
}

/// Userspace WireGuard device
pub struct Engine {
    name: String,
    logger: EngineLogger,
    tun: Mutex<Box<dyn TunDevice>>,
    socket: RwLock<Arc<TokioUdpSocket>>,
    socket_changed: watch::Sender<()>,
    state: RwLock<EngineState>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Engine {
    /// Create an engine over `tun` and start its packet tasks
    ///
    /// The UDP socket starts on a random port until a listen port is
    /// configured.
    pub async fn new(
        name: impl Into<String>,
        tun: Box<dyn TunDevice>,
        logger: EngineLogger,
    ) -> Result<Arc<Self>> {
        let name = name.into();
        let socket = bind_udp(0)?;
        let port = socket.local_addr().map(|a| a.port()).unwrap_or_default();
        info!("Creating WireGuard engine for {} (UDP port {})", name, port);

        let engine = Arc::new(Self {
            name,
            logger,
            tun: Mutex::new(tun),
            socket: RwLock::new(socket),
            socket_changed: watch::channel(()).0,
            state: RwLock::new(EngineState {
                private_key: None,
                peers: HashMap::new(),
                routes: AllowedIps::new(),
                next_index: 0,
            }),
            shutdown: watch::channel(false).0,
            tasks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });

        let handles = vec![
            tokio::spawn(engine.clone().outbound_task()),
            tokio::spawn(engine.clone().inbound_task()),
            tokio::spawn(engine.clone().timer_task()),
        ];
        engine.tasks.lock().await.extend(handles);

        Ok(engine)
    }

    /// Device name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bound UDP port
    pub async fn port(&self) -> Result<u16> {
        self.socket
            .read()
            .await
            .local_addr()
            .map(|a| a.port())
            .map_err(|e| WgEmbedError::Resource(format!("Failed to get UDP socket address: {}", e)))
    }

    /// Serve UAPI requests on an accepted connection
    pub async fn handle_ipc(self: Arc<Self>, stream: UnixStream) -> io::Result<()> {
        handle_connection(stream, self).await
    }

    /// Apply a declarative update
    ///
    /// Socket rebinding happens first, so a port that cannot be bound leaves
    /// the device unchanged.
    pub async fn apply(&self, config: DeviceConfig) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(WgEmbedError::Resource("engine is closed".to_string()));
        }

        let mut guard = self.state.write().await;
        let state = &mut *guard;

        if let Some(port) = config.listen_port {
            if port == 0 || port != self.port().await? {
                let socket = bind_udp(port)?;
                *self.socket.write().await = socket;
                self.socket_changed.send_replace(());
                self.logger.verbose(format_args!("listening on UDP port {}", port));
            }
        }

        // Sessions survive a set that repeats the current key
        let key_changed = match config.private_key {
            Some(key) => {
                let key = (key.as_bytes() != &[0u8; 32]).then_some(key);
                let changed = key != state.private_key;
                state.private_key = key;
                changed
            }
            None => false,
        };

        if config.replace_peers {
            self.logger.verbose(format_args!("replacing all peers"));
            state.peers.clear();
            state.routes.clear();
        }

        for peer in config.peers {
            apply_peer(state, peer, &self.logger)?;
        }

        if key_changed {
            for peer in state.peers.values_mut() {
                peer.rebuild(state.private_key.as_ref())?;
            }
        }

        Ok(())
    }

    /// Snapshot of the current device state
    pub async fn device(&self) -> Result<Device> {
        let port = self.port().await?;
        let state = self.state.read().await;

        let mut device = Device::new(&self.name);
        device.private_key = state.private_key.clone();
        device.public_key = state.private_key.as_ref().map(PrivateKey::public_key);
        device.listen_port = port;

        let mut peers: Vec<&EnginePeer> = state.peers.values().collect();
        peers.sort_by_key(|p| p.index);
        device.peers = peers
            .into_iter()
            .map(|p| p.snapshot(state.routes.nets_for(&p.public_key)))
            .collect();

        Ok(device)
    }

    /// Stop the packet tasks and drop all peers
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(WgEmbedError::Resource("engine already closed".to_string()));
        }

        info!("Stopping WireGuard engine {}", self.name);
        let _ = self.shutdown.send(true);

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        let joined = time::timeout(SHUTDOWN_TIMEOUT, async {
            for handle in tasks {
                let _ = handle.await;
            }
        })
        .await;
        if joined.is_err() {
            warn!("Timeout waiting for engine tasks of {} to stop", self.name);
        }

        let mut state = self.state.write().await;
        state.peers.clear();
        state.routes.clear();

        info!("WireGuard engine {} stopped", self.name);
        Ok(())
    }

    async fn send_to(&self, data: &[u8], endpoint: SocketAddr) {
        let socket = self.socket.read().await.clone();
        if let Err(e) = socket.send_to(data, endpoint).await {
            self.logger
                .error(format_args!("UDP send error to {}: {}", endpoint, e));
        }
    }

    /// Outbound packet processing: TUN -> encrypt -> UDP
    async fn outbound_task(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut packet = vec![0u8; MAX_PACKET_SIZE];
        let mut out = vec![0u8; MAX_PACKET_SIZE];

        loop {
            if *shutdown.borrow() {
                break;
            }

            let read = self.tun.lock().await.read(&mut packet);
            let n = match read {
                Ok(n) => n,
                Err(e) => {
                    if e.kind() != io::ErrorKind::WouldBlock {
                        self.logger.error(format_args!("TUN read error: {}", e));
                    }
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = time::sleep(TUN_POLL_INTERVAL) => continue,
                    }
                }
            };

            if n > 0 {
                self.route_outbound(&packet[..n], &mut out).await;
            }
        }
    }

    async fn route_outbound(&self, packet: &[u8], out: &mut [u8]) {
        let Some(dst) = destination(packet) else {
            self.logger.verbose(format_args!("dropping non-IP packet"));
            return;
        };

        let (datagram, endpoint) = {
            let mut guard = self.state.write().await;
            let state = &mut *guard;

            let Some(key) = state.routes.lookup(dst) else {
                self.logger.verbose(format_args!("no peer for {}", dst));
                return;
            };
            let Some(peer) = state.peers.get_mut(&key) else {
                return;
            };
            let Some(tunn) = peer.tunn.as_mut() else {
                return;
            };

            match tunn.encapsulate(packet, out) {
                TunnResult::WriteToNetwork(data) => match peer.endpoint {
                    Some(endpoint) => {
                        peer.tx_bytes += data.len() as u64;
                        (data.to_vec(), endpoint)
                    }
                    None => {
                        self.logger
                            .verbose(format_args!("peer {} has no endpoint", key));
                        return;
                    }
                },
                TunnResult::Err(e) => {
                    self.logger
                        .error(format_args!("encapsulation error for {}: {:?}", key, e));
                    return;
                }
                _ => return,
            }
        };

        self.send_to(&datagram, endpoint).await;
    }

    /// Inbound packet processing: UDP -> decrypt -> TUN
    async fn inbound_task(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut socket_changed = self.socket_changed.subscribe();
        let mut datagram = vec![0u8; MAX_PACKET_SIZE];
        let mut out = vec![0u8; MAX_PACKET_SIZE];

        loop {
            let socket = self.socket.read().await.clone();
            let received = tokio::select! {
                _ = shutdown.changed() => break,
                _ = socket_changed.changed() => continue,
                received = socket.recv_from(&mut datagram) => received,
            };

            match received {
                Ok((n, src)) => self.handle_datagram(&datagram[..n], src, &mut out).await,
                Err(e) => {
                    self.logger.error(format_args!("UDP recv error: {}", e));
                    time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    async fn handle_datagram(&self, datagram: &[u8], src: SocketAddr, out: &mut [u8]) {
        let mut replies = Vec::new();
        let mut packet = None;

        {
            let mut guard = self.state.write().await;
            let state = &mut *guard;

            // The peer last seen at this address is the likely sender
            let mut candidates: Vec<PublicKey> = state
                .peers
                .values()
                .filter(|p| p.endpoint == Some(src))
                .map(|p| p.public_key)
                .collect();
            candidates.extend(
                state
                    .peers
                    .values()
                    .filter(|p| p.endpoint != Some(src))
                    .map(|p| p.public_key),
            );

            let mut sender = None;
            for key in candidates {
                let Some(peer) = state.peers.get_mut(&key) else {
                    continue;
                };
                let Some(tunn) = peer.tunn.as_mut() else {
                    continue;
                };

                let inbound = match tunn.decapsulate(Some(src.ip()), datagram, out) {
                    TunnResult::Err(_) => continue,
                    TunnResult::Done => Inbound::Nothing,
                    TunnResult::WriteToNetwork(data) => Inbound::Reply(data.to_vec()),
                    TunnResult::WriteToTunnelV4(data, addr) => {
                        Inbound::Packet(data.to_vec(), IpAddr::V4(addr))
                    }
                    TunnResult::WriteToTunnelV6(data, addr) => {
                        Inbound::Packet(data.to_vec(), IpAddr::V6(addr))
                    }
                };

                match inbound {
                    Inbound::Nothing => {}
                    Inbound::Reply(data) => {
                        replies.push(data);
                        // Packets queued while the handshake was pending
                        while let TunnResult::WriteToNetwork(data) = tunn.decapsulate(None, &[], out) {
                            replies.push(data.to_vec());
                        }
                    }
                    Inbound::Packet(data, source) => packet = Some((data, source)),
                }

                peer.endpoint = Some(src);
                peer.rx_bytes += datagram.len() as u64;
                peer.tx_bytes += replies.iter().map(|r| r.len() as u64).sum::<u64>();
                sender = Some(key);
                break;
            }

            let Some(sender) = sender else {
                self.logger
                    .verbose(format_args!("dropping datagram from unknown source {}", src));
                return;
            };

            if let Some((_, source)) = &packet {
                if state.routes.lookup(*source) != Some(sender) {
                    self.logger.verbose(format_args!(
                        "dropping packet from {} not allowed for peer {}",
                        source, sender
                    ));
                    packet = None;
                }
            }
        }

        for reply in replies {
            self.send_to(&reply, src).await;
        }

        if let Some((data, _)) = packet {
            let written = self.tun.lock().await.write(&data);
            match written {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.logger.verbose(format_args!("TUN write would block"));
                }
                Err(e) => self.logger.error(format_args!("TUN write error: {}", e)),
            }
        }
    }

    /// Timer task for handshakes, keepalives and rekeys
    async fn timer_task(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut interval = time::interval(TIMER_TICK_INTERVAL);
        let mut out = vec![0u8; MAX_PACKET_SIZE];

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = interval.tick() => {}
            }

            let mut outgoing = Vec::new();
            {
                let mut state = self.state.write().await;
                for peer in state.peers.values_mut() {
                    let Some(tunn) = peer.tunn.as_mut() else {
                        continue;
                    };
                    match tunn.update_timers(&mut out) {
                        TunnResult::WriteToNetwork(data) => {
                            if let Some(endpoint) = peer.endpoint {
                                peer.tx_bytes += data.len() as u64;
                                outgoing.push((data.to_vec(), endpoint));
                            }
                        }
                        TunnResult::Err(WireGuardError::ConnectionExpired) => {}
                        TunnResult::Err(e) => {
                            self.logger.verbose(format_args!(
                                "timer error for peer {}: {:?}",
                                peer.public_key, e
                            ));
                        }
                        _ => {}
                    }
                }
            }

            for (data, endpoint) in outgoing {
                self.send_to(&data, endpoint).await;
            }
        }
    }
}

fn apply_peer(state: &mut EngineState, config: PeerConfig, logger: &EngineLogger) -> Result<()> {
    let key = config.public_key;

    if config.remove {
        if state.peers.remove(&key).is_some() {
            logger.verbose(format_args!("removed peer {}", key));
        }
        state.routes.remove_owner(&key);
        return Ok(());
    }

    let (peer, created) = match state.peers.entry(key) {
        Entry::Occupied(entry) => (entry.into_mut(), false),
        Entry::Vacant(entry) => {
            state.next_index += 1;
            logger.verbose(format_args!("created peer {}", key));
            (entry.insert(EnginePeer::new(key, state.next_index)), true)
        }
    };

    let mut changed = created;

    if let Some(psk) = config.preshared_key {
        let psk = (!psk.is_zero()).then_some(psk);
        if psk != peer.preshared_key {
            peer.preshared_key = psk;
            changed = true;
        }
    }

    if let Some(endpoint) = config.endpoint {
        peer.endpoint = Some(endpoint);
    }

    if let Some(interval) = config.persistent_keepalive_interval {
        let interval = (!interval.is_zero()).then_some(interval);
        if interval != peer.keepalive {
            peer.keepalive = interval;
            changed = true;
        }
    }

    if changed {
        peer.rebuild(state.private_key.as_ref())?;
    }

    if config.replace_allowed_ips {
        state.routes.remove_owner(&key);
    }
    for net in config.allowed_ips {
        state.routes.insert(net, key);
    }

    Ok(())
}

fn bind_udp(port: u16) -> Result<Arc<TokioUdpSocket>> {
    let listen_addr = SocketAddr::from(([0, 0, 0, 0], port));

    let std_socket = UdpSocket::bind(listen_addr).map_err(|e| {
        WgEmbedError::Resource(format!("Failed to bind UDP socket to {}: {}", listen_addr, e))
    })?;

    std_socket.set_nonblocking(true).map_err(|e| {
        WgEmbedError::Resource(format!("Failed to set UDP socket to non-blocking: {}", e))
    })?;

    let socket = TokioUdpSocket::from_std(std_socket).map_err(|e| {
        WgEmbedError::Resource(format!("Failed to create tokio UdpSocket: {}", e))
    })?;

    Ok(Arc::new(socket))
}

#[async_trait]
impl UapiHandler for Engine {
    async fn get(&self) -> Result<Device> {
        self.device().await
    }

    async fn set(&self, config: DeviceConfig) -> Result<()> {
        self.apply(config).await
    }
}
