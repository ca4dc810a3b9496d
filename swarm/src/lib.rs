// Copyright 2021 Parity Technologies (UK) Ltd.
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! The swarm: transport connections, dialing, inbound acceptance and
//! protocol dispatch.
//!
//! The swarm owns every [`Connection`] and coordinates dials through a
//! per-peer worker so concurrent callers never race each other. New
//! multiplexed streams — inbound and outbound — run multistream-select
//! before protocol code sees them; handlers are registered through the
//! shared [`MultistreamMuxer`] registry (usually via the [`Host`] facade).

mod connection;
mod dial;
mod error;
mod host;
mod ranker;

pub use connection::{Connection, SwarmStream};
pub use error::{DialError, SwarmError};
pub use host::Host;
pub use ranker::{
    default_dial_ranker, no_delay_dial_ranker, AddressDelay, PUBLIC_QUIC_DELAY, PUBLIC_TCP_DELAY,
};

use fnv::FnvHashMap;
use futures::future::{AbortHandle, Abortable, BoxFuture, Either};
use futures::prelude::*;
use futures_timer::Delay;
use log::{debug, trace, warn};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use peerlink_core::addr::MultiaddrExt;
use peerlink_core::executor::ThreadPoolExecutor;
use peerlink_core::gater::AllowAll;
use peerlink_core::muxing::Multiplexer;
use peerlink_core::rsrc::NullResourceManager;
use peerlink_core::transport::{Transport, TransportConnection};
use peerlink_core::{
    ConnectionGater, Direction, EventBus, Executor, Multiaddr, PeerId, ProtocolId,
    ResourceManager,
};
use peerlink_multistream::MultistreamMuxer;
use peerlink_peerstore::{Peerstore, TEMP_ADDR_TTL};

use dial::DialSynchronizer;

/// Handler invoked for every inbound stream negotiated to its protocol.
pub type ProtocolHandler = Arc<dyn Fn(SwarmStream) -> BoxFuture<'static, ()> + Send + Sync>;

/// How long a single multistream negotiation may take.
pub const NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct SwarmConfig {
    pub negotiation_timeout: Duration,
    /// Timeout of one transport dial attempt.
    pub per_dial_timeout: Duration,
    /// Disable to dial every candidate address immediately.
    pub enable_dial_ranking: bool,
}

impl Default for SwarmConfig {
    fn default() -> SwarmConfig {
        SwarmConfig {
            negotiation_timeout: NEGOTIATION_TIMEOUT,
            per_dial_timeout: Duration::from_secs(15),
            enable_dial_ranking: true,
        }
    }
}

/// A new connection was admitted.
#[derive(Clone)]
pub struct EvtConnected {
    pub connection: Arc<Connection>,
}

impl std::fmt::Debug for EvtConnected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvtConnected").field("connection", &self.connection).finish()
    }
}

/// The last connection to a peer went away.
#[derive(Debug, Clone)]
pub struct EvtDisconnected {
    pub peer: PeerId,
}

#[derive(Debug, Clone)]
pub struct EvtListen {
    pub addr: Multiaddr,
}

#[derive(Debug, Clone)]
pub struct EvtListenClose {
    pub addr: Multiaddr,
}

/// The set of locally reachable addresses changed.
#[derive(Debug, Clone)]
pub struct EvtLocalAddressesUpdated {
    pub addrs: Vec<Multiaddr>,
}

/// The set of locally registered protocols changed.
#[derive(Debug, Clone)]
pub struct EvtLocalProtocolsUpdated {
    pub added: Vec<ProtocolId>,
    pub removed: Vec<ProtocolId>,
}

pub struct SwarmBuilder {
    local_peer: PeerId,
    peerstore: Arc<Peerstore>,
    config: SwarmConfig,
    transports: Vec<Arc<dyn Transport>>,
    multiplexer: Option<Arc<dyn Multiplexer>>,
    executor: Option<Arc<dyn Executor>>,
    bus: Option<EventBus>,
    rsrc: Option<Arc<dyn ResourceManager>>,
    gater: Option<Arc<dyn ConnectionGater>>,
}

impl SwarmBuilder {
    pub fn new(local_peer: PeerId, peerstore: Arc<Peerstore>) -> SwarmBuilder {
        SwarmBuilder {
            local_peer,
            peerstore,
            config: SwarmConfig::default(),
            transports: Vec::new(),
            multiplexer: None,
            executor: None,
            bus: None,
            rsrc: None,
            gater: None,
        }
    }

    pub fn config(mut self, config: SwarmConfig) -> Self {
        self.config = config;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transports.push(transport);
        self
    }

    pub fn multiplexer(mut self, multiplexer: Arc<dyn Multiplexer>) -> Self {
        self.multiplexer = Some(multiplexer);
        self
    }

    /// Sets the executor used to spawn background tasks. Defaults to a
    /// thread pool.
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn event_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn resource_manager(mut self, rsrc: Arc<dyn ResourceManager>) -> Self {
        self.rsrc = Some(rsrc);
        self
    }

    pub fn gater(mut self, gater: Arc<dyn ConnectionGater>) -> Self {
        self.gater = Some(gater);
        self
    }

    pub fn build(self) -> Result<Arc<Swarm>, SwarmError> {
        let multiplexer = self
            .multiplexer
            .ok_or_else(|| SwarmError::Config("a stream multiplexer is required".into()))?;
        if self.transports.is_empty() {
            return Err(SwarmError::Config("at least one transport is required".into()));
        }
        let executor = match self.executor {
            Some(executor) => executor,
            None => Arc::new(
                ThreadPoolExecutor::new()
                    .map_err(|e| SwarmError::Config(format!("cannot start a thread pool: {}", e)))?,
            ),
        };
        Ok(Arc::new(Swarm {
            local_peer: self.local_peer,
            config: self.config,
            transports: self.transports,
            multiplexer,
            peerstore: self.peerstore,
            bus: self.bus.unwrap_or_default(),
            executor,
            rsrc: self.rsrc.unwrap_or_else(|| Arc::new(NullResourceManager)),
            gater: self.gater.unwrap_or_else(|| Arc::new(AllowAll)),
            handlers: Arc::new(MultistreamMuxer::new()),
            connections: Mutex::new(FnvHashMap::default()),
            by_peer: Mutex::new(FnvHashMap::default()),
            next_conn_id: AtomicU64::new(1),
            dialer: DialSynchronizer::new(),
            listen_addrs: Mutex::new(Vec::new()),
            listener_aborts: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct Swarm {
    local_peer: PeerId,
    config: SwarmConfig,
    transports: Vec<Arc<dyn Transport>>,
    multiplexer: Arc<dyn Multiplexer>,
    peerstore: Arc<Peerstore>,
    bus: EventBus,
    executor: Arc<dyn Executor>,
    rsrc: Arc<dyn ResourceManager>,
    gater: Arc<dyn ConnectionGater>,
    handlers: Arc<MultistreamMuxer<ProtocolHandler>>,
    connections: Mutex<FnvHashMap<u64, Arc<Connection>>>,
    by_peer: Mutex<FnvHashMap<PeerId, SmallVec<[u64; 2]>>>,
    next_conn_id: AtomicU64,
    dialer: DialSynchronizer,
    listen_addrs: Mutex<Vec<Multiaddr>>,
    listener_aborts: Mutex<Vec<AbortHandle>>,
    closed: AtomicBool,
}

impl Swarm {
    pub fn local_peer(&self) -> &PeerId {
        &self.local_peer
    }

    pub fn peerstore(&self) -> &Arc<Peerstore> {
        &self.peerstore
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn handlers(&self) -> &Arc<MultistreamMuxer<ProtocolHandler>> {
        &self.handlers
    }

    pub(crate) fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    pub(crate) fn gater(&self) -> &Arc<dyn ConnectionGater> {
        &self.gater
    }

    pub(crate) fn config(&self) -> &SwarmConfig {
        &self.config
    }

    pub(crate) fn dialer(&self) -> &DialSynchronizer {
        &self.dialer
    }

    /// Starts listening on `addr`; returns the bound address.
    pub fn listen_on(self: &Arc<Self>, addr: &Multiaddr) -> Result<Multiaddr, SwarmError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SwarmError::Shutdown);
        }
        let transport = self
            .select_transport(addr)
            .ok_or_else(|| SwarmError::Config(format!("no transport listens on {}", addr)))?;
        let mut listener = transport.listen_on(addr)?;
        let local = listener.local_addr();
        self.listen_addrs.lock().push(local.clone());
        self.bus.publish(EvtListen { addr: local.clone() });
        self.bus.publish(EvtLocalAddressesUpdated { addrs: self.listen_addrs() });

        let (abort, reg) = AbortHandle::new_pair();
        self.listener_aborts.lock().push(abort);
        let swarm = self.clone();
        let listen_addr = local.clone();
        self.executor.exec_named(
            &format!("swarm-listener({})", listen_addr),
            Box::pin(async move {
                let accept_loop = async {
                    loop {
                        match listener.accept().await {
                            Ok(tc) => {
                                if !swarm
                                    .gater
                                    .intercept_accept(&tc.local_addr, &tc.remote_addr)
                                {
                                    debug!("gater refused inbound from {}", tc.remote_addr);
                                    continue;
                                }
                                if let Err(e) = swarm.add_connection(tc, Direction::Inbound) {
                                    warn!("failed to admit inbound connection: {}", e);
                                }
                            }
                            Err(e) => {
                                debug!("listener {} ended: {}", listen_addr, e);
                                break;
                            }
                        }
                    }
                };
                let _ = Abortable::new(accept_loop, reg).await;
                if !swarm.closed.load(Ordering::SeqCst) {
                    swarm.listen_addrs.lock().retain(|a| a != &listen_addr);
                    swarm.bus.publish(EvtListenClose { addr: listen_addr.clone() });
                    swarm
                        .bus
                        .publish(EvtLocalAddressesUpdated { addrs: swarm.listen_addrs() });
                }
            }),
        );
        Ok(local)
    }

    pub fn listen_addrs(&self) -> Vec<Multiaddr> {
        self.listen_addrs.lock().clone()
    }

    /// Dials `peer`, sharing any dial already in flight.
    pub async fn dial(self: &Arc<Self>, peer: &PeerId) -> Result<Arc<Connection>, DialError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DialError::Shutdown);
        }
        self.dialer.dial(self, peer.clone()).await
    }

    /// An existing live connection to `peer`, if any.
    pub fn connection_to(&self, peer: &PeerId) -> Option<Arc<Connection>> {
        let by_peer = self.by_peer.lock();
        let ids = by_peer.get(peer)?;
        let connections = self.connections.lock();
        ids.iter()
            .filter_map(|id| connections.get(id))
            .find(|c| !c.is_closed())
            .cloned()
    }

    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.connections.lock().values().cloned().collect()
    }

    pub fn connected_peers(&self) -> HashSet<PeerId> {
        self.by_peer.lock().keys().cloned().collect()
    }

    /// Opens a raw multiplexed stream to `peer`, dialing when necessary.
    /// Protocol selection is the caller's job (see [`Host::new_stream`]).
    pub async fn new_stream(self: &Arc<Self>, peer: &PeerId) -> Result<SwarmStream, SwarmError> {
        let scope = self.rsrc.open_stream(peer, Direction::Outbound)?;
        let conn = match self.connection_to(peer) {
            Some(conn) => conn,
            None => match self.dial(peer).await {
                Ok(conn) => conn,
                Err(e) => {
                    scope.done();
                    return Err(e.into());
                }
            },
        };
        match conn.muxer().open_stream().await {
            Ok(raw) => Ok(SwarmStream::new(raw, conn, scope)),
            Err(e) => {
                scope.done();
                Err(e.into())
            }
        }
    }

    /// Opens a raw multiplexed stream on one specific connection.
    pub async fn new_stream_on(&self, conn: &Arc<Connection>) -> Result<SwarmStream, SwarmError> {
        if conn.is_closed() {
            return Err(SwarmError::ConnectionClosed);
        }
        let scope = self.rsrc.open_stream(conn.peer(), Direction::Outbound)?;
        match conn.muxer().open_stream().await {
            Ok(raw) => Ok(SwarmStream::new(raw, conn.clone(), scope)),
            Err(e) => {
                scope.done();
                Err(e.into())
            }
        }
    }

    /// Wraps an established transport connection, registers it and starts
    /// serving its inbound streams.
    pub(crate) fn add_connection(
        self: &Arc<Self>,
        tc: TransportConnection,
        direction: Direction,
    ) -> Result<Arc<Connection>, SwarmError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SwarmError::Shutdown);
        }
        if !self.gater.intercept_secured(direction, &tc.remote_peer) {
            return Err(SwarmError::Dial(DialError::Denied));
        }
        let scope = self.rsrc.open_connection(direction, Some(&tc.remote_peer))?;
        let muxer = self.multiplexer.upgrade(tc.io, direction, self.executor.clone());
        let id = self.next_conn_id.fetch_add(1, Ordering::SeqCst);
        let conn = Arc::new(Connection::new(
            id,
            tc.remote_peer.clone(),
            direction,
            tc.local_addr,
            tc.remote_addr,
            muxer,
            scope,
        ));
        self.connections.lock().insert(id, conn.clone());
        self.by_peer.lock().entry(tc.remote_peer.clone()).or_default().push(id);
        debug!("connection {} to {} established ({})", id, conn.peer(), direction);
        self.bus.publish(EvtConnected { connection: conn.clone() });

        let swarm = self.clone();
        let loop_conn = conn.clone();
        self.executor.exec_named(
            &format!("swarm-conn-{}", id),
            Box::pin(async move {
                inbound_stream_loop(swarm, loop_conn).await;
            }),
        );
        Ok(conn)
    }

    /// Drops a connection from the maps, releases its scope and publishes
    /// `EvtDisconnected` when it was the peer's last.
    pub(crate) fn remove_connection(&self, conn: &Arc<Connection>) {
        if self.connections.lock().remove(&conn.id()).is_none() {
            return;
        }
        let last = {
            let mut by_peer = self.by_peer.lock();
            match by_peer.get_mut(conn.peer()) {
                Some(ids) => {
                    ids.retain(|id| *id != conn.id());
                    if ids.is_empty() {
                        by_peer.remove(conn.peer());
                        true
                    } else {
                        false
                    }
                }
                None => true,
            }
        };
        conn.mark_closed();
        conn.release_scope();
        debug!("connection {} to {} removed (last: {})", conn.id(), conn.peer(), last);
        if last {
            self.bus.publish(EvtDisconnected { peer: conn.peer().clone() });
        }
    }

    /// Closes one connection and waits for its teardown.
    pub async fn close_connection(&self, conn: &Arc<Connection>) {
        conn.close().await;
        self.remove_connection(conn);
    }

    /// Closes the swarm: stops listeners and the dialer, closes every
    /// connection.
    pub async fn close(self: &Arc<Self>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.dialer.close();
        for abort in self.listener_aborts.lock().drain(..) {
            abort.abort();
        }
        let addrs: Vec<_> = self.listen_addrs.lock().drain(..).collect();
        for addr in addrs {
            self.bus.publish(EvtListenClose { addr });
        }
        self.bus.publish(EvtLocalAddressesUpdated { addrs: Vec::new() });
        let conns = self.connections();
        for conn in conns {
            self.close_connection(&conn).await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn select_transport(&self, addr: &Multiaddr) -> Option<Arc<dyn Transport>> {
        self.transports.iter().find(|t| t.can_dial(addr)).cloned()
    }

    /// The address resolution pipeline: fetch, resolve, dedup, filter,
    /// persist.
    pub(crate) async fn addresses_for_dial(
        self: &Arc<Self>,
        peer: &PeerId,
    ) -> Result<Vec<Multiaddr>, DialError> {
        let known = self.peerstore.addrs_of(peer);
        if known.is_empty() {
            return Err(DialError::NoAddresses);
        }

        // Expand through transport resolvers (e.g. DNS).
        let mut resolved = Vec::with_capacity(known.len());
        for addr in known {
            match self.select_transport(&addr).and_then(|t| {
                t.resolver().map(|r| r.resolve(&addr))
            }) {
                Some(resolution) => match resolution.await {
                    Ok(outputs) => resolved.extend(outputs),
                    Err(e) => {
                        debug!("resolution of {} failed: {}", addr, e);
                        resolved.push(addr);
                    }
                },
                None => resolved.push(addr),
            }
        }

        let mut seen = HashSet::new();
        resolved.retain(|addr| seen.insert(addr.to_vec()));

        let own = self.listen_addrs();
        let survivors: Vec<Multiaddr> = resolved
            .into_iter()
            .filter(|addr| self.select_transport(addr).is_some())
            .filter(|addr| !addr.is_ipv6_link_local())
            .filter(|addr| !own.contains(addr))
            .filter(|addr| self.gater.intercept_addr_dial(peer, addr))
            .collect();
        if survivors.is_empty() {
            return Err(DialError::NoGoodAddresses);
        }
        self.peerstore.add_addrs(peer, survivors.clone(), TEMP_ADDR_TTL);
        Ok(survivors)
    }
}

/// Serves one connection: accepts multiplexed streams until the session
/// dies, then unregisters the connection.
async fn inbound_stream_loop(swarm: Arc<Swarm>, conn: Arc<Connection>) {
    loop {
        match conn.muxer().accept_stream().await {
            Ok(raw) => {
                let swarm = swarm.clone();
                let conn = conn.clone();
                let name = format!("swarm-accept-{}-{}", conn.id(), raw.id());
                swarm.executor.clone().exec_named(
                    &name,
                    Box::pin(async move {
                        handle_inbound_stream(swarm, conn, raw).await;
                    }),
                );
            }
            Err(e) => {
                trace!("connection {} stopped accepting streams: {}", conn.id(), e);
                break;
            }
        }
    }
    swarm.remove_connection(&conn);
}

/// Admits one inbound stream: scope, negotiation, handler dispatch.
async fn handle_inbound_stream(
    swarm: Arc<Swarm>,
    conn: Arc<Connection>,
    raw: peerlink_core::muxing::StreamBox,
) {
    let scope = match swarm.rsrc.open_stream(conn.peer(), Direction::Inbound) {
        Ok(scope) => scope,
        Err(e) => {
            warn!("refusing inbound stream from {}: {}", conn.peer(), e);
            raw.reset();
            return;
        }
    };
    let mut stream = SwarmStream::new(raw, conn.clone(), scope);
    let negotiated = with_timeout(
        swarm.config.negotiation_timeout,
        peerlink_multistream::listener_select(&mut stream, &swarm.handlers),
    )
    .await;
    match negotiated {
        Ok(Ok((protocol, handler))) => {
            stream.set_protocol(protocol.clone());
            let name = format!("swarm-stream-{}({})", stream.id(), protocol);
            swarm.executor.exec_named(&name, handler(stream));
        }
        Ok(Err(e)) => {
            warn!("negotiation with {} failed: {}", conn.peer(), e);
            stream.reset();
        }
        Err(()) => {
            warn!("negotiation with {} timed out", conn.peer());
            stream.reset();
        }
    }
}

pub(crate) async fn with_timeout<F: Future>(
    duration: Duration,
    future: F,
) -> Result<F::Output, ()> {
    futures::pin_mut!(future);
    match futures::future::select(future, Delay::new(duration)).await {
        Either::Left((out, _)) => Ok(out),
        Either::Right(_) => Err(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;
    use peerlink_core::identity::Keypair;
    use peerlink_core::transport::memory::MemoryTransport;
    use peerlink_yamux::YamuxConfig;
    use std::pin::Pin;

    fn executor() -> Arc<dyn Executor> {
        Arc::new(|future: Pin<Box<dyn Future<Output = ()> + Send>>| {
            async_std::task::spawn(future);
        })
    }

    fn new_swarm() -> (Arc<Swarm>, PeerId) {
        let keypair = Keypair::generate_ed25519();
        let peer = keypair.public().to_peer_id();
        let peerstore = Arc::new(Peerstore::memory());
        let swarm = SwarmBuilder::new(peer.clone(), peerstore)
            .transport(Arc::new(MemoryTransport::new(peer.clone())))
            .multiplexer(Arc::new(YamuxConfig {
                keep_alive_interval: None,
                ..YamuxConfig::default()
            }))
            .executor(executor())
            .build()
            .unwrap();
        (swarm, peer)
    }

    fn echo_handler() -> ProtocolHandler {
        Arc::new(|mut stream: SwarmStream| {
            async move {
                let mut buf = vec![0u8; 256];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                let _ = stream.close().await;
            }
            .boxed()
        })
    }

    #[async_std::test]
    async fn dial_connect_and_echo() {
        let (server, server_peer) = new_swarm();
        let (client, _) = new_swarm();

        server.handlers().add_handler(ProtocolId::from("/echo/1.0.0"), echo_handler());
        let addr = server.listen_on(&"/memory/0".parse().unwrap()).unwrap();
        client.peerstore().add_addr(&server_peer, addr, TEMP_ADDR_TTL);

        let mut stream = client.new_stream(&server_peer).await.unwrap();
        let chosen = peerlink_multistream::dialer_select(
            &mut stream,
            vec![ProtocolId::from("/echo/1.0.0")],
        )
        .await
        .unwrap();
        assert_eq!(chosen.as_str(), "/echo/1.0.0");

        stream.write_all(b"around we go").await.unwrap();
        stream.close().await.unwrap();
        let mut echoed = Vec::new();
        stream.read_to_end(&mut echoed).await.unwrap();
        assert_eq!(echoed, b"around we go");
    }

    #[async_std::test]
    async fn concurrent_dials_share_one_connection() {
        let (server, server_peer) = new_swarm();
        let (client, _) = new_swarm();
        let addr = server.listen_on(&"/memory/0".parse().unwrap()).unwrap();
        client.peerstore().add_addr(&server_peer, addr, TEMP_ADDR_TTL);

        let (a, b, c) =
            futures::join!(client.dial(&server_peer), client.dial(&server_peer), client.dial(&server_peer));
        let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());
        assert_eq!(a.id(), b.id());
        assert_eq!(b.id(), c.id());
        assert_eq!(client.connections().len(), 1);
    }

    #[async_std::test]
    async fn dialing_an_unknown_peer_reports_no_addresses() {
        let (client, _) = new_swarm();
        let err = client.dial(&PeerId::random()).await.unwrap_err();
        assert!(matches!(err, DialError::NoAddresses));
    }

    #[async_std::test]
    async fn gater_vetoed_peers_are_denied() {
        struct DenyAll;
        impl ConnectionGater for DenyAll {
            fn intercept_peer_dial(&self, _peer: &PeerId) -> bool {
                false
            }
        }

        let keypair = Keypair::generate_ed25519();
        let peer = keypair.public().to_peer_id();
        let swarm = SwarmBuilder::new(peer.clone(), Arc::new(Peerstore::memory()))
            .transport(Arc::new(MemoryTransport::new(peer)))
            .multiplexer(Arc::new(YamuxConfig::default()))
            .executor(executor())
            .gater(Arc::new(DenyAll))
            .build()
            .unwrap();

        let target = PeerId::random();
        swarm.peerstore().add_addr(&target, "/memory/9999".parse().unwrap(), TEMP_ADDR_TTL);
        let err = swarm.dial(&target).await.unwrap_err();
        assert!(matches!(err, DialError::Denied));
    }

    #[async_std::test]
    async fn connected_and_disconnected_events_fire_once() {
        let (server, server_peer) = new_swarm();
        let (client, client_peer) = new_swarm();
        let addr = server.listen_on(&"/memory/0".parse().unwrap()).unwrap();
        client.peerstore().add_addr(&server_peer, addr, TEMP_ADDR_TTL);

        let mut connected = server.event_bus().subscribe::<EvtConnected>();
        let mut disconnected = server.event_bus().subscribe::<EvtDisconnected>();

        let conn = client.dial(&server_peer).await.unwrap();
        let evt = connected.next().await.unwrap();
        assert_eq!(evt.connection.peer(), &client_peer);

        client.close_connection(&conn).await;
        let evt = with_timeout(Duration::from_secs(5), disconnected.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(evt.peer, client_peer);
    }

    #[async_std::test]
    async fn unhandled_protocols_get_the_stream_reset() {
        let (server, server_peer) = new_swarm();
        let (client, _) = new_swarm();
        let addr = server.listen_on(&"/memory/0".parse().unwrap()).unwrap();
        client.peerstore().add_addr(&server_peer, addr, TEMP_ADDR_TTL);

        let mut stream = client.new_stream(&server_peer).await.unwrap();
        let result = peerlink_multistream::dialer_select(
            &mut stream,
            vec![ProtocolId::from("/nosuch/1.0.0")],
        )
        .await;
        assert!(result.is_err());
    }

    #[async_std::test]
    async fn swarm_close_tears_everything_down() {
        let (server, server_peer) = new_swarm();
        let (client, _) = new_swarm();
        let addr = server.listen_on(&"/memory/0".parse().unwrap()).unwrap();
        client.peerstore().add_addr(&server_peer, addr.clone(), TEMP_ADDR_TTL);
        let _conn = client.dial(&server_peer).await.unwrap();

        client.close().await;
        assert!(client.connections().is_empty());
        assert!(matches!(client.dial(&server_peer).await.unwrap_err(), DialError::Shutdown));

        // The server notices the pipe went away.
        let (tx, mut rx) = mpsc::unbounded::<()>();
        let server2 = server.clone();
        async_std::task::spawn(async move {
            loop {
                if server2.connections().is_empty() {
                    let _ = tx.unbounded_send(());
                    break;
                }
                async_std::task::sleep(Duration::from_millis(50)).await;
            }
        });
        with_timeout(Duration::from_secs(5), rx.next()).await.unwrap();
    }
}
