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

//! The identify protocol.
//!
//! On every new connection the service exchanges identity metadata with the
//! remote: the peer-id-proving public key, supported protocols, listen
//! addresses, a signed peer record, and the address the remote observes for
//! us. Whenever the local snapshot changes, connections that support
//! `/ipfs/id/push/1.0.0` receive the update unprompted.

mod observed;
mod proto;
mod snapshot;

pub use observed::ObservedAddrManager;
pub use snapshot::IdentifySnapshot;

use fnv::FnvHashMap;
use futures::channel::oneshot;
use futures::future::{AbortHandle, Abortable, Either, Shared};
use futures::prelude::*;
use futures_timer::Delay;
use log::{debug, error, trace, warn};
use parking_lot::Mutex;
use prost::Message;
use std::collections::HashSet;
use std::convert::TryFrom;
use std::io;
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;

use peerlink_core::addr::{MultiaddrExt, Reachability};
use peerlink_core::identity::{Keypair, PublicKey};
use peerlink_core::record::PeerRecord;
use peerlink_core::util::{read_length_prefixed, write_length_prefixed};
use peerlink_core::{Envelope, Multiaddr, PeerId, ProtocolId};
use peerlink_peerstore::{
    CONNECTED_ADDR_TTL, RECENTLY_CONNECTED_ADDR_TTL, TEMP_ADDR_TTL,
};
use peerlink_swarm::{
    Connection, EvtConnected, EvtDisconnected, EvtLocalAddressesUpdated,
    EvtLocalProtocolsUpdated, Host, SwarmStream,
};

/// Request/response identification.
pub const ID_PROTOCOL: &str = "/ipfs/id/1.0.0";
/// One-way push of an updated snapshot.
pub const PUSH_PROTOCOL: &str = "/ipfs/id/push/1.0.0";

/// Messages without a signed record that fit this size go out as one frame.
pub const LEGACY_ID_SIZE: usize = 2048;
/// Upper bound on the total size of a framed identify exchange.
pub const SIGNED_ID_SIZE: usize = 8192;
/// Upper bound on the number of frames in one exchange.
pub const MAX_MESSAGES: usize = 10;
/// Pushes in flight at once.
pub const MAX_PUSH_CONCURRENCY: usize = 32;

pub const DEFAULT_PROTOCOL_VERSION: &str = "ipfs/0.1.0";
pub const DEFAULT_AGENT_VERSION: &str = "erwinkok.org/libp2p";

#[derive(Debug, Clone)]
pub struct IdentifyConfig {
    pub protocol_version: String,
    pub agent_version: String,
    /// Bound on reading the remote's identify response.
    pub stream_read_timeout: Duration,
}

impl Default for IdentifyConfig {
    fn default() -> IdentifyConfig {
        IdentifyConfig {
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_string(),
            agent_version: DEFAULT_AGENT_VERSION.to_string(),
            stream_read_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Error)]
pub enum IdentifyError {
    #[error("identify read timed out")]
    Timeout,
    #[error("remote sent too many identify messages")]
    TooManyMessages,
    #[error("identify message exceeds the size limit")]
    MessageTooLarge,
    #[error("negotiation failed: {0}")]
    Negotiation(String),
    #[error("malformed identify message: {0}")]
    Codec(String),
    #[error("stream error: {0}")]
    Io(String),
    #[error("identification failed: {0}")]
    Failed(String),
}

/// A peer finished identifying on some connection.
#[derive(Debug, Clone)]
pub struct EvtPeerIdentificationCompleted {
    pub peer: PeerId,
}

/// Identification on a connection failed; the connection itself stays up.
#[derive(Debug, Clone)]
pub struct EvtPeerIdentificationFailed {
    pub peer: PeerId,
    pub reason: String,
}

/// A push revealed a change in the remote's protocol set.
#[derive(Debug, Clone)]
pub struct EvtPeerProtocolsUpdated {
    pub peer: PeerId,
    pub added: Vec<ProtocolId>,
    pub removed: Vec<ProtocolId>,
}

type AttemptResult = Result<(), String>;

struct ConnState {
    connection: Arc<Connection>,
    push_supported: bool,
    attempt: Option<Shared<oneshot::Receiver<AttemptResult>>>,
}

struct Inner {
    host: Host,
    keypair: Keypair,
    config: IdentifyConfig,
    snapshot: Mutex<IdentifySnapshot>,
    conns: Mutex<FnvHashMap<u64, ConnState>>,
    observed: ObservedAddrManager,
    aborts: Mutex<Vec<AbortHandle>>,
}

/// The identify service. Lives for as long as its host does; [`IdService::close`]
/// detaches it.
pub struct IdService {
    inner: Arc<Inner>,
}

impl IdService {
    /// Starts the service: registers the two protocol handlers and begins
    /// identifying every connection the swarm reports.
    pub fn new(host: Host, keypair: Keypair, config: IdentifyConfig) -> Arc<IdService> {
        let inner = Arc::new(Inner {
            host,
            keypair,
            config,
            snapshot: Mutex::new(IdentifySnapshot::default()),
            conns: Mutex::new(FnvHashMap::default()),
            observed: ObservedAddrManager::new(),
            aborts: Mutex::new(Vec::new()),
        });
        let service = Arc::new(IdService { inner: inner.clone() });

        // Serve identification requests.
        let weak = Arc::downgrade(&inner);
        inner.host.set_stream_handler(ProtocolId::from(ID_PROTOCOL), move |stream| {
            serve_identify(weak.clone(), stream)
        });
        // Accept pushes.
        let weak = Arc::downgrade(&inner);
        inner.host.set_stream_handler(ProtocolId::from(PUSH_PROTOCOL), move |stream| {
            serve_push(weak.clone(), stream)
        });

        inner.update_snapshot();

        // Subscribe before returning so no event published after `new`
        // can be missed.
        let bus = inner.host.event_bus().clone();
        let subscriptions = Subscriptions {
            connected: bus.subscribe::<EvtConnected>().fuse(),
            disconnected: bus.subscribe::<EvtDisconnected>().fuse(),
            addrs_updated: bus.subscribe::<EvtLocalAddressesUpdated>().fuse(),
            protos_updated: bus.subscribe::<EvtLocalProtocolsUpdated>().fuse(),
        };
        let (abort, reg) = AbortHandle::new_pair();
        inner.aborts.lock().push(abort);
        let events = event_loop(service.clone(), subscriptions);
        spawn(&inner.host, "identify-events", async move {
            let _ = Abortable::new(events, reg).await;
        });

        service
    }

    pub fn host(&self) -> &Host {
        &self.inner.host
    }

    /// The current local snapshot.
    pub fn snapshot(&self) -> IdentifySnapshot {
        self.inner.snapshot.lock().clone()
    }

    /// Addresses remotes observe for us.
    pub fn observed_addrs(&self) -> Vec<Multiaddr> {
        self.inner.observed.addresses()
    }

    /// Waits until the given connection has been identified. Only one
    /// identify attempt runs per connection; concurrent callers share it.
    pub async fn identify_wait(&self, conn: &Arc<Connection>) -> Result<(), IdentifyError> {
        let shared = {
            let mut conns = self.inner.conns.lock();
            let state = conns.entry(conn.id()).or_insert_with(|| ConnState {
                connection: conn.clone(),
                push_supported: false,
                attempt: None,
            });
            match &state.attempt {
                Some(shared) => shared.clone(),
                None => {
                    let (tx, rx) = oneshot::channel();
                    let shared = rx.shared();
                    state.attempt = Some(shared.clone());
                    let inner = self.inner.clone();
                    let conn = conn.clone();
                    spawn(
                        &self.inner.host,
                        &format!("identify-conn-{}", conn.id()),
                        async move {
                            let result = run_identify(&inner, &conn).await;
                            let bus = inner.host.event_bus();
                            match &result {
                                Ok(()) => {
                                    bus.publish(EvtPeerIdentificationCompleted {
                                        peer: conn.peer().clone(),
                                    });
                                }
                                Err(e) => {
                                    debug!("identify of {} failed: {}", conn.peer(), e);
                                    bus.publish(EvtPeerIdentificationFailed {
                                        peer: conn.peer().clone(),
                                        reason: e.to_string(),
                                    });
                                }
                            }
                            let _ = tx.send(result.map_err(|e| e.to_string()));
                        },
                    );
                    shared
                }
            }
        };
        match shared.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(IdentifyError::Failed(reason)),
            Err(_) => Err(IdentifyError::Failed("identify task vanished".into())),
        }
    }

    /// Stops serving and reacting to events.
    pub fn close(&self) {
        for abort in self.inner.aborts.lock().drain(..) {
            abort.abort();
        }
        self.inner.host.remove_stream_handler(&ProtocolId::from(ID_PROTOCOL));
        self.inner.host.remove_stream_handler(&ProtocolId::from(PUSH_PROTOCOL));
    }
}

fn spawn(host: &Host, name: &str, future: impl Future<Output = ()> + Send + 'static) {
    host.swarm().executor().exec_named(name, Box::pin(future));
}

struct Subscriptions {
    connected: stream::Fuse<peerlink_core::bus::Subscription<EvtConnected>>,
    disconnected: stream::Fuse<peerlink_core::bus::Subscription<EvtDisconnected>>,
    addrs_updated: stream::Fuse<peerlink_core::bus::Subscription<EvtLocalAddressesUpdated>>,
    protos_updated: stream::Fuse<peerlink_core::bus::Subscription<EvtLocalProtocolsUpdated>>,
}

async fn event_loop(service: Arc<IdService>, subscriptions: Subscriptions) {
    let Subscriptions {
        mut connected,
        mut disconnected,
        mut addrs_updated,
        mut protos_updated,
    } = subscriptions;
    loop {
        futures::select! {
            evt = connected.next() => match evt {
                Some(evt) => {
                    let service = service.clone();
                    let conn = evt.connection.clone();
                    spawn(&service.inner.host.clone(), "identify-new-conn", async move {
                        let _ = service.identify_wait(&conn).await;
                    });
                }
                None => break,
            },
            evt = disconnected.next() => match evt {
                Some(evt) => on_disconnected(&service.inner, &evt.peer),
                None => break,
            },
            evt = addrs_updated.next() => match evt {
                Some(_) => refresh_snapshot(&service.inner),
                None => break,
            },
            evt = protos_updated.next() => match evt {
                Some(_) => refresh_snapshot(&service.inner),
                None => break,
            },
        }
    }
}

/// The last connection to `peer` is gone: addresses pinned for the life of
/// the connection decay within ~30 minutes from now.
fn on_disconnected(inner: &Arc<Inner>, peer: &PeerId) {
    trace!("downgrading connected-ttl addresses of {}", peer);
    inner
        .host
        .peerstore()
        .addrs
        .update_addrs(peer, CONNECTED_ADDR_TTL, RECENTLY_CONNECTED_ADDR_TTL);
    inner.conns.lock().retain(|_, state| {
        state.connection.peer() != peer && !state.connection.is_closed()
    });
}

fn refresh_snapshot(inner: &Arc<Inner>) {
    if inner.update_snapshot() {
        let inner = inner.clone();
        let host = inner.host.clone();
        spawn(&host, "identify-push", async move {
            push_all(&inner).await;
        });
    }
}

impl Inner {
    /// Recomputes the snapshot; bumps `seq` and re-signs the peer record
    /// only when the content actually changed.
    fn update_snapshot(&self) -> bool {
        let protocols: HashSet<ProtocolId> = self.host.protocols().into_iter().collect();
        let addrs = self.host.addresses();
        let mut snapshot = self.snapshot.lock();
        let candidate =
            IdentifySnapshot { seq: snapshot.seq, protocols, addrs, record: None };
        if snapshot.same_content(&candidate) {
            return false;
        }
        let seq = snapshot.seq + 1;
        let record = PeerRecord::new(
            self.host.local_peer().clone(),
            seq,
            candidate.addrs.clone(),
        )
        .seal(&self.keypair)
        .map_err(|e| warn!("cannot sign the peer record: {}", e))
        .ok();
        *snapshot = IdentifySnapshot {
            seq,
            protocols: candidate.protocols,
            addrs: candidate.addrs,
            record,
        };
        trace!("snapshot advanced to seq {}", seq);
        true
    }

    /// The identify message describing the local host, as seen from the
    /// connection behind `stream`.
    fn local_message(&self, stream: &SwarmStream) -> proto::Identify {
        let snapshot = self.snapshot.lock();
        let mut protocols: Vec<String> =
            snapshot.protocols.iter().map(|p| p.as_str().to_string()).collect();
        protocols.sort();
        proto::Identify {
            public_key: Some(self.keypair.public().to_protobuf_encoding()),
            listen_addrs: snapshot.addrs.iter().map(|a| a.to_vec()).collect(),
            protocols,
            observed_addr: Some(stream.connection().remote_addr().to_vec()),
            protocol_version: Some(self.config.protocol_version.clone()),
            agent_version: Some(self.config.agent_version.clone()),
            signed_peer_record: snapshot.record.as_ref().map(|r| r.to_protobuf_encoding()),
        }
    }
}

/// Runs the initiator side of `/ipfs/id/1.0.0` on one connection.
async fn run_identify(inner: &Arc<Inner>, conn: &Arc<Connection>) -> Result<(), IdentifyError> {
    let mut stream = inner
        .host
        .swarm()
        .new_stream_on(conn)
        .await
        .map_err(|e| IdentifyError::Failed(e.to_string()))?;
    let negotiated = with_timeout(
        inner.config.stream_read_timeout,
        peerlink_multistream::dialer_select(&mut stream, vec![ProtocolId::from(ID_PROTOCOL)]),
    )
    .await;
    match negotiated {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            stream.reset();
            return Err(IdentifyError::Negotiation(e.to_string()));
        }
        Err(()) => {
            stream.reset();
            return Err(IdentifyError::Timeout);
        }
    }
    let message =
        match with_timeout(inner.config.stream_read_timeout, read_identify_message(&mut stream))
            .await
        {
            Ok(Ok(message)) => message,
            Ok(Err(e)) => {
                stream.reset();
                return Err(e);
            }
            Err(()) => {
                stream.reset();
                return Err(IdentifyError::Timeout);
            }
        };
    consume_message(inner, conn, message, false).await
}

/// Responder side of `/ipfs/id/1.0.0`: send the snapshot, close.
fn serve_identify(weak: Weak<Inner>, mut stream: SwarmStream) -> future::BoxFuture<'static, ()> {
    async move {
        let inner = match weak.upgrade() {
            Some(inner) => inner,
            None => {
                stream.reset();
                return;
            }
        };
        // Answer from a snapshot that reflects the host as it is right now.
        refresh_snapshot(&inner);
        let message = inner.local_message(&stream);
        if let Err(e) = write_identify_message(&mut stream, message).await {
            debug!("failed to serve identify to {}: {}", stream.peer(), e);
            stream.reset();
            return;
        }
        let _ = stream.close().await;
    }
    .boxed()
}

/// Responder side of `/ipfs/id/push/1.0.0`: read one snapshot, apply it.
fn serve_push(weak: Weak<Inner>, mut stream: SwarmStream) -> future::BoxFuture<'static, ()> {
    async move {
        let inner = match weak.upgrade() {
            Some(inner) => inner,
            None => {
                stream.reset();
                return;
            }
        };
        let read = with_timeout(
            inner.config.stream_read_timeout,
            read_identify_message(&mut stream),
        )
        .await;
        match read {
            Ok(Ok(message)) => {
                let conn = stream.connection().clone();
                if let Err(e) = consume_message(&inner, &conn, message, true).await {
                    debug!("failed to apply push from {}: {}", conn.peer(), e);
                }
            }
            Ok(Err(e)) => {
                debug!("bad push from {}: {}", stream.peer(), e);
                stream.reset();
            }
            Err(()) => {
                debug!("push from {} timed out", stream.peer());
                stream.reset();
            }
        }
    }
    .boxed()
}

/// Pushes the current snapshot to every identified connection that speaks
/// the push protocol.
async fn push_all(inner: &Arc<Inner>) {
    let targets: Vec<Arc<Connection>> = inner
        .conns
        .lock()
        .values()
        .filter(|state| state.push_supported && !state.connection.is_closed())
        .map(|state| state.connection.clone())
        .collect();
    if targets.is_empty() {
        return;
    }
    debug!("pushing snapshot to {} connections", targets.len());
    futures::stream::iter(targets)
        .for_each_concurrent(MAX_PUSH_CONCURRENCY, |conn| {
            let inner = inner.clone();
            async move {
                if let Err(e) = push_one(&inner, &conn).await {
                    debug!("push to {} failed: {}", conn.peer(), e);
                }
            }
        })
        .await;
}

async fn push_one(inner: &Arc<Inner>, conn: &Arc<Connection>) -> Result<(), IdentifyError> {
    let mut stream = inner
        .host
        .swarm()
        .new_stream_on(conn)
        .await
        .map_err(|e| IdentifyError::Failed(e.to_string()))?;
    let negotiated = with_timeout(
        inner.config.stream_read_timeout,
        peerlink_multistream::dialer_select(&mut stream, vec![ProtocolId::from(PUSH_PROTOCOL)]),
    )
    .await;
    match negotiated {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            stream.reset();
            return Err(IdentifyError::Negotiation(e.to_string()));
        }
        Err(()) => {
            stream.reset();
            return Err(IdentifyError::Timeout);
        }
    }
    let message = inner.local_message(&stream);
    write_identify_message(&mut stream, message)
        .await
        .map_err(|e| IdentifyError::Io(e.to_string()))?;
    let _ = stream.close().await;
    Ok(())
}

/// Applies a received identify (or push) message to the peerstore.
async fn consume_message(
    inner: &Arc<Inner>,
    conn: &Arc<Connection>,
    message: proto::Identify,
    is_push: bool,
) -> Result<(), IdentifyError> {
    let peer = conn.peer().clone();
    let store = inner.host.peerstore().clone();

    // Protocols: diff against what we knew, then replace.
    let advertised: Vec<ProtocolId> =
        message.protocols.iter().map(|name| ProtocolId::from(name.as_str())).collect();
    let advertised_set: HashSet<ProtocolId> = advertised.iter().cloned().collect();
    let known: HashSet<ProtocolId> = store.get_protocols(&peer).into_iter().collect();
    if is_push {
        let added: Vec<ProtocolId> = advertised_set.difference(&known).cloned().collect();
        let removed: Vec<ProtocolId> = known.difference(&advertised_set).cloned().collect();
        if !added.is_empty() || !removed.is_empty() {
            inner.host.event_bus().publish(EvtPeerProtocolsUpdated {
                peer: peer.clone(),
                added,
                removed,
            });
        }
    }
    store.protos.set_protocols(&peer, advertised);

    let push_supported = advertised_set.contains(&ProtocolId::from(PUSH_PROTOCOL));
    if let Some(state) = inner.conns.lock().get_mut(&conn.id()) {
        state.push_supported = push_supported;
    }

    // What the remote observes for us.
    if let Some(bytes) = &message.observed_addr {
        if !bytes.is_empty() {
            match Multiaddr::try_from(bytes.clone()) {
                Ok(observed) => inner.observed.record(observed, conn.local_addr()),
                Err(_) => debug!("undecodable observed address from {}", peer),
            }
        }
    }

    // Advertised addresses: prefer the signed record, fall back to the
    // plain list.
    let mut unsigned = Vec::with_capacity(message.listen_addrs.len());
    for bytes in &message.listen_addrs {
        match Multiaddr::try_from(bytes.clone()) {
            Ok(addr) => unsigned.push(addr),
            Err(e) => debug!("skipping undecodable listen address from {}: {}", peer, e),
        }
    }
    let mut certified: Option<(Envelope, Vec<Multiaddr>)> = None;
    if let Some(raw) = &message.signed_peer_record {
        match Envelope::from_protobuf_encoding(raw)
            .and_then(|env| PeerRecord::from_envelope(&env).map(|rec| (env, rec)))
        {
            Ok((env, rec)) if rec.peer_id == peer => certified = Some((env, rec.addresses)),
            Ok(_) => warn!("signed record from {} names a different peer", peer),
            Err(e) => warn!("invalid signed record from {}: {}", peer, e),
        }
    }

    // Re-TTL: what survived the last exchange decays to temp, the fresh
    // set is pinned for the life of the connection, leftovers expire.
    store.addrs.update_addrs(&peer, RECENTLY_CONNECTED_ADDR_TTL, TEMP_ADDR_TTL);
    store.addrs.update_addrs(&peer, CONNECTED_ADDR_TTL, TEMP_ADDR_TTL);
    let ttl = if inner.host.swarm().connection_to(&peer).is_some() {
        CONNECTED_ADDR_TTL
    } else {
        RECENTLY_CONNECTED_ADDR_TTL
    };
    // A record rejected as a replay must not refresh its addresses either.
    let accepted = match certified {
        Some((envelope, addresses)) => {
            match store.addrs.consume_peer_record(envelope, Duration::from_secs(0)) {
                Ok(true) => Some(addresses),
                Ok(false) => {
                    debug!("stale certified record from {}; using the plain address list", peer);
                    None
                }
                Err(e) => {
                    warn!("could not store certified record of {}: {}", peer, e);
                    None
                }
            }
        }
        None => None,
    };
    let filtered =
        filter_by_reachability(conn.remote_addr(), accepted.unwrap_or(unsigned));
    store.add_addrs(&peer, filtered, ttl);
    store.addrs.update_addrs(&peer, TEMP_ADDR_TTL, Duration::from_secs(0));

    // Version strings become metadata.
    if let Some(protocol_version) = &message.protocol_version {
        let _ = store.metadata.put(&peer, "ProtocolVersion", protocol_version);
    }
    if let Some(agent_version) = &message.agent_version {
        let _ = store.metadata.put(&peer, "AgentVersion", agent_version);
    }

    // The public key must derive to the peer we are talking to; the first
    // stored key wins.
    if let Some(bytes) = &message.public_key {
        match PublicKey::from_protobuf_encoding(bytes) {
            Ok(key) if key.to_peer_id() == peer => match store.pub_key(&peer) {
                None => {
                    if let Err(e) = store.add_pub_key(&peer, key).await {
                        warn!("could not store public key of {}: {}", peer, e);
                    }
                }
                Some(existing) if existing != key => {
                    error!("{} sent a public key conflicting with the stored one; keeping the original", peer);
                }
                Some(_) => {}
            },
            Ok(_) => warn!("public key sent by {} does not derive to its peer id", peer),
            Err(e) => warn!("undecodable public key from {}: {}", peer, e),
        }
    }
    Ok(())
}

/// Loopback endpoints may tell us anything; private ones must not leak
/// loopback; public ones only count for public addresses. Keeps LAN
/// topology off the internet.
fn filter_by_reachability(remote: &Multiaddr, addrs: Vec<Multiaddr>) -> Vec<Multiaddr> {
    match remote.reachability() {
        Reachability::Loopback | Reachability::Unknown => addrs,
        Reachability::Private => addrs.into_iter().filter(|a| !a.is_loopback()).collect(),
        Reachability::Public => addrs.into_iter().filter(|a| a.is_public()).collect(),
    }
}

/// Reads up to [`MAX_MESSAGES`] varint-framed identify messages totalling
/// at most [`SIGNED_ID_SIZE`] bytes and merges them.
async fn read_identify_message<T>(io: &mut T) -> Result<proto::Identify, IdentifyError>
where
    T: AsyncRead + Unpin,
{
    let mut merged: Option<proto::Identify> = None;
    let mut total = 0usize;
    for _ in 0..MAX_MESSAGES {
        let frame = match read_length_prefixed(io, SIGNED_ID_SIZE).await {
            Ok(frame) => frame,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return merged.ok_or_else(|| IdentifyError::Io("empty identify stream".into()))
            }
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                return Err(IdentifyError::MessageTooLarge)
            }
            Err(e) => return Err(IdentifyError::Io(e.to_string())),
        };
        total += frame.len();
        if total > SIGNED_ID_SIZE {
            return Err(IdentifyError::MessageTooLarge);
        }
        let message = proto::Identify::decode(&frame[..])
            .map_err(|e| IdentifyError::Codec(e.to_string()))?;
        match &mut merged {
            Some(merged) => merged.merge(message),
            None => merged = Some(message),
        }
    }
    // The frame allowance is used up; anything further is a violation.
    let mut probe = [0u8; 1];
    match io.read(&mut probe).await {
        Ok(0) => merged.ok_or_else(|| IdentifyError::Io("empty identify stream".into())),
        Ok(_) => Err(IdentifyError::TooManyMessages),
        Err(_) => merged.ok_or_else(|| IdentifyError::Io("empty identify stream".into())),
    }
}

/// Writes the message, splitting the signed record into a second frame.
async fn write_identify_message<T>(io: &mut T, mut message: proto::Identify) -> io::Result<()>
where
    T: AsyncWrite + Unpin,
{
    let record = message.signed_peer_record.take();
    let body = message.encode_to_vec();
    write_length_prefixed(io, body).await?;
    if let Some(raw) = record {
        let tail = proto::Identify { signed_peer_record: Some(raw), ..Default::default() };
        write_length_prefixed(io, tail.encode_to_vec()).await?;
    }
    io.flush().await
}

async fn with_timeout<F: Future>(duration: Duration, future: F) -> Result<F::Output, ()> {
    futures::pin_mut!(future);
    match futures::future::select(future, Delay::new(duration)).await {
        Either::Left((out, _)) => Ok(out),
        Either::Right(_) => Err(()),
    }
}
