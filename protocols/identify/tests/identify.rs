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

//! Two-host identify scenarios over the in-memory transport.

use futures::future::Either;
use futures::prelude::*;
use futures_timer::Delay;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use peerlink_core::identity::Keypair;
use peerlink_core::time::ManualClock;
use peerlink_core::transport::memory::MemoryTransport;
use peerlink_core::{AddrInfo, Executor, Multiaddr, PeerId};
use peerlink_identify::{
    EvtPeerIdentificationCompleted, IdService, IdentifyConfig, DEFAULT_AGENT_VERSION,
};
use peerlink_peerstore::{Datastore, MemDatastore, Peerstore, PeerstoreConfig};
use peerlink_swarm::{Host, SwarmBuilder};
use peerlink_yamux::YamuxConfig;

fn executor() -> Arc<dyn Executor> {
    Arc::new(|future: Pin<Box<dyn Future<Output = ()> + Send>>| {
        async_std::task::spawn(future);
    })
}

struct TestHost {
    host: Host,
    service: Arc<IdService>,
    keypair: Keypair,
    clock: ManualClock,
}

fn new_host() -> TestHost {
    let keypair = Keypair::generate_ed25519();
    let peer = keypair.public().to_peer_id();
    let clock = ManualClock::new();
    let datastore: Arc<dyn Datastore> = Arc::new(MemDatastore::new());
    let peerstore = Arc::new(
        Peerstore::new(
            datastore,
            PeerstoreConfig { clock: Some(Arc::new(clock.clone())), ..Default::default() },
        )
        .unwrap(),
    );
    let swarm = SwarmBuilder::new(peer, peerstore)
        .transport(Arc::new(MemoryTransport::new(keypair.public().to_peer_id())))
        .multiplexer(Arc::new(YamuxConfig {
            keep_alive_interval: None,
            ..YamuxConfig::default()
        }))
        .executor(executor())
        .build()
        .unwrap();
    let host = Host::new(swarm);
    let service = IdService::new(host.clone(), keypair.clone(), IdentifyConfig::default());
    TestHost { host, service, keypair, clock }
}

fn listening_host() -> (TestHost, Multiaddr, PeerId) {
    let host = new_host();
    let addr = host.host.swarm().listen_on(&"/memory/0".parse().unwrap()).unwrap();
    let peer = host.host.local_peer().clone();
    (host, addr, peer)
}

async fn within<F: Future>(secs: u64, future: F) -> F::Output {
    futures::pin_mut!(future);
    match futures::future::select(future, Delay::new(Duration::from_secs(secs))).await {
        Either::Left((out, _)) => out,
        Either::Right(_) => panic!("timed out"),
    }
}

/// Both sides run identify and learn addresses, keys and the agent
/// version of the other.
#[async_std::test]
async fn two_hosts_identify_each_other() {
    let (h1, _, h1_peer) = listening_host();
    let (h2, h2_addr, h2_peer) = listening_host();

    let conn =
        h1.host.connect(AddrInfo::new(h2_peer.clone(), vec![h2_addr.clone()])).await.unwrap();
    within(10, h1.service.identify_wait(&conn)).await.unwrap();

    // The dialer has identified the listener.
    assert_eq!(h1.host.peerstore().addrs_of(&h2_peer), h2.host.addresses());
    assert_eq!(
        h1.host.peerstore().pub_key(&h2_peer),
        Some(h2.keypair.public())
    );
    assert_eq!(
        h1.host.peerstore().metadata.get::<String>(&h2_peer, "AgentVersion").as_deref(),
        Some(DEFAULT_AGENT_VERSION)
    );

    // The listener identified the dialer in the other direction.
    within(10, async {
        loop {
            let known = h2.host.peerstore().addrs_of(&h1_peer);
            if known == h1.host.addresses() && !known.is_empty() {
                break;
            }
            Delay::new(Duration::from_millis(50)).await;
        }
    })
    .await;
    assert_eq!(
        h2.host.peerstore().pub_key(&h1_peer),
        Some(h1.keypair.public())
    );
    assert_eq!(
        h2.host.peerstore().metadata.get::<String>(&h1_peer, "AgentVersion").as_deref(),
        Some(DEFAULT_AGENT_VERSION)
    );
}

/// Adding a listener after identification pushes the new address to the
/// already connected peer.
#[async_std::test]
async fn address_changes_are_pushed() {
    let (h1, _, h1_peer) = listening_host();
    let (h2, h2_addr, h2_peer) = listening_host();

    let conn = h1.host.connect(AddrInfo::new(h2_peer, vec![h2_addr])).await.unwrap();
    within(10, h1.service.identify_wait(&conn)).await.unwrap();

    // Wait until the remote has identified us too, so it knows we speak
    // push.
    let mut identified = h2.host.event_bus().subscribe::<EvtPeerIdentificationCompleted>();
    within(10, async {
        loop {
            match identified.next().await {
                Some(evt) if evt.peer == h1_peer => break,
                Some(_) => continue,
                None => panic!("event bus closed"),
            }
        }
    })
    .await;

    let mut addr_stream = h2.host.peerstore().addrs.addr_stream(&h1_peer);
    let new_addr = h1.host.swarm().listen_on(&"/memory/0".parse().unwrap()).unwrap();

    within(10, async {
        loop {
            let got = addr_stream.next().await.expect("address stream ended");
            if got == new_addr {
                break;
            }
        }
    })
    .await;
    assert!(h2.host.peerstore().addrs_of(&h1_peer).contains(&new_addr));
    drop(h2.service);
}

/// After a disconnect, connection-lifetime addresses decay to the
/// recently-connected TTL and disappear within the hour.
#[async_std::test]
async fn addresses_decay_after_disconnect() {
    let (h1, _, _) = listening_host();
    let (h2, h2_addr, h2_peer) = listening_host();

    let conn = h1.host.connect(AddrInfo::new(h2_peer.clone(), vec![h2_addr])).await.unwrap();
    within(10, h1.service.identify_wait(&conn)).await.unwrap();
    assert!(!h1.host.peerstore().addrs_of(&h2_peer).is_empty());

    h1.host.swarm().close_connection(&conn).await;

    // Give the disconnect event a moment to reach the identify service.
    within(10, async {
        loop {
            Delay::new(Duration::from_millis(50)).await;
            h1.clock.advance(Duration::from_secs(35 * 60));
            if h1.host.peerstore().addrs_of(&h2_peer).is_empty() {
                break;
            }
        }
    })
    .await;
    drop(h2.service);
}
