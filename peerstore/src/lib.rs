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

//! The peerstore: everything the host knows about each peer.
//!
//! Five capabilities share one [`Datastore`]: the TTL-indexed
//! [`AddrBook`], the [`KeyBook`] (with optional at-rest encryption of
//! private keys), the [`ProtoBook`], latency [`Metrics`] and typed
//! [`MetadataBook`] values.

pub mod addr_book;
pub mod datastore;
pub mod gater;
pub mod key_book;
pub mod keychain;
pub mod metadata;
pub mod metrics;
pub mod proto_book;

pub use addr_book::{AddrBook, AddrStream};
pub use datastore::{BatchOp, Datastore, MemDatastore, StoreError};
pub use gater::BlocklistGater;
pub use key_book::KeyBook;
pub use keychain::KeychainConfig;
pub use metadata::MetadataBook;
pub use metrics::Metrics;
pub use proto_book::ProtoBook;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use peerlink_core::identity::{Keypair, PublicKey};
use peerlink_core::time::{Clock, SystemClock};
use peerlink_core::{Envelope, Multiaddr, PeerId, ProtocolId};
use thiserror::Error;

/// How long an address learned through regular means sticks around.
pub const ADDRESS_TTL: Duration = Duration::from_secs(60 * 60);
/// Addresses we are about to try dialing.
pub const TEMP_ADDR_TTL: Duration = Duration::from_secs(2 * 60);
/// Addresses learned from content-routing providers.
pub const PROVIDER_ADDR_TTL: Duration = Duration::from_secs(30 * 60);
/// Addresses of peers we were recently connected to.
pub const RECENTLY_CONNECTED_ADDR_TTL: Duration = Duration::from_secs(30 * 60);
/// Our own addresses as observed by remotes.
pub const OWN_OBSERVED_ADDR_TTL: Duration = Duration::from_secs(30 * 60);
/// Addresses pinned forever (ten years, close enough).
pub const PERMANENT_ADDR_TTL: Duration = Duration::from_secs(3650 * 24 * 60 * 60);
/// Addresses of peers we are connected to right now.
pub const CONNECTED_ADDR_TTL: Duration = Duration::from_secs(3650 * 24 * 60 * 60);

#[derive(Debug, Error)]
pub enum PeerstoreError {
    #[error("peer id does not match the key")]
    KeyMismatch,
    #[error("invalid keychain configuration: {0}")]
    Config(String),
    #[error("crypto failure: {0}")]
    Crypto(String),
    #[error("malformed stored value: {0}")]
    Codec(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Construction-time configuration.
#[derive(Default)]
pub struct PeerstoreConfig {
    /// When set, private keys are encrypted at rest.
    pub keychain: Option<KeychainConfig>,
    /// Injectable time source; defaults to the process clock.
    pub clock: Option<Arc<dyn Clock>>,
}

/// The authoritative process-local index of what we know about each peer.
pub struct Peerstore {
    pub addrs: AddrBook,
    pub keys: KeyBook,
    pub protos: ProtoBook,
    pub metrics: Metrics,
    pub metadata: MetadataBook,
}

impl Peerstore {
    pub fn new(
        datastore: Arc<dyn Datastore>,
        config: PeerstoreConfig,
    ) -> Result<Peerstore, PeerstoreError> {
        let clock = config.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let keychain = config.keychain.map(keychain::Keychain::new).transpose()?;
        Ok(Peerstore {
            addrs: AddrBook::new(datastore.clone(), clock),
            keys: KeyBook::new(datastore.clone(), keychain),
            protos: ProtoBook::new(datastore.clone()),
            metrics: Metrics::new(),
            metadata: MetadataBook::new(datastore),
        })
    }

    /// In-memory peerstore with default configuration. The common case.
    pub fn memory() -> Peerstore {
        Peerstore::new(Arc::new(MemDatastore::new()), PeerstoreConfig::default())
            .expect("default configuration is valid")
    }

    /// All peers we have addresses or keys for.
    pub fn peers(&self) -> HashSet<PeerId> {
        let mut peers = self.addrs.peers_with_addrs();
        peers.extend(self.keys.peers());
        peers
    }

    /// Forgets keys, metrics, metadata and protocols of a peer. Addresses
    /// are left to expire on their own.
    pub fn remove_peer(&self, peer: &PeerId) {
        self.keys.remove_peer(peer);
        self.metrics.remove_peer(peer);
        self.metadata.remove_peer(peer);
        self.protos.remove_peer(peer);
    }

    // Convenience passthroughs used all over the stack.

    pub fn add_addr(&self, peer: &PeerId, addr: Multiaddr, ttl: Duration) {
        self.addrs.add_addr(peer, addr, ttl)
    }

    pub fn add_addrs(&self, peer: &PeerId, addrs: Vec<Multiaddr>, ttl: Duration) {
        self.addrs.add_addrs(peer, addrs, ttl)
    }

    pub fn addrs_of(&self, peer: &PeerId) -> Vec<Multiaddr> {
        self.addrs.addrs(peer)
    }

    pub fn consume_peer_record(&self, envelope: Envelope, ttl: Duration) -> Result<bool, PeerstoreError> {
        self.addrs.consume_peer_record(envelope, ttl)
    }

    pub async fn add_pub_key(&self, peer: &PeerId, key: PublicKey) -> Result<(), PeerstoreError> {
        self.keys.add_pub_key(peer, key).await
    }

    pub fn pub_key(&self, peer: &PeerId) -> Option<PublicKey> {
        self.keys.pub_key(peer)
    }

    pub async fn add_priv_key(&self, peer: &PeerId, keypair: Keypair) -> Result<(), PeerstoreError> {
        self.keys.add_priv_key(peer, keypair).await
    }

    pub fn add_protocols(&self, peer: &PeerId, protocols: Vec<ProtocolId>) {
        self.protos.add_protocols(peer, protocols)
    }

    pub fn get_protocols(&self, peer: &PeerId) -> Vec<ProtocolId> {
        self.protos.get_protocols(peer)
    }

    pub fn first_supported_protocol(
        &self,
        peer: &PeerId,
        protocols: &[ProtocolId],
    ) -> Option<ProtocolId> {
        self.protos.first_supported_protocol(peer, protocols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peers_is_the_union_of_key_and_addr_bearers() {
        let store = Peerstore::memory();
        let addr_peer = PeerId::random();
        let key = peerlink_core::identity::Keypair::generate_ed25519().public();
        let key_peer = key.to_peer_id();

        store.add_addr(&addr_peer, "/ip4/1.2.3.4/tcp/1".parse().unwrap(), ADDRESS_TTL);
        futures::executor::block_on(store.add_pub_key(&key_peer, key)).unwrap();

        let peers = store.peers();
        assert!(peers.contains(&addr_peer));
        assert!(peers.contains(&key_peer));
    }

    #[test]
    fn remove_peer_keeps_addresses() {
        let store = Peerstore::memory();
        let peer = PeerId::random();
        store.add_addr(&peer, "/ip4/1.2.3.4/tcp/1".parse().unwrap(), ADDRESS_TTL);
        store.protos.add_protocols(&peer, vec![ProtocolId::from("/x/1")]);
        store.remove_peer(&peer);
        assert!(!store.addrs_of(&peer).is_empty());
        assert!(store.get_protocols(&peer).is_empty());
    }
}
