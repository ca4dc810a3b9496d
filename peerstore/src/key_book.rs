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

//! Public and private keys per peer.
//!
//! A mismatch between a key and the claimed peer id is answered after a
//! random 200–1000 ms delay, so the failure path cannot be used as a fast
//! timing oracle.

use fnv::FnvHashMap;
use futures_timer::Delay;
use log::warn;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use peerlink_core::identity::{Keypair, PublicKey};
use peerlink_core::PeerId;

use crate::datastore::Datastore;
use crate::keychain::Keychain;
use crate::PeerstoreError;

fn pub_key_path(peer: &PeerId) -> String {
    format!("/peers/keys/{}/public", peer.to_base32())
}

fn priv_key_path(peer: &PeerId) -> String {
    format!("/peers/keys/{}/private", peer.to_base32())
}

pub struct KeyBook {
    datastore: Arc<dyn Datastore>,
    keychain: Option<Keychain>,
    pub_cache: Mutex<FnvHashMap<PeerId, PublicKey>>,
}

impl KeyBook {
    pub(crate) fn new(datastore: Arc<dyn Datastore>, keychain: Option<Keychain>) -> KeyBook {
        KeyBook { datastore, keychain, pub_cache: Mutex::new(FnvHashMap::default()) }
    }

    /// Stores the public key of a remote peer. Fails when the key does not
    /// derive to `peer`.
    pub async fn add_pub_key(&self, peer: &PeerId, key: PublicKey) -> Result<(), PeerstoreError> {
        if key.to_peer_id() != *peer {
            auth_failure_jitter().await;
            return Err(PeerstoreError::KeyMismatch);
        }
        self.datastore.put(&pub_key_path(peer), key.to_protobuf_encoding())?;
        self.pub_cache.lock().insert(peer.clone(), key);
        Ok(())
    }

    /// The public key of `peer`, from cache, datastore, or — for ids that
    /// inline their key — the peer id itself.
    pub fn pub_key(&self, peer: &PeerId) -> Option<PublicKey> {
        if let Some(key) = self.pub_cache.lock().get(peer) {
            return Some(key.clone());
        }
        let loaded = match self.datastore.get(&pub_key_path(peer)) {
            Ok(Some(bytes)) => match PublicKey::from_protobuf_encoding(&bytes) {
                Ok(key) => Some(key),
                Err(e) => {
                    warn!("stored public key for {} does not decode: {}", peer, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("failed to read public key for {}: {}", peer, e);
                None
            }
        };
        let key = loaded.or_else(|| peer.as_public_key())?;
        self.pub_cache.lock().insert(peer.clone(), key.clone());
        Some(key)
    }

    /// Stores one of our own keypairs, encrypted at rest when a keychain is
    /// configured. Fails when the keypair does not derive to `peer`.
    pub async fn add_priv_key(&self, peer: &PeerId, keypair: Keypair) -> Result<(), PeerstoreError> {
        if keypair.public().to_peer_id() != *peer {
            auth_failure_jitter().await;
            return Err(PeerstoreError::KeyMismatch);
        }
        let encoded = keypair.to_protobuf_encoding();
        let stored = match &self.keychain {
            Some(keychain) => keychain.encrypt(&encoded)?,
            None => encoded,
        };
        self.datastore.put(&priv_key_path(peer), stored)?;
        Ok(())
    }

    pub fn priv_key(&self, peer: &PeerId) -> Result<Option<Keypair>, PeerstoreError> {
        let stored = match self.datastore.get(&priv_key_path(peer))? {
            Some(stored) => stored,
            None => return Ok(None),
        };
        let encoded = match &self.keychain {
            Some(keychain) => keychain.decrypt(&stored)?,
            None => stored,
        };
        Keypair::from_protobuf_encoding(&encoded)
            .map(Some)
            .map_err(|e| PeerstoreError::Codec(e.to_string()))
    }

    /// Re-encrypts every stored private key under `new_password` in one
    /// atomic batch.
    pub fn rotate_keychain_pass(&self, new_password: &str) -> Result<(), PeerstoreError> {
        let keychain = self
            .keychain
            .as_ref()
            .ok_or_else(|| PeerstoreError::Config("no keychain is configured".into()))?;
        let entries = self
            .datastore
            .query("/peers/keys/")?
            .into_iter()
            .filter(|(key, _)| key.ends_with("/private"))
            .collect();
        let ops = keychain.reencrypt(new_password, entries)?;
        self.datastore.apply_batch(ops)?;
        keychain.set_password(new_password.to_string());
        Ok(())
    }

    /// Peers we hold at least one key for.
    pub fn peers(&self) -> HashSet<PeerId> {
        let mut peers = HashSet::new();
        if let Ok(entries) = self.datastore.query("/peers/keys/") {
            for (key, _) in entries {
                let mut parts = key.rsplit('/');
                let _leaf = parts.next();
                if let Some(b32) = parts.next() {
                    if let Ok(peer) = PeerId::from_base32(b32) {
                        peers.insert(peer);
                    }
                }
            }
        }
        peers
    }

    pub fn remove_peer(&self, peer: &PeerId) {
        let _ = self.datastore.delete(&pub_key_path(peer));
        let _ = self.datastore.delete(&priv_key_path(peer));
        self.pub_cache.lock().remove(peer);
    }
}

/// A deliberate random sleep on identity mismatches, to deter probing.
async fn auth_failure_jitter() {
    let delay = rand::thread_rng().gen_range(200u64, 1000);
    Delay::new(Duration::from_millis(delay)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::MemDatastore;
    use crate::keychain::KeychainConfig;
    use std::time::Instant;

    fn book() -> KeyBook {
        KeyBook::new(Arc::new(MemDatastore::new()), None)
    }

    fn encrypted_book() -> KeyBook {
        let keychain = Keychain::new(KeychainConfig {
            password: "correct horse battery staple".into(),
            salt: vec![9u8; 16],
            iterations: 1000,
        })
        .unwrap();
        KeyBook::new(Arc::new(MemDatastore::new()), Some(keychain))
    }

    #[async_std::test]
    async fn pub_key_roundtrip() {
        let book = book();
        let key = Keypair::generate_ed25519().public();
        let peer = key.to_peer_id();
        book.add_pub_key(&peer, key.clone()).await.unwrap();
        assert_eq!(book.pub_key(&peer), Some(key));
    }

    #[async_std::test]
    async fn mismatched_pub_key_is_rejected_slowly() {
        let book = book();
        let key = Keypair::generate_ed25519().public();
        let wrong_peer = PeerId::random();
        let start = Instant::now();
        let result = book.add_pub_key(&wrong_peer, key).await;
        assert!(matches!(result, Err(PeerstoreError::KeyMismatch)));
        assert!(start.elapsed() >= Duration::from_millis(200));
        assert!(book.pub_key(&wrong_peer).is_none());
    }

    #[test]
    fn inlined_keys_are_recovered_from_the_id() {
        let book = book();
        let key = Keypair::generate_ed25519().public();
        let peer = key.to_peer_id();
        // Nothing stored, but ed25519 ids embed the key.
        assert_eq!(book.pub_key(&peer), Some(key));
    }

    #[async_std::test]
    async fn priv_key_roundtrip_plain_and_encrypted() {
        for book in vec![book(), encrypted_book()] {
            let keypair = Keypair::generate_ed25519();
            let peer = keypair.public().to_peer_id();
            book.add_priv_key(&peer, keypair.clone()).await.unwrap();
            let loaded = book.priv_key(&peer).unwrap().unwrap();
            assert_eq!(loaded.public(), keypair.public());
        }
    }

    #[async_std::test]
    async fn rotation_keeps_keys_readable() {
        let book = encrypted_book();
        let keypair = Keypair::generate_ed25519();
        let peer = keypair.public().to_peer_id();
        book.add_priv_key(&peer, keypair.clone()).await.unwrap();

        book.rotate_keychain_pass("an entirely new passphrase").unwrap();
        let loaded = book.priv_key(&peer).unwrap().unwrap();
        assert_eq!(loaded.public(), keypair.public());
    }

    #[async_std::test]
    async fn short_rotation_password_is_refused() {
        let book = encrypted_book();
        assert!(matches!(
            book.rotate_keychain_pass("short"),
            Err(PeerstoreError::Config(_))
        ));
    }
}
