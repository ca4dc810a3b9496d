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

//! Typed per-peer key-value metadata.

use log::warn;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

use peerlink_core::PeerId;

use crate::datastore::Datastore;
use crate::PeerstoreError;

fn metadata_path(peer: &PeerId, key: &str) -> String {
    format!("/peers/metadata/{}/{}", peer.to_base32(), key)
}

pub struct MetadataBook {
    datastore: Arc<dyn Datastore>,
}

impl MetadataBook {
    pub(crate) fn new(datastore: Arc<dyn Datastore>) -> MetadataBook {
        MetadataBook { datastore }
    }

    pub fn put<T: Serialize>(
        &self,
        peer: &PeerId,
        key: &str,
        value: &T,
    ) -> Result<(), PeerstoreError> {
        let bytes =
            bincode::serialize(value).map_err(|e| PeerstoreError::Codec(e.to_string()))?;
        self.datastore.put(&metadata_path(peer, key), bytes)?;
        Ok(())
    }

    pub fn get<T: DeserializeOwned>(&self, peer: &PeerId, key: &str) -> Option<T> {
        match self.datastore.get(&metadata_path(peer, key)) {
            Ok(Some(bytes)) => match bincode::deserialize(&bytes) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("metadata {:?} of {} does not decode: {}", key, peer, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("failed to read metadata {:?} of {}: {}", key, peer, e);
                None
            }
        }
    }

    pub fn remove_peer(&self, peer: &PeerId) {
        let prefix = format!("/peers/metadata/{}/", peer.to_base32());
        if let Ok(entries) = self.datastore.query(&prefix) {
            for (key, _) in entries {
                let _ = self.datastore.delete(&key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::MemDatastore;

    fn book() -> MetadataBook {
        MetadataBook::new(Arc::new(MemDatastore::new()))
    }

    #[test]
    fn typed_roundtrip() {
        let book = book();
        let peer = PeerId::random();
        book.put(&peer, "AgentVersion", &"erwinkok.org/libp2p".to_string()).unwrap();
        book.put(&peer, "Attempts", &7u32).unwrap();
        assert_eq!(
            book.get::<String>(&peer, "AgentVersion").as_deref(),
            Some("erwinkok.org/libp2p")
        );
        assert_eq!(book.get::<u32>(&peer, "Attempts"), Some(7));
        assert_eq!(book.get::<u32>(&peer, "Missing"), None);
    }

    #[test]
    fn remove_peer_clears_all_keys() {
        let book = book();
        let peer = PeerId::random();
        book.put(&peer, "a", &1u8).unwrap();
        book.put(&peer, "b", &2u8).unwrap();
        book.remove_peer(&peer);
        assert_eq!(book.get::<u8>(&peer, "a"), None);
        assert_eq!(book.get::<u8>(&peer, "b"), None);
    }
}
