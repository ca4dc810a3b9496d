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

//! Which protocols each peer has been seen to speak.

use log::warn;
use std::collections::HashSet;
use std::sync::Arc;

use peerlink_core::{PeerId, ProtocolId};

use crate::datastore::Datastore;

fn protocols_path(peer: &PeerId) -> String {
    format!("/peers/protocols/{}", peer.to_base32())
}

pub struct ProtoBook {
    datastore: Arc<dyn Datastore>,
}

impl ProtoBook {
    pub(crate) fn new(datastore: Arc<dyn Datastore>) -> ProtoBook {
        ProtoBook { datastore }
    }

    pub fn get_protocols(&self, peer: &PeerId) -> Vec<ProtocolId> {
        self.load(peer).into_iter().collect()
    }

    /// Unions `protocols` into the stored set.
    pub fn add_protocols(&self, peer: &PeerId, protocols: Vec<ProtocolId>) {
        let mut stored = self.load(peer);
        stored.extend(protocols);
        self.store(peer, &stored);
    }

    /// Replaces the stored set.
    pub fn set_protocols(&self, peer: &PeerId, protocols: Vec<ProtocolId>) {
        let stored: HashSet<ProtocolId> = protocols.into_iter().collect();
        self.store(peer, &stored);
    }

    /// Removes `protocols` from the stored set.
    pub fn remove_protocols(&self, peer: &PeerId, protocols: &[ProtocolId]) {
        let mut stored = self.load(peer);
        for protocol in protocols {
            stored.remove(protocol);
        }
        self.store(peer, &stored);
    }

    /// The subset of `protocols` the peer supports, in the order given.
    pub fn supports_protocols(&self, peer: &PeerId, protocols: &[ProtocolId]) -> Vec<ProtocolId> {
        let stored = self.load(peer);
        protocols.iter().filter(|p| stored.contains(p)).cloned().collect()
    }

    pub fn first_supported_protocol(
        &self,
        peer: &PeerId,
        protocols: &[ProtocolId],
    ) -> Option<ProtocolId> {
        let stored = self.load(peer);
        protocols.iter().find(|p| stored.contains(p)).cloned()
    }

    pub fn remove_peer(&self, peer: &PeerId) {
        let _ = self.datastore.delete(&protocols_path(peer));
    }

    fn load(&self, peer: &PeerId) -> HashSet<ProtocolId> {
        match self.datastore.get(&protocols_path(peer)) {
            Ok(Some(bytes)) => match bincode::deserialize::<Vec<String>>(&bytes) {
                Ok(names) => names.into_iter().map(ProtocolId::from).collect(),
                Err(e) => {
                    warn!("stored protocols for {} do not decode: {}", peer, e);
                    HashSet::new()
                }
            },
            Ok(None) => HashSet::new(),
            Err(e) => {
                warn!("failed to read protocols for {}: {}", peer, e);
                HashSet::new()
            }
        }
    }

    fn store(&self, peer: &PeerId, protocols: &HashSet<ProtocolId>) {
        let path = protocols_path(peer);
        let result = if protocols.is_empty() {
            self.datastore.delete(&path)
        } else {
            let mut names: Vec<String> =
                protocols.iter().map(|p| p.as_str().to_string()).collect();
            names.sort();
            match bincode::serialize(&names) {
                Ok(bytes) => self.datastore.put(&path, bytes),
                Err(e) => {
                    warn!("failed to encode protocols for {}: {}", peer, e);
                    return;
                }
            }
        };
        if let Err(e) = result {
            warn!("failed to persist protocols for {}: {}", peer, e);
        }
    }
}
