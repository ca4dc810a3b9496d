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

//! The host's advertised identity at a point in time.

use std::collections::HashSet;

use peerlink_core::{Envelope, Multiaddr, ProtocolId};

/// An immutable capture of what the host advertises: its protocols, its
/// addresses, and a signed record binding the two. `seq` increases
/// strictly on every semantic change; equality ignores it.
#[derive(Debug, Clone, Default)]
pub struct IdentifySnapshot {
    pub seq: u64,
    pub protocols: HashSet<ProtocolId>,
    pub addrs: Vec<Multiaddr>,
    pub record: Option<Envelope>,
}

impl IdentifySnapshot {
    /// Compares everything except `seq` (and the record, which is derived
    /// from the rest). Addresses compare as sets.
    pub fn same_content(&self, other: &IdentifySnapshot) -> bool {
        if self.protocols != other.protocols {
            return false;
        }
        let ours: HashSet<&Multiaddr> = self.addrs.iter().collect();
        let theirs: HashSet<&Multiaddr> = other.addrs.iter().collect();
        ours == theirs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ma(s: &str) -> Multiaddr {
        s.parse().unwrap()
    }

    #[test]
    fn equality_ignores_seq_and_address_order() {
        let a = IdentifySnapshot {
            seq: 1,
            protocols: vec![ProtocolId::from("/x/1")].into_iter().collect(),
            addrs: vec![ma("/ip4/1.2.3.4/tcp/1"), ma("/ip4/1.2.3.4/tcp/2")],
            record: None,
        };
        let b = IdentifySnapshot {
            seq: 9,
            protocols: vec![ProtocolId::from("/x/1")].into_iter().collect(),
            addrs: vec![ma("/ip4/1.2.3.4/tcp/2"), ma("/ip4/1.2.3.4/tcp/1")],
            record: None,
        };
        assert!(a.same_content(&b));
    }

    #[test]
    fn protocol_and_address_changes_are_visible() {
        let base = IdentifySnapshot::default();
        let mut with_proto = base.clone();
        with_proto.protocols.insert(ProtocolId::from("/x/1"));
        assert!(!base.same_content(&with_proto));

        let mut with_addr = base.clone();
        with_addr.addrs.push(ma("/ip4/1.2.3.4/tcp/1"));
        assert!(!base.same_content(&with_addr));
    }
}
