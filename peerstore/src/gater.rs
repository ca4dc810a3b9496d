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

//! A datastore-backed blocklist implementing the connection gater.
//!
//! Blocked peers, addresses and subnets survive restarts under the
//! `/libp2p/net/connectiongater/` namespaces.

use log::warn;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use peerlink_core::gater::ConnectionGater;
use peerlink_core::{Direction, Multiaddr, PeerId, Protocol};

use crate::datastore::Datastore;
use crate::PeerstoreError;

const PEER_PREFIX: &str = "/libp2p/net/connectiongater/peer/";
const ADDR_PREFIX: &str = "/libp2p/net/connectiongater/addr/";
const SUBNET_PREFIX: &str = "/libp2p/net/connectiongater/subnet/";

pub struct BlocklistGater {
    datastore: Arc<dyn Datastore>,
    peers: Mutex<HashSet<PeerId>>,
    addrs: Mutex<HashSet<IpAddr>>,
    subnets: Mutex<Vec<(IpAddr, u8)>>,
}

impl BlocklistGater {
    pub fn new(datastore: Arc<dyn Datastore>) -> Result<BlocklistGater, PeerstoreError> {
        let gater = BlocklistGater {
            datastore,
            peers: Mutex::new(HashSet::new()),
            addrs: Mutex::new(HashSet::new()),
            subnets: Mutex::new(Vec::new()),
        };
        gater.load()?;
        Ok(gater)
    }

    fn load(&self) -> Result<(), PeerstoreError> {
        for (key, value) in self.datastore.query(PEER_PREFIX)? {
            match PeerId::from_bytes(&value) {
                Ok(peer) => {
                    self.peers.lock().insert(peer);
                }
                Err(_) => warn!("undecodable blocklist entry at {}", key),
            }
        }
        for (key, _) in self.datastore.query(ADDR_PREFIX)? {
            match key[ADDR_PREFIX.len()..].parse::<IpAddr>() {
                Ok(ip) => {
                    self.addrs.lock().insert(ip);
                }
                Err(_) => warn!("undecodable blocklist entry at {}", key),
            }
        }
        for (key, _) in self.datastore.query(SUBNET_PREFIX)? {
            let spec = &key[SUBNET_PREFIX.len()..];
            match parse_subnet(spec) {
                Some(subnet) => self.subnets.lock().push(subnet),
                None => warn!("undecodable blocklist entry at {}", key),
            }
        }
        Ok(())
    }

    pub fn block_peer(&self, peer: PeerId) -> Result<(), PeerstoreError> {
        self.datastore
            .put(&format!("{}{}", PEER_PREFIX, peer.to_base32()), peer.to_bytes())?;
        self.peers.lock().insert(peer);
        Ok(())
    }

    pub fn unblock_peer(&self, peer: &PeerId) -> Result<(), PeerstoreError> {
        self.datastore.delete(&format!("{}{}", PEER_PREFIX, peer.to_base32()))?;
        self.peers.lock().remove(peer);
        Ok(())
    }

    pub fn block_addr(&self, ip: IpAddr) -> Result<(), PeerstoreError> {
        self.datastore.put(&format!("{}{}", ADDR_PREFIX, ip), Vec::new())?;
        self.addrs.lock().insert(ip);
        Ok(())
    }

    pub fn unblock_addr(&self, ip: &IpAddr) -> Result<(), PeerstoreError> {
        self.datastore.delete(&format!("{}{}", ADDR_PREFIX, ip))?;
        self.addrs.lock().remove(ip);
        Ok(())
    }

    pub fn block_subnet(&self, ip: IpAddr, prefix_len: u8) -> Result<(), PeerstoreError> {
        self.datastore
            .put(&format!("{}{}#{}", SUBNET_PREFIX, ip, prefix_len), Vec::new())?;
        self.subnets.lock().push((ip, prefix_len));
        Ok(())
    }

    pub fn blocked_peers(&self) -> HashSet<PeerId> {
        self.peers.lock().clone()
    }

    fn addr_allowed(&self, addr: &Multiaddr) -> bool {
        let ip = match addr.iter().next() {
            Some(Protocol::Ip4(ip)) => IpAddr::V4(ip),
            Some(Protocol::Ip6(ip)) => IpAddr::V6(ip),
            _ => return true,
        };
        if self.addrs.lock().contains(&ip) {
            return false;
        }
        !self.subnets.lock().iter().any(|(net, prefix)| subnet_contains(*net, *prefix, ip))
    }
}

fn parse_subnet(spec: &str) -> Option<(IpAddr, u8)> {
    let mut parts = spec.splitn(2, '#');
    let ip = parts.next()?.parse().ok()?;
    let prefix = parts.next()?.parse().ok()?;
    Some((ip, prefix))
}

fn subnet_contains(net: IpAddr, prefix_len: u8, ip: IpAddr) -> bool {
    match (net, ip) {
        (IpAddr::V4(net), IpAddr::V4(ip)) => {
            let shift = 32u32.saturating_sub(u32::from(prefix_len));
            if shift >= 32 {
                return true;
            }
            (u32::from(net) >> shift) == (u32::from(ip) >> shift)
        }
        (IpAddr::V6(net), IpAddr::V6(ip)) => {
            let shift = 128u32.saturating_sub(u32::from(prefix_len));
            if shift >= 128 {
                return true;
            }
            (u128::from(net) >> shift) == (u128::from(ip) >> shift)
        }
        _ => false,
    }
}

impl ConnectionGater for BlocklistGater {
    fn intercept_peer_dial(&self, peer: &PeerId) -> bool {
        !self.peers.lock().contains(peer)
    }

    fn intercept_addr_dial(&self, _peer: &PeerId, addr: &Multiaddr) -> bool {
        self.addr_allowed(addr)
    }

    fn intercept_accept(&self, _local: &Multiaddr, remote: &Multiaddr) -> bool {
        self.addr_allowed(remote)
    }

    fn intercept_secured(&self, _direction: Direction, peer: &PeerId) -> bool {
        !self.peers.lock().contains(peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::MemDatastore;

    fn ma(s: &str) -> Multiaddr {
        s.parse().unwrap()
    }

    #[test]
    fn blocked_peers_are_refused_and_persisted() {
        let datastore: Arc<dyn Datastore> = Arc::new(MemDatastore::new());
        let peer = PeerId::random();
        {
            let gater = BlocklistGater::new(datastore.clone()).unwrap();
            gater.block_peer(peer.clone()).unwrap();
            assert!(!gater.intercept_peer_dial(&peer));
        }
        let reloaded = BlocklistGater::new(datastore).unwrap();
        assert!(!reloaded.intercept_peer_dial(&peer));
        reloaded.unblock_peer(&peer).unwrap();
        assert!(reloaded.intercept_peer_dial(&peer));
    }

    #[test]
    fn blocked_addrs_and_subnets_gate_dials() {
        let gater = BlocklistGater::new(Arc::new(MemDatastore::new())).unwrap();
        let peer = PeerId::random();
        gater.block_addr("9.9.9.9".parse().unwrap()).unwrap();
        gater.block_subnet("10.1.0.0".parse().unwrap(), 16).unwrap();

        assert!(!gater.intercept_addr_dial(&peer, &ma("/ip4/9.9.9.9/tcp/1")));
        assert!(!gater.intercept_addr_dial(&peer, &ma("/ip4/10.1.200.3/tcp/1")));
        assert!(gater.intercept_addr_dial(&peer, &ma("/ip4/10.2.0.1/tcp/1")));
        assert!(gater.intercept_accept(&ma("/ip4/0.0.0.0/tcp/1"), &ma("/ip4/9.9.9.9/tcp/2")) == false);
        assert!(gater.intercept_addr_dial(&peer, &ma("/memory/4")));
    }
}
