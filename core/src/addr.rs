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

//! Helpers over [`Multiaddr`] used throughout the stack.

use multiaddr::{Multiaddr, Protocol};
use std::convert::TryFrom;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::peer_id::PeerId;

/// Address family of the leading network component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddrFamily {
    V4,
    V6,
    Dns,
    Other,
}

/// The transport an address selects, as far as dial ranking cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkProtocol {
    Tcp,
    Quic,
    QuicV1,
    WebTransport,
    Memory,
    Other,
}

/// How far away the network believes the address to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    Loopback,
    Private,
    Public,
    Unknown,
}

pub trait MultiaddrExt {
    /// The peer id in a trailing `/p2p/` component, if any.
    fn peer_id(&self) -> Option<PeerId>;

    /// Appends a `/p2p/` component unless one is already present.
    fn with_peer_id(&self, peer: &PeerId) -> Multiaddr;

    /// Strips a trailing `/p2p/` component.
    fn without_peer_id(&self) -> Multiaddr;

    /// IP-or-DNS host plus port, when the address has both.
    fn host_name(&self) -> Option<(String, u16)>;

    /// The transport tag of the address.
    fn network_protocol(&self) -> NetworkProtocol;

    /// Address family of the leading component.
    fn family(&self) -> AddrFamily;

    /// Loopback/private/public classification of the leading IP component.
    fn reachability(&self) -> Reachability;

    fn is_ipv6_link_local(&self) -> bool;

    fn is_loopback(&self) -> bool {
        self.reachability() == Reachability::Loopback
    }

    fn is_public(&self) -> bool {
        self.reachability() == Reachability::Public
    }
}

fn is_ula(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xfe00) == 0xfc00
}

fn is_link_local_v6(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xffc0) == 0xfe80
}

fn classify_v4(ip: &Ipv4Addr) -> Reachability {
    if ip.is_loopback() {
        Reachability::Loopback
    } else if ip.is_private() || ip.is_link_local() {
        Reachability::Private
    } else {
        Reachability::Public
    }
}

fn classify_v6(ip: &Ipv6Addr) -> Reachability {
    if ip.is_loopback() {
        Reachability::Loopback
    } else if is_ula(ip) || is_link_local_v6(ip) {
        Reachability::Private
    } else {
        Reachability::Public
    }
}

impl MultiaddrExt for Multiaddr {
    fn peer_id(&self) -> Option<PeerId> {
        match self.iter().last() {
            Some(Protocol::P2p(multihash)) => PeerId::try_from(multihash).ok(),
            _ => None,
        }
    }

    fn with_peer_id(&self, peer: &PeerId) -> Multiaddr {
        if self.peer_id().is_some() {
            return self.clone();
        }
        let mut addr = self.clone();
        addr.push(Protocol::P2p(peer.clone().into()));
        addr
    }

    fn without_peer_id(&self) -> Multiaddr {
        let mut addr = self.clone();
        if let Some(Protocol::P2p(_)) = addr.iter().last() {
            addr.pop();
        }
        addr
    }

    fn host_name(&self) -> Option<(String, u16)> {
        let mut host = None;
        let mut port = None;
        for proto in self.iter() {
            match proto {
                Protocol::Ip4(ip) => host = Some(ip.to_string()),
                Protocol::Ip6(ip) => host = Some(ip.to_string()),
                Protocol::Dns(h) | Protocol::Dns4(h) | Protocol::Dns6(h) | Protocol::Dnsaddr(h) => {
                    host = Some(h.to_string())
                }
                Protocol::Tcp(p) | Protocol::Udp(p) => port = Some(p),
                _ => {}
            }
        }
        Some((host?, port?))
    }

    fn network_protocol(&self) -> NetworkProtocol {
        let mut tag = NetworkProtocol::Other;
        for proto in self.iter() {
            match proto {
                Protocol::Tcp(_) => tag = NetworkProtocol::Tcp,
                Protocol::Quic => tag = NetworkProtocol::Quic,
                Protocol::QuicV1 => tag = NetworkProtocol::QuicV1,
                Protocol::WebTransport => tag = NetworkProtocol::WebTransport,
                Protocol::Memory(_) => tag = NetworkProtocol::Memory,
                _ => {}
            }
        }
        tag
    }

    fn family(&self) -> AddrFamily {
        match self.iter().next() {
            Some(Protocol::Ip4(_)) => AddrFamily::V4,
            Some(Protocol::Ip6(_)) => AddrFamily::V6,
            Some(Protocol::Dns(_))
            | Some(Protocol::Dns4(_))
            | Some(Protocol::Dns6(_))
            | Some(Protocol::Dnsaddr(_)) => AddrFamily::Dns,
            _ => AddrFamily::Other,
        }
    }

    fn reachability(&self) -> Reachability {
        match self.iter().next() {
            Some(Protocol::Ip4(ip)) => classify_v4(&ip),
            Some(Protocol::Ip6(ip)) => classify_v6(&ip),
            // The memory transport only exists inside one process.
            Some(Protocol::Memory(_)) => Reachability::Loopback,
            _ => Reachability::Unknown,
        }
    }

    fn is_ipv6_link_local(&self) -> bool {
        match self.iter().next() {
            Some(Protocol::Ip6(ip)) => is_link_local_v6(&ip),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_suffix_roundtrip() {
        let peer = PeerId::random();
        let addr: Multiaddr = "/ip4/127.0.0.1/tcp/1234".parse().unwrap();
        let with = addr.with_peer_id(&peer);
        assert_eq!(with.peer_id(), Some(peer.clone()));
        assert_eq!(with.without_peer_id(), addr);
        // Appending twice does not duplicate.
        assert_eq!(with.with_peer_id(&peer), with);
    }

    #[test]
    fn host_name_extraction() {
        let addr: Multiaddr = "/ip4/10.0.0.1/tcp/80".parse().unwrap();
        assert_eq!(addr.host_name(), Some(("10.0.0.1".to_string(), 80)));
        let addr: Multiaddr = "/dns4/example.com/tcp/443".parse().unwrap();
        assert_eq!(addr.host_name(), Some(("example.com".to_string(), 443)));
        let addr: Multiaddr = "/ip4/10.0.0.1".parse().unwrap();
        assert_eq!(addr.host_name(), None);
    }

    #[test]
    fn transport_tags() {
        let quic: Multiaddr = "/ip4/1.2.3.4/udp/1/quic-v1".parse().unwrap();
        assert_eq!(quic.network_protocol(), NetworkProtocol::QuicV1);
        let wt: Multiaddr = "/ip4/1.2.3.4/udp/1/quic-v1/webtransport".parse().unwrap();
        assert_eq!(wt.network_protocol(), NetworkProtocol::WebTransport);
        let tcp: Multiaddr = "/ip6/::1/tcp/1".parse().unwrap();
        assert_eq!(tcp.network_protocol(), NetworkProtocol::Tcp);
    }

    #[test]
    fn reachability_classes() {
        let lo: Multiaddr = "/ip4/127.0.0.1/tcp/1".parse().unwrap();
        assert_eq!(lo.reachability(), Reachability::Loopback);
        let lan: Multiaddr = "/ip4/192.168.1.10/tcp/1".parse().unwrap();
        assert_eq!(lan.reachability(), Reachability::Private);
        let ula: Multiaddr = "/ip6/fd00::1/tcp/1".parse().unwrap();
        assert_eq!(ula.reachability(), Reachability::Private);
        let pub4: Multiaddr = "/ip4/8.8.8.8/tcp/1".parse().unwrap();
        assert_eq!(pub4.reachability(), Reachability::Public);
        let ll: Multiaddr = "/ip6/fe80::1/tcp/1".parse().unwrap();
        assert!(ll.is_ipv6_link_local());
    }
}
