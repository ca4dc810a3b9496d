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

//! Dial address ranking.
//!
//! Candidate addresses get staggered start delays so the likeliest
//! transport wins without wasting parallel dials: the best QUIC-class
//! address starts immediately, its siblings shortly after, and TCP waits
//! for QUIC to fail first. TCP-only peers are dialed without delay.

use std::time::Duration;

use peerlink_core::addr::{AddrFamily, MultiaddrExt, NetworkProtocol};
use peerlink_core::Multiaddr;

/// Delay between the preferred QUIC address and the rest of the QUIC group.
pub const PUBLIC_QUIC_DELAY: Duration = Duration::from_millis(250);
/// Additional delay of TCP behind the QUIC group.
pub const PUBLIC_TCP_DELAY: Duration = Duration::from_millis(250);

/// A dial candidate and when to launch it, relative to the start of the
/// dial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressDelay {
    pub addr: Multiaddr,
    pub delay: Duration,
}

/// Every address starts immediately. Used when ranking is disabled.
pub fn no_delay_dial_ranker(addrs: &[Multiaddr]) -> Vec<AddressDelay> {
    addrs
        .iter()
        .map(|addr| AddressDelay { addr: addr.clone(), delay: Duration::from_secs(0) })
        .collect()
}

/// The default ranking described in the module docs.
pub fn default_dial_ranker(addrs: &[Multiaddr]) -> Vec<AddressDelay> {
    let mut quic = Vec::new();
    let mut webtransport = Vec::new();
    let mut tcp = Vec::new();
    let mut immediate = Vec::new();

    for addr in addrs {
        match addr.network_protocol() {
            NetworkProtocol::Quic | NetworkProtocol::QuicV1 => quic.push(addr.clone()),
            NetworkProtocol::WebTransport => webtransport.push(addr.clone()),
            NetworkProtocol::Tcp => tcp.push(addr.clone()),
            _ => immediate.push(addr.clone()),
        }
    }

    // Inside the QUIC group, quic-v1 beats draft-29 and IPv6 beats IPv4.
    quic.sort_by_key(|addr| {
        let version = match addr.network_protocol() {
            NetworkProtocol::QuicV1 => 0u8,
            _ => 1,
        };
        let family = match addr.family() {
            AddrFamily::V6 => 0u8,
            AddrFamily::V4 => 1,
            _ => 2,
        };
        (version, family)
    });

    let mut ranked: Vec<AddressDelay> = immediate
        .into_iter()
        .map(|addr| AddressDelay { addr, delay: Duration::from_secs(0) })
        .collect();

    let have_quic = !quic.is_empty() || !webtransport.is_empty();
    for (i, addr) in quic.into_iter().enumerate() {
        let delay = if i == 0 { Duration::from_secs(0) } else { PUBLIC_QUIC_DELAY };
        ranked.push(AddressDelay { addr, delay });
    }
    // WebTransport duplicates the QUIC stack, so it waits behind both.
    for addr in webtransport {
        ranked.push(AddressDelay { addr, delay: 2 * PUBLIC_QUIC_DELAY });
    }
    let tcp_delay = if have_quic {
        PUBLIC_QUIC_DELAY + PUBLIC_TCP_DELAY
    } else {
        Duration::from_secs(0)
    };
    for addr in tcp {
        ranked.push(AddressDelay { addr, delay: tcp_delay });
    }

    ranked.sort_by_key(|ad| ad.delay);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ma(s: &str) -> Multiaddr {
        s.parse().unwrap()
    }

    fn delay_of(ranked: &[AddressDelay], addr: &Multiaddr) -> Duration {
        ranked.iter().find(|ad| &ad.addr == addr).expect("address was ranked").delay
    }

    #[test]
    fn mixed_stack_is_staggered() {
        let tcp = ma("/ip4/1.2.3.4/tcp/1");
        let quic6 = ma("/ip6/2001:db8::1/udp/1/quic-v1");
        let quic4 = ma("/ip4/1.2.3.4/udp/2/quic-v1");
        let wt = ma("/ip4/1.2.3.4/udp/1/quic-v1/webtransport");
        let ranked =
            default_dial_ranker(&[tcp.clone(), quic6.clone(), quic4.clone(), wt.clone()]);

        assert_eq!(delay_of(&ranked, &quic6), Duration::from_millis(0));
        assert_eq!(delay_of(&ranked, &quic4), Duration::from_millis(250));
        assert_eq!(delay_of(&ranked, &wt), Duration::from_millis(500));
        assert_eq!(delay_of(&ranked, &tcp), Duration::from_millis(500));
    }

    #[test]
    fn tcp_only_peers_are_not_delayed() {
        let a = ma("/ip4/1.2.3.4/tcp/1");
        let b = ma("/ip6/2001:db8::1/tcp/1");
        let ranked = default_dial_ranker(&[a.clone(), b.clone()]);
        assert!(ranked.iter().all(|ad| ad.delay == Duration::from_secs(0)));
        assert_eq!(ranked.len(), 2);
    }

    #[test]
    fn quic_v1_wins_over_draft_quic() {
        let draft = ma("/ip4/1.2.3.4/udp/1/quic");
        let v1 = ma("/ip4/1.2.3.4/udp/2/quic-v1");
        let ranked = default_dial_ranker(&[draft.clone(), v1.clone()]);
        assert_eq!(delay_of(&ranked, &v1), Duration::from_millis(0));
        assert_eq!(delay_of(&ranked, &draft), Duration::from_millis(250));
    }

    #[test]
    fn no_delay_ranker_levels_everything() {
        let addrs =
            vec![ma("/ip4/1.2.3.4/tcp/1"), ma("/ip4/1.2.3.4/udp/1/quic-v1"), ma("/memory/3")];
        let ranked = no_delay_dial_ranker(&addrs);
        assert!(ranked.iter().all(|ad| ad.delay == Duration::from_secs(0)));
    }

    #[test]
    fn memory_addresses_start_immediately() {
        let mem = ma("/memory/7");
        let quic = ma("/ip4/1.2.3.4/udp/1/quic-v1");
        let ranked = default_dial_ranker(&[mem.clone(), quic.clone()]);
        assert_eq!(delay_of(&ranked, &mem), Duration::from_secs(0));
        assert_eq!(delay_of(&ranked, &quic), Duration::from_secs(0));
    }
}
