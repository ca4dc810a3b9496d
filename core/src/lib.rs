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

//! Core traits and structs of peerlink.
//!
//! The crate provides the vocabulary shared by every other crate in the
//! workspace: peer identities and keys ([`PeerId`], [`identity`]), signed
//! peer records ([`record`]), multiaddress helpers ([`addr`]), the
//! [`Transport`] and [`StreamMuxer`] abstractions the swarm drives, the
//! typed [`EventBus`], resource accounting scopes ([`rsrc`]) and the
//! [`Executor`] used to spawn background tasks without committing to a
//! particular async runtime.

pub mod addr;
pub mod bus;
pub mod executor;
pub mod gater;
pub mod identity;
pub mod muxing;
pub mod peer_id;
pub mod record;
pub mod rsrc;
pub mod time;
pub mod transport;
pub mod util;

pub use addr::MultiaddrExt;
pub use bus::EventBus;
pub use executor::Executor;
pub use gater::ConnectionGater;
pub use identity::{Keypair, PublicKey};
pub use multiaddr::{Multiaddr, Protocol};
pub use muxing::{MuxedStream, StreamMuxer};
pub use peer_id::PeerId;
pub use record::{Envelope, PeerRecord};
pub use rsrc::{ConnectionScope, ResourceManager, ResourceScope, StreamScope};
pub use time::Clock;
pub use transport::Transport;

use std::fmt;
use std::sync::Arc;

/// Direction of a connection or stream, relative to the local node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => f.write_str("inbound"),
            Direction::Outbound => f.write_str("outbound"),
        }
    }
}

/// Identifier of an application protocol spoken over a stream,
/// e.g. `/ipfs/id/1.0.0`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProtocolId(Arc<str>);

impl ProtocolId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ProtocolId {
    fn from(s: &str) -> Self {
        ProtocolId(Arc::from(s))
    }
}

impl From<String> for ProtocolId {
    fn from(s: String) -> Self {
        ProtocolId(Arc::from(s.as_str()))
    }
}

impl AsRef<str> for ProtocolId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

/// A peer together with the addresses it may be reached on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrInfo {
    pub peer_id: PeerId,
    pub addrs: Vec<Multiaddr>,
}

impl AddrInfo {
    pub fn new(peer_id: PeerId, addrs: Vec<Multiaddr>) -> Self {
        AddrInfo { peer_id, addrs }
    }

    /// Builds an `AddrInfo` from a multiaddress carrying a `/p2p/` suffix.
    pub fn try_from_addr(addr: &Multiaddr) -> Option<Self> {
        use crate::addr::MultiaddrExt as _;
        let peer_id = addr.peer_id()?;
        Some(AddrInfo { peer_id, addrs: vec![addr.without_peer_id()] })
    }
}

impl fmt::Display for AddrInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.peer_id, self.addrs)
    }
}
