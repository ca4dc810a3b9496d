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

//! Connection gating.
//!
//! The swarm consults the gater at each interception point and aborts the
//! connection attempt when any of them returns `false`. Policy (blocklists
//! and the like) lives behind this trait.

use crate::{Direction, Multiaddr, PeerId};

pub trait ConnectionGater: Send + Sync {
    /// Called before any dial to `peer` is attempted.
    fn intercept_peer_dial(&self, _peer: &PeerId) -> bool {
        true
    }

    /// Called for each candidate address of an outgoing dial.
    fn intercept_addr_dial(&self, _peer: &PeerId, _addr: &Multiaddr) -> bool {
        true
    }

    /// Called when an inbound connection is accepted, before any handshake.
    fn intercept_accept(&self, _local: &Multiaddr, _remote: &Multiaddr) -> bool {
        true
    }

    /// Called once the remote's identity is known.
    fn intercept_secured(&self, _direction: Direction, _peer: &PeerId) -> bool {
        true
    }
}

/// The default gater: everything is allowed.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl ConnectionGater for AllowAll {}
