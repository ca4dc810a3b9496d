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

//! The minimal transport surface the swarm drives.
//!
//! A transport knows how to turn a multiaddress into an authenticated byte
//! pipe, and how to accept such pipes from a listener. Everything below that
//! (sockets, security handshakes) stays inside the transport.

pub mod memory;

use futures::future::BoxFuture;
use thiserror::Error;

use crate::muxing::Pipe;
use crate::{Multiaddr, PeerId};

/// An established, authenticated transport connection: a byte pipe plus the
/// proven identity of the remote.
pub struct TransportConnection {
    pub local_addr: Multiaddr,
    pub remote_addr: Multiaddr,
    pub remote_peer: PeerId,
    pub io: Pipe,
}

impl std::fmt::Debug for TransportConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportConnection")
            .field("local_addr", &self.local_addr)
            .field("remote_addr", &self.remote_addr)
            .field("remote_peer", &self.remote_peer)
            .finish()
    }
}

pub trait Transport: Send + Sync {
    /// Whether this transport can dial the given address.
    fn can_dial(&self, addr: &Multiaddr) -> bool;

    /// Dials `addr` and authenticates the remote.
    fn dial(&self, addr: &Multiaddr) -> BoxFuture<'static, Result<TransportConnection, TransportError>>;

    /// Starts listening on `addr`.
    fn listen_on(&self, addr: &Multiaddr) -> Result<Box<dyn Listener>, TransportError>;

    /// The transport's address resolver, when it has one (e.g. DNS).
    fn resolver(&self) -> Option<&dyn Resolver> {
        None
    }
}

/// Expands an address into the addresses it resolves to.
pub trait Resolver: Send + Sync {
    fn resolve(&self, addr: &Multiaddr) -> BoxFuture<'static, Result<Vec<Multiaddr>, TransportError>>;
}

pub trait Listener: Send {
    /// The address the listener is bound to.
    fn local_addr(&self) -> Multiaddr;

    /// Waits for the next inbound connection.
    fn accept(&mut self) -> BoxFuture<'_, Result<TransportConnection, TransportError>>;

    /// Stops listening. Pending `accept` calls fail with
    /// [`TransportError::Closed`].
    fn close(&mut self);
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("address {0} is not supported")]
    Unsupported(Multiaddr),
    #[error("connection refused at {0}")]
    ConnectionRefused(Multiaddr),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("transport is closed")]
    Closed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
