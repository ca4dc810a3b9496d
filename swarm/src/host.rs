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

//! The host facade: the surface user protocols program against.

use futures::prelude::*;
use log::debug;
use std::sync::Arc;

use peerlink_core::{AddrInfo, EventBus, Multiaddr, PeerId, ProtocolId};
use peerlink_multistream::NegotiationError;
use peerlink_peerstore::{Peerstore, TEMP_ADDR_TTL};

use crate::connection::{Connection, SwarmStream};
use crate::error::SwarmError;
use crate::{with_timeout, EvtLocalProtocolsUpdated, ProtocolHandler, Swarm};

/// Binds the swarm, the peerstore and the event bus into the surface seen
/// by protocols: open a stream, register a handler, connect to a peer.
#[derive(Clone)]
pub struct Host {
    swarm: Arc<Swarm>,
}

impl Host {
    pub fn new(swarm: Arc<Swarm>) -> Host {
        Host { swarm }
    }

    pub fn local_peer(&self) -> &PeerId {
        self.swarm.local_peer()
    }

    pub fn swarm(&self) -> &Arc<Swarm> {
        &self.swarm
    }

    pub fn peerstore(&self) -> &Arc<Peerstore> {
        self.swarm.peerstore()
    }

    pub fn event_bus(&self) -> &EventBus {
        self.swarm.event_bus()
    }

    /// The addresses the host is reachable on.
    pub fn addresses(&self) -> Vec<Multiaddr> {
        self.swarm.listen_addrs()
    }

    /// Stores the given addresses and makes sure a connection exists.
    pub async fn connect(&self, info: AddrInfo) -> Result<Arc<Connection>, SwarmError> {
        if !info.addrs.is_empty() {
            self.peerstore().add_addrs(&info.peer_id, info.addrs, TEMP_ADDR_TTL);
        }
        if let Some(conn) = self.swarm.connection_to(&info.peer_id) {
            return Ok(conn);
        }
        Ok(self.swarm.dial(&info.peer_id).await?)
    }

    /// Registers `handler` for inbound streams of `protocol`.
    pub fn set_stream_handler<F, Fut>(&self, protocol: ProtocolId, handler: F)
    where
        F: Fn(SwarmStream) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: ProtocolHandler = Arc::new(move |stream| handler(stream).boxed());
        self.swarm.handlers().add_handler(protocol.clone(), handler);
        self.event_bus()
            .publish(EvtLocalProtocolsUpdated { added: vec![protocol], removed: vec![] });
    }

    /// Registers `handler` with a custom match predicate over proposed
    /// protocol names.
    pub fn set_stream_handler_match<M, F, Fut>(&self, protocol: ProtocolId, matcher: M, handler: F)
    where
        M: Fn(&str) -> bool + Send + Sync + 'static,
        F: Fn(SwarmStream) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: ProtocolHandler = Arc::new(move |stream| handler(stream).boxed());
        self.swarm.handlers().add_handler_with_match(protocol.clone(), matcher, handler);
        self.event_bus()
            .publish(EvtLocalProtocolsUpdated { added: vec![protocol], removed: vec![] });
    }

    pub fn remove_stream_handler(&self, protocol: &ProtocolId) {
        self.swarm.handlers().remove_handler(protocol);
        self.event_bus()
            .publish(EvtLocalProtocolsUpdated { added: vec![], removed: vec![protocol.clone()] });
    }

    /// The protocols this host currently answers.
    pub fn protocols(&self) -> Vec<ProtocolId> {
        self.swarm.handlers().protocols()
    }

    /// Opens a stream to `peer` and negotiates one of `protocols`, in
    /// preference order. The chosen protocol is remembered in the
    /// peerstore's protocol book.
    pub async fn new_stream(
        &self,
        peer: &PeerId,
        protocols: Vec<ProtocolId>,
    ) -> Result<SwarmStream, SwarmError> {
        let mut stream = self.swarm.new_stream(peer).await?;
        let negotiation = with_timeout(
            self.swarm.config().negotiation_timeout,
            peerlink_multistream::dialer_select(&mut stream, protocols),
        )
        .await;
        let chosen = match negotiation {
            Ok(Ok(protocol)) => protocol,
            Ok(Err(NegotiationError::Failed)) => {
                stream.reset();
                return Err(SwarmError::NoSupportedProtocol);
            }
            Ok(Err(e)) => {
                stream.reset();
                return Err(SwarmError::Negotiation(e.to_string()));
            }
            Err(()) => {
                stream.reset();
                return Err(SwarmError::NegotiationTimeout);
            }
        };
        debug!("stream to {} speaks {}", peer, chosen);
        self.peerstore().protos.add_protocols(peer, vec![chosen.clone()]);
        stream.set_protocol(chosen);
        Ok(stream)
    }

    /// Closes the underlying swarm.
    pub async fn close(&self) {
        self.swarm.close().await
    }
}
