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

//! Peerlink is a modular peer-to-peer networking stack.
//!
//! A [`Host`] talks to remote peers over pluggable transports, multiplexes
//! logical streams over each connection with a yamux-style framing layer,
//! exchanges identity metadata through the identify protocol, and remembers
//! per-peer state in a TTL-indexed [`Peerstore`].
//!
//! [`HostBuilder`] assembles the pieces:
//!
//! ```no_run
//! use peerlink::HostBuilder;
//!
//! # async fn run() {
//! let keypair = peerlink::identity::Keypair::generate_ed25519();
//! let (host, _identify) = HostBuilder::new(keypair).build().unwrap();
//! let addr = host.swarm().listen_on(&"/memory/0".parse().unwrap()).unwrap();
//! println!("listening on {}", addr);
//! # }
//! ```

pub use peerlink_core as core;
pub use peerlink_identify as identify_service;
pub use peerlink_multistream as multistream;
pub use peerlink_peerstore as peerstore;
pub use peerlink_swarm as swarm;
pub use peerlink_yamux as yamux;

pub use multiaddr::Multiaddr;
pub use peerlink_core::identity;
pub use peerlink_core::{AddrInfo, Direction, EventBus, Executor, PeerId, ProtocolId};
pub use peerlink_identify::{IdService, IdentifyConfig};
pub use peerlink_peerstore::{Peerstore, PeerstoreConfig};
pub use peerlink_swarm::{
    Connection, DialError, Host, Swarm, SwarmBuilder, SwarmConfig, SwarmError, SwarmStream,
};
pub use peerlink_yamux::YamuxConfig;

use std::sync::Arc;

use peerlink_core::gater::ConnectionGater;
use peerlink_core::identity::Keypair;
use peerlink_core::transport::memory::MemoryTransport;
use peerlink_core::transport::Transport;
use peerlink_core::ResourceManager;
use peerlink_peerstore::MemDatastore;

/// Assembles a [`Host`] with an identify service from a keypair and
/// whatever pieces the caller overrides. Defaults: in-memory peerstore,
/// the in-process memory transport, yamux, no resource limits.
pub struct HostBuilder {
    keypair: Keypair,
    swarm_config: SwarmConfig,
    yamux_config: YamuxConfig,
    identify_config: IdentifyConfig,
    peerstore: Option<Arc<Peerstore>>,
    transports: Vec<Arc<dyn Transport>>,
    executor: Option<Arc<dyn Executor>>,
    gater: Option<Arc<dyn ConnectionGater>>,
    resource_manager: Option<Arc<dyn ResourceManager>>,
}

impl HostBuilder {
    pub fn new(keypair: Keypair) -> HostBuilder {
        HostBuilder {
            keypair,
            swarm_config: SwarmConfig::default(),
            yamux_config: YamuxConfig::default(),
            identify_config: IdentifyConfig::default(),
            peerstore: None,
            transports: Vec::new(),
            executor: None,
            gater: None,
            resource_manager: None,
        }
    }

    pub fn swarm_config(mut self, config: SwarmConfig) -> Self {
        self.swarm_config = config;
        self
    }

    pub fn yamux_config(mut self, config: YamuxConfig) -> Self {
        self.yamux_config = config;
        self
    }

    pub fn identify_config(mut self, config: IdentifyConfig) -> Self {
        self.identify_config = config;
        self
    }

    pub fn peerstore(mut self, peerstore: Arc<Peerstore>) -> Self {
        self.peerstore = Some(peerstore);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transports.push(transport);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn gater(mut self, gater: Arc<dyn ConnectionGater>) -> Self {
        self.gater = Some(gater);
        self
    }

    pub fn resource_manager(mut self, manager: Arc<dyn ResourceManager>) -> Self {
        self.resource_manager = Some(manager);
        self
    }

    pub fn build(self) -> Result<(Host, Arc<IdService>), SwarmError> {
        self.yamux_config
            .validate()
            .map_err(|e| SwarmError::Config(e.to_string()))?;
        let local_peer = self.keypair.public().to_peer_id();
        let peerstore = match self.peerstore {
            Some(peerstore) => peerstore,
            None => Arc::new(
                Peerstore::new(Arc::new(MemDatastore::new()), PeerstoreConfig::default())
                    .map_err(|e| SwarmError::Config(e.to_string()))?,
            ),
        };

        let mut builder = SwarmBuilder::new(local_peer.clone(), peerstore)
            .config(self.swarm_config)
            .multiplexer(Arc::new(self.yamux_config));
        if self.transports.is_empty() {
            builder = builder.transport(Arc::new(MemoryTransport::new(local_peer)));
        }
        for transport in self.transports {
            builder = builder.transport(transport);
        }
        if let Some(executor) = self.executor {
            builder = builder.executor(executor);
        }
        if let Some(gater) = self.gater {
            builder = builder.gater(gater);
        }
        if let Some(manager) = self.resource_manager {
            builder = builder.resource_manager(manager);
        }

        let host = Host::new(builder.build()?);
        let identify = IdService::new(host.clone(), self.keypair, self.identify_config);
        Ok((host, identify))
    }
}
