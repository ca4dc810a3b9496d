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

//! Dial coordination.
//!
//! At most one dial worker exists per peer at any instant; concurrent
//! callers of [`DialSynchronizer::dial`] attach to the worker already in
//! flight and share its result. The worker launches ranked address attempts
//! on their schedule and the first successful transport connection wins,
//! cancelling every attempt still pending.

use fnv::FnvHashMap;
use futures::channel::oneshot;
use futures::future::Shared;
use futures::prelude::*;
use futures::stream::FuturesUnordered;
use futures_timer::Delay;
use log::{debug, trace};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use peerlink_core::{Direction, Multiaddr, PeerId};

use crate::connection::Connection;
use crate::error::DialError;
use crate::ranker::{default_dial_ranker, no_delay_dial_ranker};
use crate::{with_timeout, Swarm};

type DialResult = Result<Arc<Connection>, DialError>;
type SharedDial = Shared<oneshot::Receiver<DialResult>>;

pub(crate) struct DialSynchronizer {
    workers: futures::lock::Mutex<FnvHashMap<PeerId, SharedDial>>,
    closed: AtomicBool,
}

impl DialSynchronizer {
    pub(crate) fn new() -> DialSynchronizer {
        DialSynchronizer {
            workers: futures::lock::Mutex::new(FnvHashMap::default()),
            closed: AtomicBool::new(false),
        }
    }

    /// Obtains the peer's dial worker, creating one when none is in flight,
    /// and awaits its result.
    pub(crate) async fn dial(&self, swarm: &Arc<Swarm>, peer: PeerId) -> DialResult {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DialError::Shutdown);
        }
        let shared = {
            let mut workers = self.workers.lock().await;
            match workers.get(&peer) {
                Some(shared) => {
                    trace!("attaching to the dial already in flight for {}", peer);
                    shared.clone()
                }
                None => {
                    let (tx, rx) = oneshot::channel();
                    let shared = rx.shared();
                    workers.insert(peer.clone(), shared.clone());
                    let worker_swarm = swarm.clone();
                    let worker_peer = peer.clone();
                    swarm.executor().exec_named(
                        &format!("swarm-dial({})", peer),
                        Box::pin(async move {
                            let result = dial_worker(&worker_swarm, &worker_peer).await;
                            let _ = tx.send(result);
                            worker_swarm.dialer().workers.lock().await.remove(&worker_peer);
                        }),
                    );
                    shared
                }
            }
        };
        match shared.await {
            Ok(result) => result,
            // The worker was dropped without reporting; only happens on
            // executor teardown.
            Err(_) => Err(DialError::Shutdown),
        }
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

enum AttemptOutcome {
    Connected(peerlink_core::transport::TransportConnection),
    TimedOut,
    Failed(String),
}

/// One dial worker run: resolve and rank addresses, launch the attempts on
/// their schedule, first success wins.
async fn dial_worker(swarm: &Arc<Swarm>, peer: &PeerId) -> DialResult {
    if let Some(conn) = swarm.connection_to(peer) {
        return Ok(conn);
    }
    if !swarm.gater().intercept_peer_dial(peer) {
        return Err(DialError::Denied);
    }
    let addrs = swarm.addresses_for_dial(peer).await?;
    let ranked = if swarm.config().enable_dial_ranking {
        default_dial_ranker(&addrs)
    } else {
        no_delay_dial_ranker(&addrs)
    };
    debug!("dialing {} over {} candidate addresses", peer, ranked.len());

    let per_dial_timeout = swarm.config().per_dial_timeout;
    let mut attempts: FuturesUnordered<_> = ranked
        .into_iter()
        .map(|candidate| {
            let swarm = swarm.clone();
            async move {
                if candidate.delay > Duration::from_secs(0) {
                    Delay::new(candidate.delay).await;
                }
                let outcome = attempt(&swarm, &candidate.addr, per_dial_timeout).await;
                (candidate.addr, outcome)
            }
        })
        .collect();

    let mut errors: Vec<(Multiaddr, String)> = Vec::new();
    let mut saw_hard_failure = false;
    while let Some((addr, outcome)) = attempts.next().await {
        match outcome {
            AttemptOutcome::Connected(tc) => {
                // Cancel the attempts still scheduled.
                drop(attempts);
                trace!("dial to {} won via {}", peer, addr);
                return swarm
                    .add_connection(tc, Direction::Outbound)
                    .map_err(|e| DialError::AllAttemptsFailed(vec![(addr, e.to_string())]));
            }
            AttemptOutcome::TimedOut => {
                errors.push((addr, "timed out".to_string()));
            }
            AttemptOutcome::Failed(reason) => {
                saw_hard_failure = true;
                errors.push((addr, reason));
            }
        }
    }
    if saw_hard_failure {
        Err(DialError::AllAttemptsFailed(errors))
    } else {
        Err(DialError::DialTimeout)
    }
}

async fn attempt(swarm: &Arc<Swarm>, addr: &Multiaddr, timeout: Duration) -> AttemptOutcome {
    let transport = match swarm.select_transport(addr) {
        Some(transport) => transport,
        None => return AttemptOutcome::Failed("no transport can dial this address".into()),
    };
    match with_timeout(timeout, transport.dial(addr)).await {
        Ok(Ok(tc)) => AttemptOutcome::Connected(tc),
        Ok(Err(e)) => AttemptOutcome::Failed(e.to_string()),
        Err(()) => AttemptOutcome::TimedOut,
    }
}
