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

//! An in-process transport over `/memory/<port>` addresses.
//!
//! Connections are pairs of unbounded channels wrapped into byte pipes.
//! Peers authenticate by exchanging their peer ids in a single
//! length-prefixed frame each way, which is enough because peerlink ids
//! inline the public key.

use fnv::FnvHashMap;
use futures::channel::mpsc;
use futures::future::BoxFuture;
use futures::prelude::*;
use lazy_static::lazy_static;
use multiaddr::Protocol;
use parking_lot::Mutex;
use rw_stream_sink::RwStreamSink;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use super::{Listener, Transport, TransportConnection, TransportError};
use crate::addr::MultiaddrExt;
use crate::util::{read_length_prefixed, write_length_prefixed};
use crate::{Multiaddr, PeerId};

/// A peer-id handshake frame is a multihash; cap it generously.
const MAX_HANDSHAKE_FRAME: usize = 128;

lazy_static! {
    static ref HUB: Mutex<FnvHashMap<u64, mpsc::UnboundedSender<Incoming>>> =
        Mutex::new(FnvHashMap::default());
}

struct Incoming {
    chan: Chan,
    dialer_addr: Multiaddr,
}

/// One end of an in-memory connection.
pub struct Chan {
    incoming: mpsc::UnboundedReceiver<Vec<u8>>,
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
}

impl Chan {
    pub fn pair() -> (Chan, Chan) {
        let (a_tx, a_rx) = mpsc::unbounded();
        let (b_tx, b_rx) = mpsc::unbounded();
        (Chan { incoming: a_rx, outgoing: b_tx }, Chan { incoming: b_rx, outgoing: a_tx })
    }
}

impl Stream for Chan {
    type Item = Result<Vec<u8>, io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.incoming.poll_next_unpin(cx).map(|item| item.map(Ok))
    }
}

impl Sink<Vec<u8>> for Chan {
    type Error = io::Error;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        self.outgoing
            .poll_ready(cx)
            .map_err(|_| io::ErrorKind::BrokenPipe.into())
    }

    fn start_send(mut self: Pin<&mut Self>, item: Vec<u8>) -> Result<(), io::Error> {
        self.outgoing
            .start_send(item)
            .map_err(|_| io::ErrorKind::BrokenPipe.into())
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        self.get_mut().outgoing.close_channel();
        Poll::Ready(Ok(()))
    }
}

/// An anonymous in-process byte pipe pair, without any addressing or
/// handshake. Useful wherever a test needs two connected ends.
pub fn pipe() -> (crate::muxing::Pipe, crate::muxing::Pipe) {
    let (a, b) = Chan::pair();
    (Box::new(RwStreamSink::new(a)), Box::new(RwStreamSink::new(b)))
}

fn memory_port(addr: &Multiaddr) -> Option<u64> {
    addr.iter().find_map(|p| match p {
        Protocol::Memory(port) => Some(port),
        _ => None,
    })
}

fn memory_addr(port: u64) -> Multiaddr {
    let mut addr = Multiaddr::empty();
    addr.push(Protocol::Memory(port));
    addr
}

pub struct MemoryTransport {
    local_peer: PeerId,
}

impl MemoryTransport {
    pub fn new(local_peer: PeerId) -> MemoryTransport {
        MemoryTransport { local_peer }
    }
}

impl Transport for MemoryTransport {
    fn can_dial(&self, addr: &Multiaddr) -> bool {
        memory_port(addr).is_some()
    }

    fn dial(&self, addr: &Multiaddr) -> BoxFuture<'static, Result<TransportConnection, TransportError>> {
        let addr = addr.clone();
        let local_peer = self.local_peer.clone();
        async move {
            let port = match memory_port(&addr) {
                Some(port) if port != 0 => port,
                _ => return Err(TransportError::Unsupported(addr)),
            };
            let expected_peer = addr.peer_id();
            let (chan, remote_chan) = Chan::pair();
            let dialer_addr = memory_addr(rand::random::<u64>() | 1);
            {
                let hub = HUB.lock();
                let listener = hub
                    .get(&port)
                    .ok_or_else(|| TransportError::ConnectionRefused(addr.clone()))?;
                listener
                    .unbounded_send(Incoming { chan: remote_chan, dialer_addr: dialer_addr.clone() })
                    .map_err(|_| TransportError::ConnectionRefused(addr.clone()))?;
            }
            let mut io = RwStreamSink::new(chan);
            let remote_peer = exchange_ids(&mut io, &local_peer).await?;
            if let Some(expected) = expected_peer {
                if expected != remote_peer {
                    return Err(TransportError::Handshake(format!(
                        "remote identified as {} but {} was expected",
                        remote_peer, expected
                    )));
                }
            }
            Ok(TransportConnection {
                local_addr: dialer_addr,
                remote_addr: addr.without_peer_id(),
                remote_peer,
                io: Box::new(io),
            })
        }
        .boxed()
    }

    fn listen_on(&self, addr: &Multiaddr) -> Result<Box<dyn Listener>, TransportError> {
        let mut port = memory_port(addr).ok_or_else(|| TransportError::Unsupported(addr.clone()))?;
        let (tx, rx) = mpsc::unbounded();
        {
            let mut hub = HUB.lock();
            if port == 0 {
                loop {
                    port = rand::random::<u64>() | 1;
                    if !hub.contains_key(&port) {
                        break;
                    }
                }
            } else if hub.contains_key(&port) {
                return Err(TransportError::Unsupported(addr.clone()));
            }
            hub.insert(port, tx);
        }
        Ok(Box::new(MemoryListener {
            port,
            incoming: rx,
            local_peer: self.local_peer.clone(),
            closed: false,
        }))
    }
}

pub struct MemoryListener {
    port: u64,
    incoming: mpsc::UnboundedReceiver<Incoming>,
    local_peer: PeerId,
    closed: bool,
}

impl Listener for MemoryListener {
    fn local_addr(&self) -> Multiaddr {
        memory_addr(self.port)
    }

    fn accept(&mut self) -> BoxFuture<'_, Result<TransportConnection, TransportError>> {
        async move {
            if self.closed {
                return Err(TransportError::Closed);
            }
            let next = self.incoming.next().await.ok_or(TransportError::Closed)?;
            let mut io = RwStreamSink::new(next.chan);
            let remote_peer = exchange_ids(&mut io, &self.local_peer).await?;
            Ok(TransportConnection {
                local_addr: memory_addr(self.port),
                remote_addr: next.dialer_addr,
                remote_peer,
                io: Box::new(io),
            })
        }
        .boxed()
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            HUB.lock().remove(&self.port);
            self.incoming.close();
        }
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        self.close()
    }
}

/// Writes our peer id, reads the remote's.
async fn exchange_ids<T>(io: &mut T, local_peer: &PeerId) -> Result<PeerId, TransportError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    write_length_prefixed(io, local_peer.to_bytes()).await?;
    io.flush().await?;
    let bytes = read_length_prefixed(io, MAX_HANDSHAKE_FRAME).await?;
    PeerId::from_bytes(&bytes)
        .map_err(|e| TransportError::Handshake(format!("invalid peer id: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected_pair() -> (PeerId, PeerId, Multiaddr) {
        (PeerId::random(), PeerId::random(), "/memory/0".parse().unwrap())
    }

    #[async_std::test]
    async fn dial_and_accept_exchange_ids() {
        let (peer_a, peer_b, listen) = connected_pair();
        let transport_a = MemoryTransport::new(peer_a.clone());
        let transport_b = MemoryTransport::new(peer_b.clone());

        let mut listener = transport_b.listen_on(&listen).unwrap();
        let listen_addr = listener.local_addr();

        let dial = transport_a.dial(&listen_addr);
        let accept = listener.accept();
        let (dialed, accepted) = futures::join!(dial, accept);
        let dialed = dialed.unwrap();
        let accepted = accepted.unwrap();

        assert_eq!(dialed.remote_peer, peer_b);
        assert_eq!(accepted.remote_peer, peer_a);
        assert_eq!(dialed.remote_addr, listen_addr);
        assert_eq!(accepted.remote_addr, dialed.local_addr);
    }

    #[async_std::test]
    async fn data_flows_both_ways() {
        let (peer_a, peer_b, listen) = connected_pair();
        let transport_a = MemoryTransport::new(peer_a);
        let transport_b = MemoryTransport::new(peer_b);

        let mut listener = transport_b.listen_on(&listen).unwrap();
        let listen_addr = listener.local_addr();

        let (dialed, accepted) =
            futures::join!(transport_a.dial(&listen_addr), listener.accept());
        let mut a = dialed.unwrap().io;
        let mut b = accepted.unwrap().io;

        a.write_all(b"ping").await.unwrap();
        a.flush().await.unwrap();
        let mut buf = [0u8; 4];
        b.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        b.write_all(b"pong").await.unwrap();
        b.flush().await.unwrap();
        a.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[async_std::test]
    async fn dialing_an_unbound_port_is_refused() {
        let transport = MemoryTransport::new(PeerId::random());
        let err = transport.dial(&"/memory/1".parse().unwrap()).await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionRefused(_)));
    }

    #[async_std::test]
    async fn dial_rejects_wrong_peer_id_suffix() {
        let (peer_a, peer_b, listen) = connected_pair();
        let transport_a = MemoryTransport::new(peer_a);
        let transport_b = MemoryTransport::new(peer_b);

        let mut listener = transport_b.listen_on(&listen).unwrap();
        let wrong = listener.local_addr().with_peer_id(&PeerId::random());

        let (dialed, _) = futures::join!(transport_a.dial(&wrong), listener.accept());
        assert!(matches!(dialed.unwrap_err(), TransportError::Handshake(_)));
    }
}
