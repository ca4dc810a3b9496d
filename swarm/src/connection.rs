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

//! A transport connection owned by the swarm, and the streams over it.

use futures::prelude::*;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use peerlink_core::muxing::{MuxerError, StreamBox, StreamMuxer};
use peerlink_core::rsrc::{ConnectionScope, StreamScope};
use peerlink_core::{Direction, Multiaddr, PeerId, ProtocolId};

/// A live multiplexed connection to one peer. Exclusively owned by the
/// swarm; users hold it through `Arc` handles.
pub struct Connection {
    id: u64,
    peer: PeerId,
    direction: Direction,
    local_addr: Multiaddr,
    remote_addr: Multiaddr,
    opened_at: Instant,
    muxer: Arc<dyn StreamMuxer>,
    scope: Box<dyn ConnectionScope>,
    stream_count: AtomicUsize,
    /// Connections admitted under pressure may be marked transient and shed
    /// first.
    transient: AtomicBool,
    closed: AtomicBool,
}

impl Connection {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: u64,
        peer: PeerId,
        direction: Direction,
        local_addr: Multiaddr,
        remote_addr: Multiaddr,
        muxer: Arc<dyn StreamMuxer>,
        scope: Box<dyn ConnectionScope>,
    ) -> Connection {
        Connection {
            id,
            peer,
            direction,
            local_addr,
            remote_addr,
            opened_at: Instant::now(),
            muxer,
            scope,
            stream_count: AtomicUsize::new(0),
            transient: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn local_addr(&self) -> &Multiaddr {
        &self.local_addr
    }

    pub fn remote_addr(&self) -> &Multiaddr {
        &self.remote_addr
    }

    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    pub fn stream_count(&self) -> usize {
        self.stream_count.load(Ordering::Relaxed)
    }

    pub fn is_transient(&self) -> bool {
        self.transient.load(Ordering::Relaxed)
    }

    pub fn set_transient(&self, transient: bool) {
        self.transient.store(transient, Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.muxer.is_closed()
    }

    /// Round-trip time of the connection's pipe.
    pub async fn ping(&self) -> Result<Duration, MuxerError> {
        self.muxer.ping().await
    }

    pub(crate) fn muxer(&self) -> &Arc<dyn StreamMuxer> {
        &self.muxer
    }

    pub(crate) fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn release_scope(&self) {
        self.scope.done();
    }

    pub(crate) fn stream_opened(self: &Arc<Self>) {
        self.stream_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn stream_dropped(&self) {
        self.stream_count.fetch_sub(1, Ordering::Relaxed);
    }

    /// Closes the underlying session; every stream on it is reset.
    pub async fn close(&self) {
        let _ = self.muxer.close().await;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("direction", &self.direction)
            .field("remote_addr", &self.remote_addr)
            .field("streams", &self.stream_count())
            .finish()
    }
}

/// A negotiated (or about-to-be-negotiated) stream handed to protocol code.
///
/// Dropping the stream releases its resource scope; the underlying muxer
/// stream resets itself if it was not cleanly closed.
pub struct SwarmStream {
    inner: StreamBox,
    conn: Arc<Connection>,
    protocol: Option<ProtocolId>,
    scope: Option<Box<dyn StreamScope>>,
}

impl SwarmStream {
    pub(crate) fn new(
        inner: StreamBox,
        conn: Arc<Connection>,
        scope: Box<dyn StreamScope>,
    ) -> SwarmStream {
        conn.stream_opened();
        SwarmStream { inner, conn, protocol: None, scope: Some(scope) }
    }

    /// The stream id within its connection's session.
    pub fn id(&self) -> u32 {
        self.inner.id()
    }

    pub fn peer(&self) -> &PeerId {
        self.conn.peer()
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// The negotiated application protocol, once selection ran.
    pub fn protocol(&self) -> Option<&ProtocolId> {
        self.protocol.as_ref()
    }

    pub(crate) fn set_protocol(&mut self, protocol: ProtocolId) {
        if let Some(scope) = &self.scope {
            scope.set_service(protocol.as_str());
        }
        self.protocol = Some(protocol);
    }

    /// Abruptly closes both halves.
    pub fn reset(&self) {
        self.inner.reset();
    }
}

impl AsyncRead for SwarmStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for SwarmStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_close(cx)
    }
}

impl Drop for SwarmStream {
    fn drop(&mut self) {
        self.conn.stream_dropped();
        if let Some(scope) = self.scope.take() {
            scope.done();
        }
    }
}

impl std::fmt::Debug for SwarmStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwarmStream")
            .field("id", &self.id())
            .field("peer", self.peer())
            .field("protocol", &self.protocol)
            .finish()
    }
}
