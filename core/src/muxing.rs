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

//! The stream multiplexer abstraction the swarm drives.

use futures::future::BoxFuture;
use futures::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::executor::Executor;
use crate::Direction;

/// An ordered byte pipe with backpressure.
pub trait AsyncIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncIo for T {}

/// A boxed byte pipe, as handed from the transport to the multiplexer.
pub type Pipe = Box<dyn AsyncIo>;

/// A logical stream obtained from a [`StreamMuxer`].
///
/// Closing the write half (`poll_close`) half-closes the stream; the read
/// half stays usable until the remote closes its side. [`MuxedStream::reset`]
/// tears down both halves immediately.
pub trait MuxedStream: AsyncRead + AsyncWrite + Send + Unpin {
    /// The stream id within its session.
    fn id(&self) -> u32;

    /// Abruptly closes both halves of the stream.
    fn reset(&self);
}

pub type StreamBox = Box<dyn MuxedStream>;

/// A live multiplexing session over one byte pipe.
pub trait StreamMuxer: Send + Sync {
    /// Opens a new outbound stream.
    fn open_stream(&self) -> BoxFuture<'static, Result<StreamBox, MuxerError>>;

    /// Waits for the next inbound stream.
    fn accept_stream(&self) -> BoxFuture<'static, Result<StreamBox, MuxerError>>;

    /// Measures the round-trip time of the session pipe. Concurrent callers
    /// share a single in-flight ping.
    fn ping(&self) -> BoxFuture<'static, Result<Duration, MuxerError>>;

    /// Closes the session, resetting all streams.
    fn close(&self) -> BoxFuture<'static, Result<(), MuxerError>>;

    fn is_closed(&self) -> bool;
}

/// Builds a [`StreamMuxer`] over a freshly established transport pipe.
pub trait Multiplexer: Send + Sync {
    fn upgrade(
        &self,
        io: Pipe,
        direction: Direction,
        executor: Arc<dyn Executor>,
    ) -> Arc<dyn StreamMuxer>;
}

/// Errors surfaced by a multiplexing session.
#[derive(Debug, Error)]
pub enum MuxerError {
    #[error("session is shut down")]
    SessionShutdown,
    #[error("remote is going away")]
    RemoteGoAway,
    #[error("stream was reset")]
    StreamReset,
    #[error("keep-alive timed out")]
    KeepAliveTimeout,
    #[error("operation timed out")]
    Timeout,
    #[error("too many inbound streams")]
    TooManyStreams,
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
