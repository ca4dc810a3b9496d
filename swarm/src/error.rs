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

use peerlink_core::muxing::MuxerError;
use peerlink_core::rsrc::ResourceError;
use peerlink_core::transport::TransportError;
use peerlink_core::Multiaddr;
use thiserror::Error;

/// Failure of a dial as seen by the caller. Cloneable because concurrent
/// callers of the same dial share one result.
#[derive(Debug, Clone, Error)]
pub enum DialError {
    #[error("no addresses known for the peer")]
    NoAddresses,
    #[error("no good addresses for the peer")]
    NoGoodAddresses,
    #[error("every dial attempt timed out")]
    DialTimeout,
    #[error("the connection gater refused the dial")]
    Denied,
    #[error("all dial attempts failed: {0:?}")]
    AllAttemptsFailed(Vec<(Multiaddr, String)>),
    #[error("dialer is closed")]
    Shutdown,
}

#[derive(Debug, Error)]
pub enum SwarmError {
    #[error(transparent)]
    Dial(#[from] DialError),
    #[error(transparent)]
    Muxer(#[from] MuxerError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("none of the requested protocols is supported by the remote")]
    NoSupportedProtocol,
    #[error("protocol negotiation failed: {0}")]
    Negotiation(String),
    #[error("negotiation timed out")]
    NegotiationTimeout,
    #[error("the stream was reset")]
    Reset,
    #[error("the connection is closed")]
    ConnectionClosed,
    #[error("the swarm is shut down")]
    Shutdown,
    #[error("invalid configuration: {0}")]
    Config(String),
}
