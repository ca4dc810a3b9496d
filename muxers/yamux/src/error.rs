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
use thiserror::Error;

/// Error while decoding a frame off the wire. Always fatal to the session.
#[derive(Debug, Error)]
pub enum FrameDecodeError {
    #[error("unknown frame version {0}")]
    InvalidVersion(u8),
    #[error("unknown frame type {0}")]
    InvalidType(u8),
    #[error("frame body of {0} bytes exceeds the maximum message size")]
    OversizedBody(u32),
    #[error("go-away frame carries stream id {0}")]
    NonZeroGoAwayStream(u32),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Session-level error.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The session was closed locally; subsequent operations fail with this.
    #[error("session is shut down")]
    SessionShutdown,
    /// The remote announced it is going away; no new streams can be opened.
    #[error("remote is going away")]
    RemoteGoAway,
    #[error("keep-alive timed out")]
    KeepAliveTimeout,
    #[error("write to the session pipe timed out")]
    WriteTimeout,
    #[error("ping timed out")]
    PingTimeout,
    #[error("too many inbound streams")]
    TooManyStreams,
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error(transparent)]
    Decode(#[from] FrameDecodeError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<ConnectionError> for MuxerError {
    fn from(e: ConnectionError) -> MuxerError {
        match e {
            ConnectionError::SessionShutdown => MuxerError::SessionShutdown,
            ConnectionError::RemoteGoAway => MuxerError::RemoteGoAway,
            ConnectionError::KeepAliveTimeout => MuxerError::KeepAliveTimeout,
            ConnectionError::WriteTimeout | ConnectionError::PingTimeout => MuxerError::Timeout,
            ConnectionError::TooManyStreams => MuxerError::TooManyStreams,
            ConnectionError::Protocol(msg) => MuxerError::Protocol(msg),
            ConnectionError::Decode(e) => MuxerError::Protocol(e.to_string()),
            ConnectionError::Io(e) => MuxerError::Io(e),
        }
    }
}

/// Configuration rejected at construction.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("initial stream window must be between 64 KiB and the maximum window")]
    InvalidWindow,
    #[error("maximum message size must be non-zero")]
    InvalidMessageSize,
    #[error("accept backlog must be non-zero")]
    InvalidBacklog,
    #[error("maximum incoming stream count must be non-zero")]
    InvalidStreamLimit,
}
