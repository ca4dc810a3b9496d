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

//! Wire messages of multistream-select.
//!
//! A message is an unsigned-varint length prefix followed by the message
//! text and a trailing newline; the length covers the newline.

use futures::prelude::*;
use peerlink_core::util::{read_length_prefixed, write_length_prefixed};
use thiserror::Error;

pub const HEADER_LINE: &str = "/multistream/1.0.0";
pub const NA: &str = "na";

/// Messages are protocol names plus `ls` listings; anything bigger than
/// this is not a negotiation.
const MAX_MESSAGE_LEN: usize = 1024;

pub async fn write_message<T>(io: &mut T, message: &str) -> Result<(), NegotiationError>
where
    T: AsyncWrite + Unpin,
{
    let mut framed = Vec::with_capacity(message.len() + 1);
    framed.extend_from_slice(message.as_bytes());
    framed.push(b'\n');
    write_length_prefixed(io, framed).await?;
    io.flush().await?;
    Ok(())
}

pub async fn read_message<T>(io: &mut T) -> Result<String, NegotiationError>
where
    T: AsyncRead + Unpin,
{
    let mut frame = read_length_prefixed(io, MAX_MESSAGE_LEN).await?;
    if frame.pop() != Some(b'\n') {
        return Err(NegotiationError::InvalidMessage);
    }
    String::from_utf8(frame).map_err(|_| NegotiationError::InvalidMessage)
}

#[derive(Debug, Error)]
pub enum NegotiationError {
    /// All proposed protocols were refused, or the listener gave up on the
    /// dialer's proposals.
    #[error("no protocol could be agreed upon")]
    Failed,
    #[error("received a message that is not part of the negotiation: {0:?}")]
    UnexpectedMessage(String),
    #[error("malformed negotiation message")]
    InvalidMessage,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use std::io::Cursor;

    #[test]
    fn message_roundtrip() {
        block_on(async {
            let mut buf = Vec::new();
            write_message(&mut buf, "/proto/1.0.0").await.unwrap();
            let got = read_message(&mut Cursor::new(buf)).await.unwrap();
            assert_eq!(got, "/proto/1.0.0");
        })
    }

    #[test]
    fn missing_newline_is_invalid() {
        block_on(async {
            let mut buf = Vec::new();
            peerlink_core::util::write_length_prefixed(&mut buf, b"/proto/1.0.0").await.unwrap();
            let err = read_message(&mut Cursor::new(buf)).await.unwrap_err();
            assert!(matches!(err, NegotiationError::InvalidMessage));
        })
    }
}
