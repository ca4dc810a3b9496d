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

//! Multistream-select protocol negotiation.
//!
//! Every new stream starts with a `/multistream/1.0.0` exchange in which the
//! dialer proposes application protocols one at a time and the listener
//! either echoes a proposal (accepting it) or answers `na`. The listener side
//! consults a [`MultistreamMuxer`] registry that maps protocol names, or
//! arbitrary match predicates, to handlers.

mod protocol;
mod registry;

pub use protocol::NegotiationError;
pub use registry::MultistreamMuxer;

use futures::prelude::*;
use log::{debug, trace};
use peerlink_core::ProtocolId;
use protocol::{read_message, write_message, HEADER_LINE, NA};

/// Upper bound on negotiation rounds on the listener side, so a remote
/// cannot spin us forever with `na`-bound proposals.
const MAX_PROTOCOL_ATTEMPTS: usize = 64;

/// Negotiates a protocol as the opener of the stream.
///
/// Protocols are proposed in the order given; the first one the listener
/// accepts is returned.
pub async fn dialer_select<T, I>(io: &mut T, protocols: I) -> Result<ProtocolId, NegotiationError>
where
    T: AsyncRead + AsyncWrite + Unpin,
    I: IntoIterator<Item = ProtocolId>,
{
    write_message(io, HEADER_LINE).await?;
    let header = read_message(io).await?;
    if header != HEADER_LINE {
        return Err(NegotiationError::UnexpectedMessage(header));
    }
    for protocol in protocols {
        trace!("proposing {}", protocol);
        write_message(io, protocol.as_str()).await?;
        let response = read_message(io).await?;
        if response == protocol.as_str() {
            debug!("negotiated {}", protocol);
            return Ok(protocol);
        }
        if response != NA {
            return Err(NegotiationError::UnexpectedMessage(response));
        }
    }
    Err(NegotiationError::Failed)
}

/// Negotiates a protocol as the acceptor of the stream, using the handlers
/// registered in `registry`.
pub async fn listener_select<T, H>(
    io: &mut T,
    registry: &MultistreamMuxer<H>,
) -> Result<(ProtocolId, H), NegotiationError>
where
    T: AsyncRead + AsyncWrite + Unpin,
    H: Clone,
{
    write_message(io, HEADER_LINE).await?;
    let header = read_message(io).await?;
    if header != HEADER_LINE {
        return Err(NegotiationError::UnexpectedMessage(header));
    }
    for _ in 0..MAX_PROTOCOL_ATTEMPTS {
        let proposal = read_message(io).await?;
        if proposal == "ls" {
            let listing = registry
                .protocols()
                .iter()
                .map(|p| p.as_str().to_string())
                .collect::<Vec<_>>()
                .join("\n");
            write_message(io, &listing).await?;
            continue;
        }
        match registry.find_handler(&proposal) {
            Some((protocol, handler)) => {
                write_message(io, proposal.as_str()).await?;
                debug!("negotiated {}", protocol);
                return Ok((protocol, handler));
            }
            None => {
                trace!("no handler for {}", proposal);
                write_message(io, NA).await?;
            }
        }
    }
    Err(NegotiationError::Failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use peerlink_core::transport::memory;

    fn registry(protocols: &[&str]) -> MultistreamMuxer<u32> {
        let muxer = MultistreamMuxer::new();
        for (i, p) in protocols.iter().enumerate() {
            muxer.add_handler(ProtocolId::from(*p), i as u32);
        }
        muxer
    }

    #[async_std::test]
    async fn select_first_supported() {
        let (mut a, mut b) = memory::pipe();
        let muxer = registry(&["/echo/1.0.0", "/chat/1.0.0"]);
        let dialer = dialer_select(
            &mut a,
            vec![ProtocolId::from("/chat/1.0.0"), ProtocolId::from("/echo/1.0.0")],
        );
        let listener = listener_select(&mut b, &muxer);
        let (chosen, accepted) = futures::join!(dialer, listener);
        assert_eq!(chosen.unwrap().as_str(), "/chat/1.0.0");
        let (protocol, handler) = accepted.unwrap();
        assert_eq!(protocol.as_str(), "/chat/1.0.0");
        assert_eq!(handler, 1);
    }

    #[async_std::test]
    async fn fallback_after_na() {
        let (mut a, mut b) = memory::pipe();
        let muxer = registry(&["/echo/1.0.0"]);
        let dialer = dialer_select(
            &mut a,
            vec![ProtocolId::from("/chat/1.0.0"), ProtocolId::from("/echo/1.0.0")],
        );
        let listener = listener_select(&mut b, &muxer);
        let (chosen, accepted) = futures::join!(dialer, listener);
        assert_eq!(chosen.unwrap().as_str(), "/echo/1.0.0");
        assert_eq!(accepted.unwrap().0.as_str(), "/echo/1.0.0");
    }

    #[async_std::test]
    async fn no_common_protocol_fails_the_dialer() {
        let (mut a, mut b) = memory::pipe();
        let muxer = registry(&["/kad/1.0.0"]);
        let dialer = dialer_select(&mut a, vec![ProtocolId::from("/chat/1.0.0")]);
        let listener = listener_select(&mut b, &muxer);
        let (chosen, _) = futures::join!(dialer, listener);
        assert!(matches!(chosen.unwrap_err(), NegotiationError::Failed));
    }

    #[async_std::test]
    async fn matcher_accepts_prefixed_versions() {
        let (mut a, mut b) = memory::pipe();
        let muxer = MultistreamMuxer::new();
        muxer.add_handler_with_match(
            ProtocolId::from("/sync/1"),
            |name: &str| name.starts_with("/sync/1."),
            7u32,
        );
        let dialer = dialer_select(&mut a, vec![ProtocolId::from("/sync/1.3")]);
        let listener = listener_select(&mut b, &muxer);
        let (chosen, accepted) = futures::join!(dialer, listener);
        assert_eq!(chosen.unwrap().as_str(), "/sync/1.3");
        let (protocol, handler) = accepted.unwrap();
        // The negotiated name is the dialer's proposal, not the pattern.
        assert_eq!(protocol.as_str(), "/sync/1.3");
        assert_eq!(handler, 7);
    }
}
