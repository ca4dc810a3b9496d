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

use parking_lot::RwLock;
use peerlink_core::ProtocolId;
use smallvec::SmallVec;

type Matcher = Box<dyn Fn(&str) -> bool + Send + Sync>;

struct Entry<H> {
    protocol: ProtocolId,
    matcher: Option<Matcher>,
    handler: H,
}

/// A registry of protocol handlers consulted during listener-side
/// negotiation.
///
/// A handler registered with a match predicate claims every proposal the
/// predicate accepts; the negotiated protocol is then the proposal itself.
pub struct MultistreamMuxer<H> {
    entries: RwLock<SmallVec<[Entry<H>; 8]>>,
}

impl<H> Default for MultistreamMuxer<H> {
    fn default() -> Self {
        MultistreamMuxer { entries: RwLock::new(SmallVec::new()) }
    }
}

impl<H> MultistreamMuxer<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for exact matches of `protocol`, replacing any
    /// previous registration of the same name.
    pub fn add_handler(&self, protocol: ProtocolId, handler: H) {
        let mut entries = self.entries.write();
        entries.retain(|e| e.protocol != protocol);
        entries.push(Entry { protocol, matcher: None, handler });
    }

    /// Registers `handler` under `protocol` with a custom match predicate.
    pub fn add_handler_with_match<F>(&self, protocol: ProtocolId, matcher: F, handler: H)
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        let mut entries = self.entries.write();
        entries.retain(|e| e.protocol != protocol);
        entries.push(Entry { protocol, matcher: Some(Box::new(matcher)), handler });
    }

    /// Removes the registration of `protocol`, if any.
    pub fn remove_handler(&self, protocol: &ProtocolId) {
        self.entries.write().retain(|e| &e.protocol != protocol);
    }

    /// The registered protocol names, in registration order.
    pub fn protocols(&self) -> Vec<ProtocolId> {
        self.entries.read().iter().map(|e| e.protocol.clone()).collect()
    }
}

impl<H: Clone> MultistreamMuxer<H> {
    /// Looks up the handler responsible for a proposed protocol name.
    pub fn find_handler(&self, name: &str) -> Option<(ProtocolId, H)> {
        let entries = self.entries.read();
        for entry in entries.iter() {
            let accepted = match &entry.matcher {
                Some(matcher) => matcher(name),
                None => entry.protocol.as_str() == name,
            };
            if accepted {
                return Some((ProtocolId::from(name), entry.handler.clone()));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_registration_wins_and_is_replaceable() {
        let muxer = MultistreamMuxer::new();
        muxer.add_handler(ProtocolId::from("/a/1"), 1u32);
        muxer.add_handler(ProtocolId::from("/a/1"), 2u32);
        assert_eq!(muxer.find_handler("/a/1").unwrap().1, 2);
        assert_eq!(muxer.protocols().len(), 1);
    }

    #[test]
    fn removal_forgets_the_protocol() {
        let muxer = MultistreamMuxer::new();
        muxer.add_handler(ProtocolId::from("/a/1"), 1u32);
        muxer.remove_handler(&ProtocolId::from("/a/1"));
        assert!(muxer.find_handler("/a/1").is_none());
        assert!(muxer.protocols().is_empty());
    }
}
