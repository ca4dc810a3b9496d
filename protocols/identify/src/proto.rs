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

//! The identify wire message. All fields are optional; a message may be
//! split over several length-prefixed frames, later frames typically
//! carrying only the signed peer record.

/// Mirrors the libp2p `identify.proto` schema.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Identify {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub public_key: Option<Vec<u8>>,
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub listen_addrs: Vec<Vec<u8>>,
    #[prost(string, repeated, tag = "3")]
    pub protocols: Vec<String>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub observed_addr: Option<Vec<u8>>,
    #[prost(string, optional, tag = "5")]
    pub protocol_version: Option<String>,
    #[prost(string, optional, tag = "6")]
    pub agent_version: Option<String>,
    #[prost(bytes = "vec", optional, tag = "8")]
    pub signed_peer_record: Option<Vec<u8>>,
}

impl Identify {
    /// Folds a follow-up frame into an already received message.
    pub fn merge(&mut self, other: Identify) {
        if other.public_key.is_some() {
            self.public_key = other.public_key;
        }
        self.listen_addrs.extend(other.listen_addrs);
        self.protocols.extend(other.protocols);
        if other.observed_addr.is_some() {
            self.observed_addr = other.observed_addr;
        }
        if other.protocol_version.is_some() {
            self.protocol_version = other.protocol_version;
        }
        if other.agent_version.is_some() {
            self.agent_version = other.agent_version;
        }
        if other.signed_peer_record.is_some() {
            self.signed_peer_record = other.signed_peer_record;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn merge_prefers_later_scalars_and_concatenates_lists() {
        let mut first = Identify {
            protocol_version: Some("ipfs/0.1.0".into()),
            listen_addrs: vec![vec![1]],
            protocols: vec!["/a/1".into()],
            ..Identify::default()
        };
        let second = Identify {
            listen_addrs: vec![vec![2]],
            signed_peer_record: Some(vec![9, 9]),
            ..Identify::default()
        };
        first.merge(second);
        assert_eq!(first.listen_addrs, vec![vec![1], vec![2]]);
        assert_eq!(first.signed_peer_record, Some(vec![9, 9]));
        assert_eq!(first.protocol_version.as_deref(), Some("ipfs/0.1.0"));
    }

    #[test]
    fn encoding_roundtrips() {
        let msg = Identify {
            public_key: Some(vec![1, 2, 3]),
            listen_addrs: vec![vec![4, 5]],
            protocols: vec!["/x/1".into()],
            observed_addr: Some(vec![6]),
            protocol_version: Some("ipfs/0.1.0".into()),
            agent_version: Some("erwinkok.org/libp2p".into()),
            signed_peer_record: None,
        };
        let decoded = Identify::decode(&msg.encode_to_vec()[..]).unwrap();
        assert_eq!(decoded, msg);
    }
}
