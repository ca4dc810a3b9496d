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

//! Signed envelopes and the peer record they usually carry.
//!
//! An [`Envelope`] is a domain-separated, signed container over an opaque
//! payload. A [`PeerRecord`] binds a peer id to a set of addresses and a
//! monotonically increasing sequence number; identify exchanges it inside an
//! envelope so third parties can relay addresses without being able to forge
//! them.

use multiaddr::Multiaddr;
use prost::Message;
use thiserror::Error;
use unsigned_varint::encode as varint;

use crate::identity::{Keypair, PublicKey};
use crate::peer_id::PeerId;

/// Signature domain for peer records.
pub const PEER_RECORD_DOMAIN: &str = "libp2p-peer-record";
/// Multicodec payload type for peer records.
pub const PEER_RECORD_PAYLOAD_TYPE: &[u8] = &[0x03, 0x01];

/// A signed, domain-separated container over a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    public_key: PublicKey,
    payload_type: Vec<u8>,
    payload: Vec<u8>,
    signature: Vec<u8>,
}

impl Envelope {
    /// Signs `payload` under `domain` and wraps it.
    pub fn seal(
        keypair: &Keypair,
        domain: &str,
        payload_type: Vec<u8>,
        payload: Vec<u8>,
    ) -> Result<Envelope, RecordError> {
        let unsigned = signed_buffer(domain, &payload_type, &payload);
        let signature = keypair.sign(&unsigned).map_err(|e| RecordError::Signing(e.to_string()))?;
        Ok(Envelope { public_key: keypair.public(), payload_type, payload, signature })
    }

    /// Checks the signature under `domain`. Returns the payload on success.
    pub fn payload(&self, domain: &str, payload_type: &[u8]) -> Result<&[u8], RecordError> {
        if self.payload_type != payload_type {
            return Err(RecordError::UnexpectedPayloadType);
        }
        let unsigned = signed_buffer(domain, &self.payload_type, &self.payload);
        if !self.public_key.verify(&unsigned, &self.signature) {
            return Err(RecordError::InvalidSignature);
        }
        Ok(&self.payload)
    }

    /// The key that produced the signature.
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Peer id of the signing key.
    pub fn peer_id(&self) -> PeerId {
        self.public_key.to_peer_id()
    }

    pub fn to_protobuf_encoding(&self) -> Vec<u8> {
        proto::Envelope {
            public_key: self.public_key.to_protobuf_encoding(),
            payload_type: self.payload_type.clone(),
            payload: self.payload.clone(),
            signature: self.signature.clone(),
        }
        .encode_to_vec()
    }

    /// Decodes an envelope. The signature is *not* checked here; use
    /// [`Envelope::payload`].
    pub fn from_protobuf_encoding(bytes: &[u8]) -> Result<Envelope, RecordError> {
        let msg = proto::Envelope::decode(bytes)?;
        let public_key = PublicKey::from_protobuf_encoding(&msg.public_key)
            .map_err(|e| RecordError::InvalidKey(e.to_string()))?;
        Ok(Envelope {
            public_key,
            payload_type: msg.payload_type,
            payload: msg.payload,
            signature: msg.signature,
        })
    }
}

/// The buffer that is actually signed: each of domain, payload type and
/// payload, length-prefixed with an unsigned varint.
fn signed_buffer(domain: &str, payload_type: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(domain.len() + payload_type.len() + payload.len() + 12);
    let mut buf = varint::usize_buffer();
    for part in &[domain.as_bytes(), payload_type, payload] {
        out.extend_from_slice(varint::usize(part.len(), &mut buf));
        out.extend_from_slice(part);
    }
    out
}

/// A record binding a peer id to addresses under a sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub peer_id: PeerId,
    pub seq: u64,
    pub addresses: Vec<Multiaddr>,
}

impl PeerRecord {
    pub fn new(peer_id: PeerId, seq: u64, addresses: Vec<Multiaddr>) -> PeerRecord {
        PeerRecord { peer_id, seq, addresses }
    }

    /// Signs the record into an envelope. Fails when the keypair does not
    /// belong to the record's peer.
    pub fn seal(&self, keypair: &Keypair) -> Result<Envelope, RecordError> {
        if keypair.public().to_peer_id() != self.peer_id {
            return Err(RecordError::PeerIdMismatch);
        }
        let payload = proto::PeerRecord {
            peer_id: self.peer_id.to_bytes(),
            seq: self.seq,
            addresses: self
                .addresses
                .iter()
                .map(|a| proto::AddressInfo { multiaddr: a.to_vec() })
                .collect(),
        }
        .encode_to_vec();
        Envelope::seal(keypair, PEER_RECORD_DOMAIN, PEER_RECORD_PAYLOAD_TYPE.to_vec(), payload)
    }

    /// Verifies the envelope and extracts the record. The record's peer id
    /// must match the envelope's signing key.
    pub fn from_envelope(envelope: &Envelope) -> Result<PeerRecord, RecordError> {
        let payload = envelope.payload(PEER_RECORD_DOMAIN, PEER_RECORD_PAYLOAD_TYPE)?;
        let msg = proto::PeerRecord::decode(payload)?;
        let peer_id =
            PeerId::from_bytes(&msg.peer_id).map_err(|_| RecordError::MalformedRecord)?;
        if peer_id != envelope.peer_id() {
            return Err(RecordError::PeerIdMismatch);
        }
        let mut addresses = Vec::with_capacity(msg.addresses.len());
        for info in msg.addresses {
            match Multiaddr::try_from(info.multiaddr) {
                Ok(addr) => addresses.push(addr),
                Err(_) => return Err(RecordError::MalformedRecord),
            }
        }
        Ok(PeerRecord { peer_id, seq: msg.seq, addresses })
    }
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("envelope signature does not verify")]
    InvalidSignature,
    #[error("envelope carries an unexpected payload type")]
    UnexpectedPayloadType,
    #[error("record peer id does not match the signing key")]
    PeerIdMismatch,
    #[error("malformed record payload")]
    MalformedRecord,
    #[error("invalid key in envelope: {0}")]
    InvalidKey(String),
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("protobuf: {0}")]
    Protobuf(#[from] prost::DecodeError),
}

mod proto {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Envelope {
        #[prost(bytes = "vec", tag = "1")]
        pub public_key: Vec<u8>,
        #[prost(bytes = "vec", tag = "2")]
        pub payload_type: Vec<u8>,
        #[prost(bytes = "vec", tag = "3")]
        pub payload: Vec<u8>,
        #[prost(bytes = "vec", tag = "5")]
        pub signature: Vec<u8>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct PeerRecord {
        #[prost(bytes = "vec", tag = "1")]
        pub peer_id: Vec<u8>,
        #[prost(uint64, tag = "2")]
        pub seq: u64,
        #[prost(message, repeated, tag = "3")]
        pub addresses: Vec<AddressInfo>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct AddressInfo {
        #[prost(bytes = "vec", tag = "1")]
        pub multiaddr: Vec<u8>,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Keypair;

    fn record(keypair: &Keypair, seq: u64) -> PeerRecord {
        PeerRecord::new(
            keypair.public().to_peer_id(),
            seq,
            vec!["/ip4/127.0.0.1/tcp/1234".parse().unwrap()],
        )
    }

    #[test]
    fn seal_and_open() {
        let keypair = Keypair::generate_ed25519();
        let rec = record(&keypair, 1);
        let env = rec.seal(&keypair).unwrap();
        assert_eq!(PeerRecord::from_envelope(&env).unwrap(), rec);
    }

    #[test]
    fn envelope_roundtrip() {
        let keypair = Keypair::generate_ed25519();
        let env = record(&keypair, 7).seal(&keypair).unwrap();
        let decoded = Envelope::from_protobuf_encoding(&env.to_protobuf_encoding()).unwrap();
        assert_eq!(env, decoded);
        assert!(decoded.payload(PEER_RECORD_DOMAIN, PEER_RECORD_PAYLOAD_TYPE).is_ok());
    }

    #[test]
    fn tampered_envelope_fails_verification() {
        let keypair = Keypair::generate_ed25519();
        let env = record(&keypair, 1).seal(&keypair).unwrap();
        let mut bytes = env.to_protobuf_encoding();
        let n = bytes.len();
        bytes[n / 2] ^= 0xff;
        if let Ok(mangled) = Envelope::from_protobuf_encoding(&bytes) {
            assert!(mangled.payload(PEER_RECORD_DOMAIN, PEER_RECORD_PAYLOAD_TYPE).is_err());
        }
    }

    #[test]
    fn foreign_keypair_cannot_seal() {
        let keypair = Keypair::generate_ed25519();
        let other = Keypair::generate_ed25519();
        let rec = record(&keypair, 1);
        assert!(matches!(rec.seal(&other), Err(RecordError::PeerIdMismatch)));
    }
}
