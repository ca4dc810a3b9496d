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

//! A node's network identity keys.

use prost::Message;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::peer_id::PeerId;

/// Identity keypair of a node.
///
/// Only ed25519 is built in; the enum leaves room for other schemes.
#[derive(Clone)]
pub enum Keypair {
    Ed25519(ed25519::Keypair),
}

impl Keypair {
    /// Generates a new ed25519 keypair.
    pub fn generate_ed25519() -> Keypair {
        Keypair::Ed25519(ed25519::Keypair::generate())
    }

    /// Signs a message with the private key.
    pub fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, SigningError> {
        match self {
            Keypair::Ed25519(pair) => Ok(pair.sign(msg)),
        }
    }

    /// The public half of the keypair.
    pub fn public(&self) -> PublicKey {
        match self {
            Keypair::Ed25519(pair) => PublicKey::Ed25519(pair.public()),
        }
    }

    /// Encodes the private key as the protobuf structure used by libp2p.
    pub fn to_protobuf_encoding(&self) -> Vec<u8> {
        let msg = match self {
            Keypair::Ed25519(pair) => proto::PrivateKey {
                r#type: proto::KeyType::Ed25519 as i32,
                data: pair.to_bytes().to_vec(),
            },
        };
        msg.encode_to_vec()
    }

    /// Decodes a private key from its protobuf encoding.
    pub fn from_protobuf_encoding(bytes: &[u8]) -> Result<Keypair, DecodingError> {
        let msg = proto::PrivateKey::decode(bytes).map_err(DecodingError::Protobuf)?;
        let data = Zeroizing::new(msg.data);
        match proto::KeyType::from_i32(msg.r#type) {
            Some(proto::KeyType::Ed25519) => {
                ed25519::Keypair::from_bytes(&data).map(Keypair::Ed25519)
            }
            _ => Err(DecodingError::UnsupportedKeyType(msg.r#type)),
        }
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Keypair::Ed25519(pair) => f
                .debug_struct("Keypair::Ed25519")
                .field("public", &pair.public())
                .finish(),
        }
    }
}

/// Public identity key of a node.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum PublicKey {
    Ed25519(ed25519::PublicKey),
}

impl PublicKey {
    /// Verifies `sig` over `msg` with this key.
    pub fn verify(&self, msg: &[u8], sig: &[u8]) -> bool {
        match self {
            PublicKey::Ed25519(pk) => pk.verify(msg, sig),
        }
    }

    /// Encodes the key as the protobuf structure used by libp2p.
    pub fn to_protobuf_encoding(&self) -> Vec<u8> {
        let msg = match self {
            PublicKey::Ed25519(pk) => proto::PublicKey {
                r#type: proto::KeyType::Ed25519 as i32,
                data: pk.to_bytes().to_vec(),
            },
        };
        msg.encode_to_vec()
    }

    /// Decodes a public key from its protobuf encoding.
    pub fn from_protobuf_encoding(bytes: &[u8]) -> Result<PublicKey, DecodingError> {
        let msg = proto::PublicKey::decode(bytes).map_err(DecodingError::Protobuf)?;
        match proto::KeyType::from_i32(msg.r#type) {
            Some(proto::KeyType::Ed25519) => {
                ed25519::PublicKey::from_bytes(&msg.data).map(PublicKey::Ed25519)
            }
            _ => Err(DecodingError::UnsupportedKeyType(msg.r#type)),
        }
    }

    /// Derives the [`PeerId`] of this key.
    pub fn to_peer_id(&self) -> PeerId {
        PeerId::from_public_key(self)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PublicKey::Ed25519(pk) => write!(f, "Ed25519({})", bs58::encode(pk.to_bytes()).into_string()),
        }
    }
}

/// Error while decoding a key from its serialized form.
#[derive(Debug, Error)]
pub enum DecodingError {
    #[error("invalid key protobuf: {0}")]
    Protobuf(#[from] prost::DecodeError),
    #[error("unsupported key type {0}")]
    UnsupportedKeyType(i32),
    #[error("malformed key material: {0}")]
    InvalidKeyMaterial(String),
}

/// Error while signing.
#[derive(Debug, Error)]
#[error("signing failed: {0}")]
pub struct SigningError(String);

pub mod ed25519 {
    //! Thin wrappers around `ed25519-dalek` so the rest of the crate never
    //! touches the backend types directly.

    use super::DecodingError;
    use ed25519_dalek::{Signer as _, Verifier as _};
    use rand::rngs::OsRng;
    use std::convert::TryFrom;
    use std::fmt;

    pub struct Keypair(ed25519_dalek::Keypair);

    impl Keypair {
        pub fn generate() -> Keypair {
            let mut csprng = OsRng;
            Keypair(ed25519_dalek::Keypair::generate(&mut csprng))
        }

        pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
            self.0.sign(msg).to_bytes().to_vec()
        }

        pub fn public(&self) -> PublicKey {
            PublicKey(self.0.public)
        }

        /// Secret-then-public, 64 bytes.
        pub fn to_bytes(&self) -> [u8; 64] {
            self.0.to_bytes()
        }

        pub fn from_bytes(bytes: &[u8]) -> Result<Keypair, DecodingError> {
            ed25519_dalek::Keypair::from_bytes(bytes)
                .map(Keypair)
                .map_err(|e| DecodingError::InvalidKeyMaterial(e.to_string()))
        }
    }

    impl Clone for Keypair {
        fn clone(&self) -> Keypair {
            let bytes = self.0.to_bytes();
            Keypair(ed25519_dalek::Keypair::from_bytes(&bytes).expect("round-trip of valid keypair bytes"))
        }
    }

    impl fmt::Debug for Keypair {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Keypair").field("public", &self.public()).finish()
        }
    }

    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct PublicKey(ed25519_dalek::PublicKey);

    impl PublicKey {
        pub fn verify(&self, msg: &[u8], sig: &[u8]) -> bool {
            ed25519_dalek::Signature::try_from(sig)
                .and_then(|s| self.0.verify(msg, &s))
                .is_ok()
        }

        pub fn to_bytes(&self) -> [u8; 32] {
            self.0.to_bytes()
        }

        pub fn from_bytes(bytes: &[u8]) -> Result<PublicKey, DecodingError> {
            ed25519_dalek::PublicKey::from_bytes(bytes)
                .map(PublicKey)
                .map_err(|e| DecodingError::InvalidKeyMaterial(e.to_string()))
        }
    }

    impl std::hash::Hash for PublicKey {
        fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
            self.0.as_bytes().hash(state)
        }
    }

    impl fmt::Debug for PublicKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "PublicKey({})", bs58::encode(self.0.as_bytes()).into_string())
        }
    }
}

mod proto {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct PublicKey {
        #[prost(enumeration = "KeyType", tag = "1")]
        pub r#type: i32,
        #[prost(bytes = "vec", tag = "2")]
        pub data: Vec<u8>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct PrivateKey {
        #[prost(enumeration = "KeyType", tag = "1")]
        pub r#type: i32,
        #[prost(bytes = "vec", tag = "2")]
        pub data: Vec<u8>,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum KeyType {
        Rsa = 0,
        Ed25519 = 1,
        Secp256k1 = 2,
        Ecdsa = 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let pair = Keypair::generate_ed25519();
        let msg = b"hello peerlink";
        let sig = pair.sign(msg).unwrap();
        assert!(pair.public().verify(msg, &sig));
        assert!(!pair.public().verify(b"other message", &sig));
    }

    #[test]
    fn keypair_protobuf_roundtrip() {
        let pair = Keypair::generate_ed25519();
        let encoded = pair.to_protobuf_encoding();
        let decoded = Keypair::from_protobuf_encoding(&encoded).unwrap();
        assert_eq!(pair.public(), decoded.public());
    }

    #[test]
    fn public_key_protobuf_roundtrip() {
        let pk = Keypair::generate_ed25519().public();
        let decoded = PublicKey::from_protobuf_encoding(&pk.to_protobuf_encoding()).unwrap();
        assert_eq!(pk, decoded);
    }
}
