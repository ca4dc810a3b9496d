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

use lazy_static::lazy_static;
use multihash::{Code, Multihash, MultihashDigest};
use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::identity::PublicKey;

/// Public keys whose serialized form stays below this size are inlined into
/// the peer id with the identity hash, so the key can be recovered from the
/// id alone.
const MAX_INLINE_KEY_LENGTH: usize = 42;

lazy_static! {
    static ref BASE32_LOWER_NOPAD: data_encoding::Encoding = {
        let mut spec = data_encoding::Specification::new();
        spec.symbols.push_str("abcdefghijklmnopqrstuvwxyz234567");
        spec.encoding().expect("valid base32 specification")
    };
}

/// Content address of a peer, derived from its public key.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PeerId {
    multihash: Multihash,
}

impl PeerId {
    /// Derives a `PeerId` from a public key.
    pub fn from_public_key(key: &PublicKey) -> PeerId {
        let encoded = key.to_protobuf_encoding();
        let multihash = if encoded.len() <= MAX_INLINE_KEY_LENGTH {
            Code::Identity.digest(&encoded)
        } else {
            Code::Sha2_256.digest(&encoded)
        };
        PeerId { multihash }
    }

    /// Parses a `PeerId` from its canonical multihash bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<PeerId, ParseError> {
        let multihash = Multihash::from_bytes(bytes).map_err(|_| ParseError::InvalidMultihash)?;
        PeerId::try_from(multihash).map_err(|_| ParseError::UnsupportedCode)
    }

    /// The canonical byte representation.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.multihash.to_bytes()
    }

    /// If the peer id inlines the public key, extracts it.
    pub fn as_public_key(&self) -> Option<PublicKey> {
        if self.multihash.code() == u64::from(Code::Identity) {
            PublicKey::from_protobuf_encoding(self.multihash.digest()).ok()
        } else {
            None
        }
    }

    /// Base-32 lower-case no-pad text form, used in datastore keys.
    pub fn to_base32(&self) -> String {
        BASE32_LOWER_NOPAD.encode(&self.to_bytes())
    }

    /// Parses the base-32 lower-case no-pad text form.
    pub fn from_base32(s: &str) -> Result<PeerId, ParseError> {
        let bytes = BASE32_LOWER_NOPAD
            .decode(s.as_bytes())
            .map_err(|_| ParseError::InvalidEncoding)?;
        PeerId::from_bytes(&bytes)
    }

    /// Base-58 text form, used for display.
    pub fn to_base58(&self) -> String {
        bs58::encode(self.to_bytes()).into_string()
    }

    /// A peer id from random bytes. Only useful in tests, as there is no key
    /// behind it.
    pub fn random() -> PeerId {
        let bytes = rand::random::<[u8; 32]>();
        PeerId {
            multihash: Multihash::wrap(u64::from(Code::Identity), &bytes)
                .expect("32 bytes fit the identity hash"),
        }
    }
}

impl TryFrom<Multihash> for PeerId {
    type Error = Multihash;

    fn try_from(multihash: Multihash) -> Result<PeerId, Multihash> {
        match multihash.code() {
            c if c == u64::from(Code::Sha2_256) => Ok(PeerId { multihash }),
            c if c == u64::from(Code::Identity) && multihash.digest().len() <= 64 => {
                Ok(PeerId { multihash })
            }
            _ => Err(multihash),
        }
    }
}

impl From<PeerId> for Multihash {
    fn from(id: PeerId) -> Multihash {
        id.multihash
    }
}

impl From<&PublicKey> for PeerId {
    fn from(key: &PublicKey) -> PeerId {
        PeerId::from_public_key(key)
    }
}

impl FromStr for PeerId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<PeerId, ParseError> {
        let bytes = bs58::decode(s).into_vec().map_err(|_| ParseError::InvalidEncoding)?;
        PeerId::from_bytes(&bytes)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PeerId").field(&self.to_base58()).finish()
    }
}

/// Error parsing a peer id from text or bytes.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid text encoding")]
    InvalidEncoding,
    #[error("invalid multihash")]
    InvalidMultihash,
    #[error("multihash code not allowed for peer ids")]
    UnsupportedCode,
}
