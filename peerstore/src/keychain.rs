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

//! At-rest encryption of private keys.
//!
//! AES-256-GCM with a 12-byte random IV prepended to the ciphertext and the
//! 128-bit tag appended; the key is derived with PBKDF2-HMAC-SHA256. The
//! parameter floor follows NIST guidance: 20-character passwords, a
//! 128-bit salt, at least 1000 iterations.

use parking_lot::Mutex;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::pbkdf2;
use std::num::NonZeroU32;
use zeroize::Zeroizing;

use crate::datastore::BatchOp;
use crate::PeerstoreError;

pub const MIN_PASSWORD_LEN: usize = 20;
pub const MIN_SALT_LEN: usize = 16;
pub const MIN_ITERATIONS: u32 = 1000;
const NONCE_LEN: usize = 12;

/// Configuration enabling encryption of stored private keys.
#[derive(Clone)]
pub struct KeychainConfig {
    pub password: String,
    pub salt: Vec<u8>,
    pub iterations: u32,
}

struct Params {
    password: String,
    salt: Vec<u8>,
    iterations: NonZeroU32,
}

pub(crate) struct Keychain {
    params: Mutex<Params>,
}

impl Keychain {
    pub(crate) fn new(config: KeychainConfig) -> Result<Keychain, PeerstoreError> {
        if config.password.len() < MIN_PASSWORD_LEN {
            return Err(PeerstoreError::Config(format!(
                "keychain password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }
        if config.salt.len() < MIN_SALT_LEN {
            return Err(PeerstoreError::Config(format!(
                "keychain salt must be at least {} bytes",
                MIN_SALT_LEN
            )));
        }
        let iterations = NonZeroU32::new(config.iterations)
            .filter(|i| i.get() >= MIN_ITERATIONS)
            .ok_or_else(|| {
                PeerstoreError::Config(format!(
                    "keychain iteration count must be at least {}",
                    MIN_ITERATIONS
                ))
            })?;
        Ok(Keychain {
            params: Mutex::new(Params {
                password: config.password,
                salt: config.salt,
                iterations,
            }),
        })
    }

    pub(crate) fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, PeerstoreError> {
        let params = self.params.lock();
        encrypt_with(&params, plaintext)
    }

    pub(crate) fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, PeerstoreError> {
        let params = self.params.lock();
        decrypt_with(&params, data)
    }

    /// Re-encrypts the given ciphertexts under `new_password` and returns
    /// the write batch that swaps them all at once.
    pub(crate) fn reencrypt(
        &self,
        new_password: &str,
        entries: Vec<(String, Vec<u8>)>,
    ) -> Result<Vec<BatchOp>, PeerstoreError> {
        if new_password.len() < MIN_PASSWORD_LEN {
            return Err(PeerstoreError::Config(format!(
                "keychain password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }
        let params = self.params.lock();
        let new_params = Params {
            password: new_password.to_string(),
            salt: params.salt.clone(),
            iterations: params.iterations,
        };
        let mut ops = Vec::with_capacity(entries.len());
        for (key, ciphertext) in entries {
            let plaintext = Zeroizing::new(decrypt_with(&params, &ciphertext)?);
            ops.push(BatchOp::Put(key, encrypt_with(&new_params, &plaintext)?));
        }
        Ok(ops)
    }

    pub(crate) fn set_password(&self, new_password: String) {
        self.params.lock().password = new_password;
    }
}

fn derive_key(params: &Params) -> Zeroizing<[u8; 32]> {
    let mut key = Zeroizing::new([0u8; 32]);
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        params.iterations,
        &params.salt,
        params.password.as_bytes(),
        &mut *key,
    );
    key
}

fn encrypt_with(params: &Params, plaintext: &[u8]) -> Result<Vec<u8>, PeerstoreError> {
    let key = derive_key(params);
    let unbound = UnboundKey::new(&AES_256_GCM, &*key)
        .map_err(|_| PeerstoreError::Crypto("key setup failed".into()))?;
    let sealing = LessSafeKey::new(unbound);
    let nonce_bytes: [u8; NONCE_LEN] = rand::random();
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);
    let mut in_out = plaintext.to_vec();
    sealing
        .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| PeerstoreError::Crypto("encryption failed".into()))?;
    let mut out = Vec::with_capacity(NONCE_LEN + in_out.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&in_out);
    Ok(out)
}

fn decrypt_with(params: &Params, data: &[u8]) -> Result<Vec<u8>, PeerstoreError> {
    if data.len() < NONCE_LEN {
        return Err(PeerstoreError::Crypto("ciphertext is truncated".into()));
    }
    let key = derive_key(params);
    let unbound = UnboundKey::new(&AES_256_GCM, &*key)
        .map_err(|_| PeerstoreError::Crypto("key setup failed".into()))?;
    let opening = LessSafeKey::new(unbound);
    let mut nonce_bytes = [0u8; NONCE_LEN];
    nonce_bytes.copy_from_slice(&data[..NONCE_LEN]);
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);
    let mut in_out = data[NONCE_LEN..].to_vec();
    let plaintext = opening
        .open_in_place(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| PeerstoreError::Crypto("decryption failed".into()))?;
    Ok(plaintext.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> KeychainConfig {
        KeychainConfig {
            password: "correct horse battery staple".into(),
            salt: vec![7u8; 16],
            iterations: 1000,
        }
    }

    #[test]
    fn roundtrip() {
        let keychain = Keychain::new(config()).unwrap();
        let ciphertext = keychain.encrypt(b"secret key material").unwrap();
        assert_ne!(&ciphertext[NONCE_LEN..], b"secret key material".as_ref());
        assert_eq!(keychain.decrypt(&ciphertext).unwrap(), b"secret key material");
    }

    #[test]
    fn wrong_password_fails_to_decrypt() {
        let keychain = Keychain::new(config()).unwrap();
        let ciphertext = keychain.encrypt(b"secret").unwrap();
        keychain.set_password("another sufficiently long pass".into());
        assert!(keychain.decrypt(&ciphertext).is_err());
    }

    #[test]
    fn weak_parameters_fail_construction() {
        let weak = KeychainConfig { password: "short".into(), ..config() };
        assert!(Keychain::new(weak).is_err());
        let weak = KeychainConfig { salt: vec![0u8; 8], ..config() };
        assert!(Keychain::new(weak).is_err());
        let weak = KeychainConfig { iterations: 10, ..config() };
        assert!(Keychain::new(weak).is_err());
    }

    #[test]
    fn reencrypt_produces_ciphertexts_under_the_new_password() {
        let keychain = Keychain::new(config()).unwrap();
        let ciphertext = keychain.encrypt(b"secret").unwrap();
        let ops = keychain
            .reencrypt("a different long password!", vec![("/k".into(), ciphertext)])
            .unwrap();
        keychain.set_password("a different long password!".into());
        match &ops[0] {
            BatchOp::Put(_, new_ciphertext) => {
                assert_eq!(keychain.decrypt(new_ciphertext).unwrap(), b"secret");
            }
            other => panic!("unexpected op {:?}", other),
        }
    }
}
