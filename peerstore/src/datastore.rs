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

//! The key-value boundary behind the peerstore.
//!
//! Keys are `/`-separated paths (`/peers/addrs/<peer-b32>` and friends).
//! Only the in-memory implementation ships here; persistence backends plug
//! in behind the trait.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("datastore is closed")]
    Closed,
    #[error("datastore i/o: {0}")]
    Backend(String),
}

/// One operation of an atomic write batch.
#[derive(Debug, Clone)]
pub enum BatchOp {
    Put(String, Vec<u8>),
    Delete(String),
}

pub trait Datastore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

    fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// All entries whose key starts with `prefix`.
    fn query(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError>;

    /// Applies all operations atomically: either every op is visible or
    /// none is.
    fn apply_batch(&self, ops: Vec<BatchOp>) -> Result<(), StoreError>;
}

/// A transient datastore backed by a BTree map.
#[derive(Default)]
pub struct MemDatastore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemDatastore {
    pub fn new() -> MemDatastore {
        MemDatastore::default()
    }
}

impl Datastore for MemDatastore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn query(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let entries = self.entries.lock();
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn apply_batch(&self, ops: Vec<BatchOp>) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        for op in ops {
            match op {
                BatchOp::Put(key, value) => {
                    entries.insert(key, value);
                }
                BatchOp::Delete(key) => {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete() {
        let store = MemDatastore::new();
        store.put("/a/1", b"x".to_vec()).unwrap();
        assert_eq!(store.get("/a/1").unwrap(), Some(b"x".to_vec()));
        store.delete("/a/1").unwrap();
        assert_eq!(store.get("/a/1").unwrap(), None);
    }

    #[test]
    fn query_is_prefix_scoped() {
        let store = MemDatastore::new();
        store.put("/a/1", vec![1]).unwrap();
        store.put("/a/2", vec![2]).unwrap();
        store.put("/b/1", vec![3]).unwrap();
        let hits = store.query("/a/").unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|(k, _)| k.starts_with("/a/")));
    }

    #[test]
    fn batch_applies_everything() {
        let store = MemDatastore::new();
        store.put("/k/old", vec![0]).unwrap();
        store
            .apply_batch(vec![
                BatchOp::Put("/k/new".into(), vec![1]),
                BatchOp::Delete("/k/old".into()),
            ])
            .unwrap();
        assert_eq!(store.get("/k/new").unwrap(), Some(vec![1]));
        assert_eq!(store.get("/k/old").unwrap(), None);
    }
}
