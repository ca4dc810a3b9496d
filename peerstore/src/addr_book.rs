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

//! The TTL-indexed address book.
//!
//! Addresses never outlive their TTL: expired entries are garbage-collected
//! on every read and mutation, and every mutation flushes the record to the
//! datastore (deleting it once empty). Adding an address only ever extends
//! its lifetime; `set_addrs` overrides it.

use fnv::FnvHashMap;
use futures::channel::mpsc;
use futures::prelude::*;
use log::{debug, warn};
use parking_lot::Mutex;
use prost::Message;
use std::convert::TryFrom;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use peerlink_core::addr::MultiaddrExt;
use peerlink_core::record::PeerRecord;
use peerlink_core::time::Clock;
use peerlink_core::{Envelope, Multiaddr, PeerId};

use crate::datastore::Datastore;
use crate::PeerstoreError;

#[derive(Debug, Clone)]
struct AddrEntry {
    addr: Multiaddr,
    expiry: Instant,
    ttl: Duration,
}

#[derive(Debug, Clone)]
struct CertifiedRecord {
    seq: u64,
    raw: Vec<u8>,
}

#[derive(Default)]
struct AddrRecord {
    entries: Vec<AddrEntry>,
    certified: Option<CertifiedRecord>,
}

struct RecordHandle {
    peer: PeerId,
    inner: Mutex<AddrRecord>,
}

pub struct AddrBook {
    datastore: Arc<dyn Datastore>,
    clock: Arc<dyn Clock>,
    records: Mutex<FnvHashMap<PeerId, Arc<RecordHandle>>>,
    streams: Mutex<FnvHashMap<PeerId, Vec<mpsc::UnboundedSender<Multiaddr>>>>,
}

fn record_key(peer: &PeerId) -> String {
    format!("/peers/addrs/{}", peer.to_base32())
}

impl AddrBook {
    pub fn new(datastore: Arc<dyn Datastore>, clock: Arc<dyn Clock>) -> AddrBook {
        AddrBook {
            datastore,
            clock,
            records: Mutex::new(FnvHashMap::default()),
            streams: Mutex::new(FnvHashMap::default()),
        }
    }

    pub fn add_addr(&self, peer: &PeerId, addr: Multiaddr, ttl: Duration) {
        self.add_addrs(peer, vec![addr], ttl)
    }

    /// Adds addresses with TTL-extent semantics: an address already present
    /// with a later expiry is left alone, an earlier expiry is extended.
    /// A zero TTL is a no-op.
    pub fn add_addrs(&self, peer: &PeerId, addrs: Vec<Multiaddr>, ttl: Duration) {
        if ttl == Duration::from_secs(0) {
            return;
        }
        let now = self.clock.now();
        let expiry = now + ttl;
        let handle = self.record(peer);
        let mut newly_added = Vec::new();
        {
            let mut record = handle.inner.lock();
            for addr in addrs {
                let addr = match self.clean_addr(peer, addr) {
                    Some(addr) => addr,
                    None => continue,
                };
                match record.entries.iter_mut().find(|e| e.addr == addr) {
                    Some(entry) => {
                        if expiry > entry.expiry {
                            entry.expiry = expiry;
                            entry.ttl = ttl;
                        }
                    }
                    None => {
                        record.entries.push(AddrEntry { addr: addr.clone(), expiry, ttl });
                        newly_added.push(addr);
                    }
                }
            }
            self.gc_and_flush(peer, &mut record);
        }
        self.notify(peer, newly_added);
    }

    pub fn set_addr(&self, peer: &PeerId, addr: Multiaddr, ttl: Duration) {
        self.set_addrs(peer, vec![addr], ttl)
    }

    /// Sets addresses, overriding any existing TTL. A zero TTL deletes the
    /// address.
    pub fn set_addrs(&self, peer: &PeerId, addrs: Vec<Multiaddr>, ttl: Duration) {
        let now = self.clock.now();
        let handle = self.record(peer);
        let mut newly_added = Vec::new();
        {
            let mut record = handle.inner.lock();
            for addr in addrs {
                let addr = match self.clean_addr(peer, addr) {
                    Some(addr) => addr,
                    None => continue,
                };
                if ttl == Duration::from_secs(0) {
                    record.entries.retain(|e| e.addr != addr);
                    continue;
                }
                let expiry = now + ttl;
                match record.entries.iter_mut().find(|e| e.addr == addr) {
                    Some(entry) => {
                        entry.expiry = expiry;
                        entry.ttl = ttl;
                    }
                    None => {
                        record.entries.push(AddrEntry { addr: addr.clone(), expiry, ttl });
                        newly_added.push(addr);
                    }
                }
            }
            self.gc_and_flush(peer, &mut record);
        }
        self.notify(peer, newly_added);
    }

    /// Rewrites the TTL of every entry currently stored with `old_ttl`.
    /// A zero `new_ttl` deletes those entries.
    pub fn update_addrs(&self, peer: &PeerId, old_ttl: Duration, new_ttl: Duration) {
        let now = self.clock.now();
        let handle = self.record(peer);
        let mut record = handle.inner.lock();
        if new_ttl == Duration::from_secs(0) {
            record.entries.retain(|e| e.ttl != old_ttl);
        } else {
            for entry in record.entries.iter_mut().filter(|e| e.ttl == old_ttl) {
                entry.ttl = new_ttl;
                entry.expiry = now + new_ttl;
            }
        }
        self.gc_and_flush(peer, &mut record);
    }

    /// Live addresses of a peer, expired entries filtered.
    pub fn addrs(&self, peer: &PeerId) -> Vec<Multiaddr> {
        let handle = self.record(peer);
        let mut record = handle.inner.lock();
        self.gc_and_flush(peer, &mut record);
        record.entries.iter().map(|e| e.addr.clone()).collect()
    }

    pub fn clear_addrs(&self, peer: &PeerId) {
        let handle = self.record(peer);
        let mut record = handle.inner.lock();
        record.entries.clear();
        record.certified = None;
        self.gc_and_flush(peer, &mut record);
    }

    /// Peers that currently have at least one live address.
    pub fn peers_with_addrs(&self) -> std::collections::HashSet<PeerId> {
        // Pull datastore-only records into the cache first.
        if let Ok(stored) = self.datastore.query("/peers/addrs/") {
            for (key, _) in stored {
                if let Some(b32) = key.rsplit('/').next() {
                    if let Ok(peer) = PeerId::from_base32(b32) {
                        self.record(&peer);
                    }
                }
            }
        }
        let handles: Vec<_> = self.records.lock().values().cloned().collect();
        let mut peers = std::collections::HashSet::new();
        for handle in handles {
            let mut record = handle.inner.lock();
            self.gc_and_flush(&handle.peer, &mut record);
            if !record.entries.is_empty() {
                peers.insert(handle.peer.clone());
            }
        }
        peers
    }

    /// A hot stream of addresses newly added for `peer`.
    pub fn addr_stream(&self, peer: &PeerId) -> AddrStream {
        let (tx, rx) = mpsc::unbounded();
        self.streams.lock().entry(peer.clone()).or_default().push(tx);
        AddrStream { inner: rx }
    }

    /// Ingests a certified peer record. Returns `Ok(false)` when the record
    /// is stale (its sequence number does not exceed the stored one).
    pub fn consume_peer_record(
        &self,
        envelope: Envelope,
        ttl: Duration,
    ) -> Result<bool, PeerstoreError> {
        let record = PeerRecord::from_envelope(&envelope)
            .map_err(|e| PeerstoreError::Codec(e.to_string()))?;
        let peer = record.peer_id.clone();
        let handle = self.record(&peer);
        let now = self.clock.now();
        let expiry = now + ttl;
        let mut newly_added = Vec::new();
        {
            let mut stored = handle.inner.lock();
            if let Some(certified) = &stored.certified {
                if record.seq <= certified.seq {
                    debug!(
                        "ignoring certified record for {} with stale seq {} (have {})",
                        peer, record.seq, certified.seq
                    );
                    return Ok(false);
                }
            }
            if ttl != Duration::from_secs(0) {
                for addr in record.addresses {
                    let addr = match self.clean_addr(&peer, addr) {
                        Some(addr) => addr,
                        None => continue,
                    };
                    match stored.entries.iter_mut().find(|e| e.addr == addr) {
                        Some(entry) => {
                            if expiry > entry.expiry {
                                entry.expiry = expiry;
                                entry.ttl = ttl;
                            }
                        }
                        None => {
                            stored.entries.push(AddrEntry { addr: addr.clone(), expiry, ttl });
                            newly_added.push(addr);
                        }
                    }
                }
            }
            stored.certified =
                Some(CertifiedRecord { seq: record.seq, raw: envelope.to_protobuf_encoding() });
            self.gc_and_flush(&peer, &mut stored);
        }
        self.notify(&peer, newly_added);
        Ok(true)
    }

    /// The latest accepted certified record for `peer`, if any.
    pub fn get_peer_record(&self, peer: &PeerId) -> Option<Envelope> {
        let handle = self.record(peer);
        let record = handle.inner.lock();
        let certified = record.certified.as_ref()?;
        match Envelope::from_protobuf_encoding(&certified.raw) {
            Ok(envelope) => Some(envelope),
            Err(e) => {
                warn!("stored certified record for {} does not decode: {}", peer, e);
                None
            }
        }
    }

    fn record(&self, peer: &PeerId) -> Arc<RecordHandle> {
        let mut records = self.records.lock();
        if let Some(handle) = records.get(peer) {
            return handle.clone();
        }
        let record = self.load(peer).unwrap_or_default();
        let handle = Arc::new(RecordHandle { peer: peer.clone(), inner: Mutex::new(record) });
        records.insert(peer.clone(), handle.clone());
        handle
    }

    /// Strips a matching peer-id suffix; rejects a mismatched one.
    fn clean_addr(&self, peer: &PeerId, addr: Multiaddr) -> Option<Multiaddr> {
        match addr.peer_id() {
            None => Some(addr),
            Some(id) if &id == peer => Some(addr.without_peer_id()),
            Some(id) => {
                warn!("dropping address {} with peer id {} while storing for {}", addr, id, peer);
                None
            }
        }
    }

    fn gc_and_flush(&self, peer: &PeerId, record: &mut AddrRecord) {
        let now = self.clock.now();
        record.entries.retain(|e| e.expiry > now);
        if let Err(e) = self.flush(peer, record) {
            warn!("failed to persist address record for {}: {}", peer, e);
        }
    }

    fn flush(&self, peer: &PeerId, record: &AddrRecord) -> Result<(), PeerstoreError> {
        let key = record_key(peer);
        if record.entries.is_empty() && record.certified.is_none() {
            self.datastore.delete(&key)?;
            return Ok(());
        }
        let unix_now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let now = self.clock.now();
        let msg = proto::AddrBookRecord {
            peer_id: peer.to_bytes(),
            entries: record
                .entries
                .iter()
                .map(|e| proto::AddrEntry {
                    multiaddr: e.addr.to_vec(),
                    expiry_unix_ms: unix_now
                        + e.expiry.saturating_duration_since(now).as_millis() as u64,
                    ttl_ms: e.ttl.as_millis() as u64,
                })
                .collect(),
            certified: record
                .certified
                .as_ref()
                .map(|c| proto::CertifiedRecord { seq: c.seq, raw: c.raw.clone() }),
        };
        self.datastore.put(&key, msg.encode_to_vec())?;
        Ok(())
    }

    fn load(&self, peer: &PeerId) -> Option<AddrRecord> {
        let bytes = self.datastore.get(&record_key(peer)).ok()??;
        let msg = match proto::AddrBookRecord::decode(&bytes[..]) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("stored address record for {} does not decode: {}", peer, e);
                return None;
            }
        };
        let unix_now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let now = self.clock.now();
        let mut entries = Vec::with_capacity(msg.entries.len());
        for entry in msg.entries {
            let addr = match Multiaddr::try_from(entry.multiaddr) {
                Ok(addr) => addr,
                Err(_) => continue,
            };
            let remaining = Duration::from_millis(entry.expiry_unix_ms.saturating_sub(unix_now));
            entries.push(AddrEntry {
                addr,
                expiry: now + remaining,
                ttl: Duration::from_millis(entry.ttl_ms),
            });
        }
        Some(AddrRecord {
            entries,
            certified: msg.certified.map(|c| CertifiedRecord { seq: c.seq, raw: c.raw }),
        })
    }

    fn notify(&self, peer: &PeerId, addrs: Vec<Multiaddr>) {
        if addrs.is_empty() {
            return;
        }
        let mut streams = self.streams.lock();
        if let Some(subscribers) = streams.get_mut(peer) {
            for addr in addrs {
                subscribers.retain(|tx| tx.unbounded_send(addr.clone()).is_ok());
            }
            if subscribers.is_empty() {
                streams.remove(peer);
            }
        }
    }
}

/// Live stream of addresses newly learned for one peer.
pub struct AddrStream {
    inner: mpsc::UnboundedReceiver<Multiaddr>,
}

impl Stream for AddrStream {
    type Item = Multiaddr;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Multiaddr>> {
        self.inner.poll_next_unpin(cx)
    }
}

mod proto {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct AddrBookRecord {
        #[prost(bytes = "vec", tag = "1")]
        pub peer_id: Vec<u8>,
        #[prost(message, repeated, tag = "2")]
        pub entries: Vec<AddrEntry>,
        #[prost(message, optional, tag = "3")]
        pub certified: Option<CertifiedRecord>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct AddrEntry {
        #[prost(bytes = "vec", tag = "1")]
        pub multiaddr: Vec<u8>,
        #[prost(uint64, tag = "2")]
        pub expiry_unix_ms: u64,
        #[prost(uint64, tag = "3")]
        pub ttl_ms: u64,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct CertifiedRecord {
        #[prost(uint64, tag = "1")]
        pub seq: u64,
        #[prost(bytes = "vec", tag = "2")]
        pub raw: Vec<u8>,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::MemDatastore;
    use peerlink_core::identity::Keypair;
    use peerlink_core::time::ManualClock;

    const HOUR: Duration = Duration::from_secs(60 * 60);
    const MINUTE: Duration = Duration::from_secs(60);

    fn book() -> (AddrBook, ManualClock) {
        let clock = ManualClock::new();
        let book = AddrBook::new(Arc::new(MemDatastore::new()), Arc::new(clock.clone()));
        (book, clock)
    }

    fn ma(s: &str) -> Multiaddr {
        s.parse().unwrap()
    }

    #[test]
    fn adding_never_shortens_a_ttl() {
        let (book, clock) = book();
        let peer = PeerId::random();
        book.add_addr(&peer, ma("/ip4/1.2.3.4/tcp/1"), HOUR);
        book.add_addr(&peer, ma("/ip4/1.2.3.4/tcp/1"), MINUTE);
        clock.advance(2 * MINUTE);
        assert_eq!(book.addrs(&peer).len(), 1);
    }

    #[test]
    fn adding_extends_a_shorter_ttl() {
        let (book, clock) = book();
        let peer = PeerId::random();
        book.add_addr(&peer, ma("/ip4/1.2.3.4/tcp/1"), MINUTE);
        book.add_addr(&peer, ma("/ip4/1.2.3.4/tcp/1"), HOUR);
        clock.advance(2 * MINUTE);
        assert_eq!(book.addrs(&peer).len(), 1);
        clock.advance(2 * HOUR);
        assert!(book.addrs(&peer).is_empty());
    }

    #[test]
    fn set_overrides_unconditionally() {
        let (book, clock) = book();
        let peer = PeerId::random();
        book.set_addr(&peer, ma("/ip4/1.2.3.4/tcp/1"), HOUR);
        book.set_addr(&peer, ma("/ip4/1.2.3.4/tcp/1"), MINUTE);
        clock.advance(2 * MINUTE);
        assert!(book.addrs(&peer).is_empty());
    }

    #[test]
    fn zero_ttl_set_deletes() {
        let (book, _clock) = book();
        let peer = PeerId::random();
        book.set_addr(&peer, ma("/ip4/1.2.3.4/tcp/1"), HOUR);
        book.set_addr(&peer, ma("/ip4/1.2.3.4/tcp/1"), Duration::from_secs(0));
        assert!(book.addrs(&peer).is_empty());
    }

    #[test]
    fn adding_is_idempotent() {
        let (book, _clock) = book();
        let peer = PeerId::random();
        let addrs = vec![ma("/ip4/1.2.3.4/tcp/1"), ma("/ip4/1.2.3.4/tcp/2")];
        book.add_addrs(&peer, addrs.clone(), HOUR);
        book.add_addrs(&peer, addrs.clone(), HOUR);
        let stored = book.addrs(&peer);
        assert_eq!(stored.len(), 2);
    }

    #[test]
    fn clear_empties_the_record() {
        let (book, _clock) = book();
        let peer = PeerId::random();
        book.set_addrs(&peer, vec![ma("/ip4/1.2.3.4/tcp/1")], HOUR);
        book.clear_addrs(&peer);
        assert!(book.addrs(&peer).is_empty());
        assert!(!book.peers_with_addrs().contains(&peer));
    }

    #[test]
    fn matching_peer_id_suffix_is_stripped() {
        let (book, _clock) = book();
        let peer = PeerId::random();
        let addr = ma("/ip4/1.2.3.4/tcp/1").with_peer_id(&peer);
        book.add_addr(&peer, addr, HOUR);
        assert_eq!(book.addrs(&peer), vec![ma("/ip4/1.2.3.4/tcp/1")]);
    }

    #[test]
    fn mismatched_peer_id_suffix_is_rejected() {
        let (book, _clock) = book();
        let peer = PeerId::random();
        let addr = ma("/ip4/1.2.3.4/tcp/1").with_peer_id(&PeerId::random());
        book.add_addr(&peer, addr, HOUR);
        assert!(book.addrs(&peer).is_empty());
    }

    #[test]
    fn update_addrs_rewrites_a_ttl_class() {
        let (book, clock) = book();
        let peer = PeerId::random();
        book.add_addr(&peer, ma("/ip4/1.2.3.4/tcp/1"), crate::CONNECTED_ADDR_TTL);
        book.add_addr(&peer, ma("/ip4/1.2.3.4/tcp/2"), HOUR);
        book.update_addrs(&peer, crate::CONNECTED_ADDR_TTL, crate::RECENTLY_CONNECTED_ADDR_TTL);
        clock.advance(crate::RECENTLY_CONNECTED_ADDR_TTL + MINUTE);
        // Both classes expired: the downgraded one after 30 minutes, the
        // 1-hour one untouched but not yet due.
        assert_eq!(book.addrs(&peer), vec![ma("/ip4/1.2.3.4/tcp/2")]);
    }

    #[test]
    fn update_addrs_with_zero_ttl_deletes() {
        let (book, _clock) = book();
        let peer = PeerId::random();
        book.add_addr(&peer, ma("/ip4/1.2.3.4/tcp/1"), crate::TEMP_ADDR_TTL);
        book.update_addrs(&peer, crate::TEMP_ADDR_TTL, Duration::from_secs(0));
        assert!(book.addrs(&peer).is_empty());
    }

    #[test]
    fn records_survive_a_new_book_over_the_same_datastore() {
        let datastore: Arc<dyn Datastore> = Arc::new(MemDatastore::new());
        let clock = Arc::new(ManualClock::new());
        let peer = PeerId::random();
        {
            let book = AddrBook::new(datastore.clone(), clock.clone());
            book.add_addrs(&peer, vec![ma("/ip4/1.2.3.4/tcp/1"), ma("/ip4/5.6.7.8/tcp/2")], HOUR);
        }
        let book = AddrBook::new(datastore, clock);
        let mut addrs = book.addrs(&peer);
        addrs.sort_by_key(|a| a.to_string());
        assert_eq!(addrs, vec![ma("/ip4/1.2.3.4/tcp/1"), ma("/ip4/5.6.7.8/tcp/2")]);
    }

    #[test]
    fn certified_records_resist_replay() {
        let (book, _clock) = book();
        let keypair = Keypair::generate_ed25519();
        let peer = keypair.public().to_peer_id();
        let e1 = PeerRecord::new(peer.clone(), 1, vec![ma("/ip4/1.1.1.1/tcp/1")])
            .seal(&keypair)
            .unwrap();
        let e2 = PeerRecord::new(peer.clone(), 2, vec![ma("/ip4/2.2.2.2/tcp/2")])
            .seal(&keypair)
            .unwrap();

        assert!(book.consume_peer_record(e1.clone(), HOUR).unwrap());
        assert!(book.consume_peer_record(e2.clone(), HOUR).unwrap());
        // Replay of the older envelope changes nothing.
        assert!(!book.consume_peer_record(e1, HOUR).unwrap());

        let mut addrs = book.addrs(&peer);
        addrs.sort_by_key(|a| a.to_string());
        assert_eq!(addrs, vec![ma("/ip4/1.1.1.1/tcp/1"), ma("/ip4/2.2.2.2/tcp/2")]);

        let stored = book.get_peer_record(&peer).unwrap();
        let record = PeerRecord::from_envelope(&stored).unwrap();
        assert_eq!(record.seq, 2);
    }

    #[test]
    fn addr_stream_sees_newly_added_addresses() {
        let (book, _clock) = book();
        let peer = PeerId::random();
        let mut stream = book.addr_stream(&peer);
        book.add_addr(&peer, ma("/ip4/1.2.3.4/tcp/1"), HOUR);
        // Re-adding is not "newly added".
        book.add_addr(&peer, ma("/ip4/1.2.3.4/tcp/1"), HOUR);
        book.add_addr(&peer, ma("/ip4/1.2.3.4/tcp/2"), HOUR);
        futures::executor::block_on(async {
            assert_eq!(stream.next().await, Some(ma("/ip4/1.2.3.4/tcp/1")));
            assert_eq!(stream.next().await, Some(ma("/ip4/1.2.3.4/tcp/2")));
        });
    }

    #[test]
    fn expired_entries_vanish_from_peer_listing() {
        let (book, clock) = book();
        let peer = PeerId::random();
        book.add_addr(&peer, ma("/ip4/1.2.3.4/tcp/1"), MINUTE);
        assert!(book.peers_with_addrs().contains(&peer));
        clock.advance(2 * MINUTE);
        assert!(!book.peers_with_addrs().contains(&peer));
    }
}
