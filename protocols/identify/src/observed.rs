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

//! What remotes tell us our own addresses look like.
//!
//! Observations are grouped by the local listen address the remote reached
//! us on; only the latest observation per group is kept. Activation
//! thresholds (how many peers must agree before an address is advertised)
//! are not implemented yet.

use fnv::FnvHashMap;
use parking_lot::Mutex;

use peerlink_core::Multiaddr;

#[derive(Default)]
pub struct ObservedAddrManager {
    by_local: Mutex<FnvHashMap<Multiaddr, Multiaddr>>,
}

impl ObservedAddrManager {
    pub fn new() -> ObservedAddrManager {
        ObservedAddrManager::default()
    }

    /// Records that a remote reached through `local` sees us as `observed`.
    pub fn record(&self, observed: Multiaddr, local: &Multiaddr) {
        self.by_local.lock().insert(local.clone(), observed);
    }

    /// The distinct addresses remotes currently observe for us.
    pub fn addresses(&self) -> Vec<Multiaddr> {
        let by_local = self.by_local.lock();
        let mut out: Vec<Multiaddr> = Vec::new();
        for addr in by_local.values() {
            if !out.contains(addr) {
                out.push(addr.clone());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ma(s: &str) -> Multiaddr {
        s.parse().unwrap()
    }

    #[test]
    fn keeps_the_latest_observation_per_local_group() {
        let manager = ObservedAddrManager::new();
        let local = ma("/ip4/0.0.0.0/tcp/4001");
        manager.record(ma("/ip4/8.8.8.8/tcp/4001"), &local);
        manager.record(ma("/ip4/9.9.9.9/tcp/4001"), &local);
        assert_eq!(manager.addresses(), vec![ma("/ip4/9.9.9.9/tcp/4001")]);
    }

    #[test]
    fn deduplicates_across_groups() {
        let manager = ObservedAddrManager::new();
        manager.record(ma("/ip4/8.8.8.8/tcp/1"), &ma("/ip4/0.0.0.0/tcp/1"));
        manager.record(ma("/ip4/8.8.8.8/tcp/1"), &ma("/ip4/0.0.0.0/tcp/2"));
        assert_eq!(manager.addresses().len(), 1);
    }
}
