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

//! Rolling per-peer latency.

use fnv::FnvHashMap;
use parking_lot::Mutex;
use std::time::Duration;

use peerlink_core::PeerId;

/// Weight of a new sample in the rolling average.
const SMOOTHING: f64 = 0.1;

#[derive(Default)]
pub struct Metrics {
    latencies: Mutex<FnvHashMap<PeerId, f64>>,
}

impl Metrics {
    pub fn new() -> Metrics {
        Metrics::default()
    }

    pub fn record_latency(&self, peer: &PeerId, latency: Duration) {
        let sample = latency.as_secs_f64();
        let mut latencies = self.latencies.lock();
        latencies
            .entry(peer.clone())
            .and_modify(|ewma| *ewma = (1.0 - SMOOTHING) * *ewma + SMOOTHING * sample)
            .or_insert(sample);
    }

    pub fn latency_ewma(&self, peer: &PeerId) -> Option<Duration> {
        self.latencies.lock().get(peer).map(|secs| Duration::from_secs_f64(*secs))
    }

    pub fn remove_peer(&self, peer: &PeerId) {
        self.latencies.lock().remove(peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_is_taken_verbatim() {
        let metrics = Metrics::new();
        let peer = PeerId::random();
        metrics.record_latency(&peer, Duration::from_millis(100));
        assert_eq!(metrics.latency_ewma(&peer), Some(Duration::from_millis(100)));
    }

    #[test]
    fn later_samples_move_the_average_slowly() {
        let metrics = Metrics::new();
        let peer = PeerId::random();
        metrics.record_latency(&peer, Duration::from_millis(100));
        metrics.record_latency(&peer, Duration::from_millis(200));
        let ewma = metrics.latency_ewma(&peer).unwrap();
        assert_eq!(ewma, Duration::from_millis(110));
    }

    #[test]
    fn unknown_peer_has_no_latency() {
        let metrics = Metrics::new();
        assert_eq!(metrics.latency_ewma(&PeerId::random()), None);
    }
}
