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

//! A typed event bus.
//!
//! Every event type gets a hot broadcast channel: publishing clones the
//! event into each live subscription, subscriptions only see events
//! published after they were opened, and a dropped subscription is pruned on
//! the next publish. Delivery order follows publish order per publisher.

use fnv::FnvHashMap;
use futures::channel::mpsc;
use futures::prelude::*;
use parking_lot::Mutex;
use std::any::{Any, TypeId};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

#[derive(Clone, Default)]
pub struct EventBus {
    topics: Arc<Mutex<FnvHashMap<TypeId, Box<dyn Any + Send>>>>,
}

struct Topic<E> {
    subscribers: Vec<mpsc::UnboundedSender<E>>,
}

impl EventBus {
    pub fn new() -> EventBus {
        EventBus::default()
    }

    /// Opens a subscription for events of type `E`.
    pub fn subscribe<E: Clone + Send + 'static>(&self) -> Subscription<E> {
        let (tx, rx) = mpsc::unbounded();
        let mut topics = self.topics.lock();
        let topic = topics
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Box::new(Topic::<E> { subscribers: Vec::new() }));
        topic
            .downcast_mut::<Topic<E>>()
            .expect("topic is keyed by the event's TypeId")
            .subscribers
            .push(tx);
        Subscription { inner: rx }
    }

    /// Delivers `event` to every live subscriber of its type.
    pub fn publish<E: Clone + Send + 'static>(&self, event: E) {
        let mut topics = self.topics.lock();
        if let Some(topic) = topics.get_mut(&TypeId::of::<E>()) {
            let topic = topic
                .downcast_mut::<Topic<E>>()
                .expect("topic is keyed by the event's TypeId");
            topic.subscribers.retain(|tx| tx.unbounded_send(event.clone()).is_ok());
        }
    }
}

/// A live stream of events of one type.
pub struct Subscription<E> {
    inner: mpsc::UnboundedReceiver<E>,
}

impl<E> Stream for Subscription<E> {
    type Item = E;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<E>> {
        self.inner.poll_next_unpin(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    #[derive(Debug, Clone, PartialEq)]
    struct Ping(u32);

    #[derive(Debug, Clone, PartialEq)]
    struct Pong(u32);

    #[test]
    fn subscribers_receive_their_type_only() {
        block_on(async {
            let bus = EventBus::new();
            let mut pings = bus.subscribe::<Ping>();
            let mut pongs = bus.subscribe::<Pong>();
            bus.publish(Ping(1));
            bus.publish(Pong(2));
            bus.publish(Ping(3));
            assert_eq!(pings.next().await, Some(Ping(1)));
            assert_eq!(pings.next().await, Some(Ping(3)));
            assert_eq!(pongs.next().await, Some(Pong(2)));
        })
    }

    #[test]
    fn late_subscribers_miss_earlier_events() {
        block_on(async {
            let bus = EventBus::new();
            bus.publish(Ping(1));
            let mut sub = bus.subscribe::<Ping>();
            bus.publish(Ping(2));
            assert_eq!(sub.next().await, Some(Ping(2)));
        })
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let sub = bus.subscribe::<Ping>();
        drop(sub);
        bus.publish(Ping(1));
        bus.publish(Ping(2));
        assert!(bus.topics.lock().len() == 1);
    }
}
