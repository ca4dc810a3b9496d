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

//! Task spawning without committing to an async runtime.

use futures::executor::{ThreadPool, ThreadPoolBuilder};
use futures::prelude::*;
use std::pin::Pin;

/// Implemented on objects that can run a `Future` in the background.
pub trait Executor: Send + Sync {
    /// Runs the given future in the background until it ends.
    fn exec(&self, future: Pin<Box<dyn Future<Output = ()> + Send>>);

    /// Like [`Executor::exec`], with a task name for runtimes that can use
    /// one. The default implementation ignores the name.
    fn exec_named(&self, _name: &str, future: Pin<Box<dyn Future<Output = ()> + Send>>) {
        self.exec(future)
    }
}

impl<F> Executor for F
where
    F: Fn(Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync,
{
    fn exec(&self, future: Pin<Box<dyn Future<Output = ()> + Send>>) {
        self(future)
    }
}

/// An [`Executor`] backed by a `futures` thread pool.
pub struct ThreadPoolExecutor(ThreadPool);

impl ThreadPoolExecutor {
    pub fn new() -> std::io::Result<ThreadPoolExecutor> {
        ThreadPoolBuilder::new()
            .name_prefix("peerlink-task-")
            .create()
            .map(ThreadPoolExecutor)
    }
}

impl Executor for ThreadPoolExecutor {
    fn exec(&self, future: Pin<Box<dyn Future<Output = ()> + Send>>) {
        self.0.spawn_ok(future)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::oneshot;

    #[test]
    fn thread_pool_runs_tasks() {
        let executor = ThreadPoolExecutor::new().unwrap();
        let (tx, rx) = oneshot::channel();
        executor.exec(Box::pin(async move {
            let _ = tx.send(42);
        }));
        assert_eq!(futures::executor::block_on(rx), Ok(42));
    }
}
