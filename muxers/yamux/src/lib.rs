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

//! A yamux-style stream multiplexer.
//!
//! Carries many logical, flow-controlled, half-closable streams over one
//! ordered byte pipe, with keep-alive pings, round-trip measurement and
//! orderly go-away shutdown. See [`YamuxConfig`] for the tunables.

mod error;
mod frame;
mod session;
mod stream;

pub use error::{ConfigError, ConnectionError, FrameDecodeError};
pub use session::YamuxSession;
pub use stream::YamuxStream;

use std::sync::Arc;
use std::time::Duration;

use peerlink_core::muxing::{Multiplexer, Pipe, StreamMuxer};
use peerlink_core::{Direction, Executor};

pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;
pub const DEFAULT_INITIAL_STREAM_WINDOW: u32 = 256 * 1024;
pub const DEFAULT_MAX_STREAM_WINDOW: u32 = 16 * 1024 * 1024;
pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_CONNECTION_WRITE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_RECEIVE_PUSH_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_INCOMING_STREAMS: usize = 1000;
pub const DEFAULT_ACCEPT_BACKLOG: usize = 256;

#[derive(Debug, Clone)]
pub struct YamuxConfig {
    /// Largest DATA payload we send or accept.
    pub max_message_size: usize,
    /// Receive window each new stream starts with.
    pub initial_stream_window: u32,
    /// Upper bound a stream window may ever be tuned to.
    pub max_stream_window: u32,
    /// Interval of the keep-alive ping; `None` disables keep-alive.
    pub keep_alive_interval: Option<Duration>,
    /// Timeout for a single write to the session pipe, and for pings.
    pub connection_write_timeout: Duration,
    /// Grace period for a full accept backlog before an inbound stream is
    /// reset.
    pub receive_push_timeout: Duration,
    /// Inbound streams past this limit are answered with RST.
    pub max_incoming_streams: usize,
    /// Inbound streams queued for [`YamuxSession::accept_stream`].
    pub accept_backlog: usize,
}

impl Default for YamuxConfig {
    fn default() -> YamuxConfig {
        YamuxConfig {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            initial_stream_window: DEFAULT_INITIAL_STREAM_WINDOW,
            max_stream_window: DEFAULT_MAX_STREAM_WINDOW,
            keep_alive_interval: Some(DEFAULT_KEEP_ALIVE_INTERVAL),
            connection_write_timeout: DEFAULT_CONNECTION_WRITE_TIMEOUT,
            receive_push_timeout: DEFAULT_RECEIVE_PUSH_TIMEOUT,
            max_incoming_streams: DEFAULT_MAX_INCOMING_STREAMS,
            accept_backlog: DEFAULT_ACCEPT_BACKLOG,
        }
    }
}

impl YamuxConfig {
    /// Checks the configuration. Invalid values are fatal at construction.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_message_size == 0 {
            return Err(ConfigError::InvalidMessageSize);
        }
        if self.initial_stream_window < 64 * 1024
            || self.initial_stream_window > self.max_stream_window
        {
            return Err(ConfigError::InvalidWindow);
        }
        if self.accept_backlog == 0 {
            return Err(ConfigError::InvalidBacklog);
        }
        if self.max_incoming_streams == 0 {
            return Err(ConfigError::InvalidStreamLimit);
        }
        Ok(())
    }
}

impl Multiplexer for YamuxConfig {
    fn upgrade(
        &self,
        io: Pipe,
        direction: Direction,
        executor: Arc<dyn Executor>,
    ) -> Arc<dyn StreamMuxer> {
        Arc::new(YamuxSession::new(io, self.clone(), direction, executor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::prelude::*;
    use peerlink_core::transport::memory;
    use std::pin::Pin;

    fn executor() -> Arc<dyn Executor> {
        Arc::new(|future: Pin<Box<dyn Future<Output = ()> + Send>>| {
            async_std::task::spawn(future);
        })
    }

    fn session_pair(config: YamuxConfig) -> (YamuxSession, YamuxSession) {
        let (a, b) = memory::pipe();
        let exec = executor();
        let client = YamuxSession::new(a, config.clone(), Direction::Outbound, exec.clone());
        let server = YamuxSession::new(b, config, Direction::Inbound, exec);
        (client, server)
    }

    fn quiet_config() -> YamuxConfig {
        // Keep-alive off so tests control all traffic.
        YamuxConfig { keep_alive_interval: None, ..YamuxConfig::default() }
    }

    #[async_std::test]
    async fn open_accept_and_exchange() {
        let (client, server) = session_pair(quiet_config());

        let mut out = client.open_stream().await.unwrap();
        out.write_all(b"hello").await.unwrap();

        let mut inc = server.accept_stream().await.unwrap();
        let mut buf = [0u8; 5];
        inc.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        inc.write_all(b"world").await.unwrap();
        out.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"world");
    }

    #[async_std::test]
    async fn stream_ids_have_parity() {
        let (client, server) = session_pair(quiet_config());

        let a = client.open_stream().await.unwrap();
        let b = client.open_stream().await.unwrap();
        assert_eq!(a.id(), 1);
        assert_eq!(b.id(), 3);

        let c = server.open_stream().await.unwrap();
        assert_eq!(c.id(), 2);

        // Make each stream visible on the remote before dropping anything.
        drop(a);
        drop(b);
        drop(c);
    }

    #[async_std::test]
    async fn half_close_still_allows_reading() {
        let (client, server) = session_pair(quiet_config());

        let mut out = client.open_stream().await.unwrap();
        out.write_all(b"request").await.unwrap();
        out.close().await.unwrap();

        let mut inc = server.accept_stream().await.unwrap();
        let mut buf = Vec::new();
        inc.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"request");

        // Our write half is closed, the remote's is not.
        inc.write_all(b"response").await.unwrap();
        let mut resp = [0u8; 8];
        out.read_exact(&mut resp).await.unwrap();
        assert_eq!(&resp, b"response");

        assert!(out.write_all(b"more").await.is_err());
    }

    #[async_std::test]
    async fn reset_is_observed_by_the_remote_reader() {
        let (client, server) = session_pair(quiet_config());

        let out = client.open_stream().await.unwrap();
        let mut inc = server.accept_stream().await.unwrap();

        use peerlink_core::muxing::MuxedStream as _;
        out.reset();

        let mut buf = [0u8; 1];
        let err = inc.read_exact(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::ConnectionReset);
    }

    #[async_std::test]
    async fn ping_measures_a_round_trip() {
        let (client, server) = session_pair(quiet_config());
        let rtt = client.ping().await.unwrap();
        assert!(rtt < Duration::from_secs(1));
        assert!(client.rtt().is_some());
        drop(server);
    }

    #[async_std::test]
    async fn concurrent_pings_share_one_flight() {
        let (client, server) = session_pair(quiet_config());
        let (a, b, c) = futures::join!(client.ping(), client.ping(), client.ping());
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(b.unwrap(), c.unwrap());
        drop(server);
    }

    #[async_std::test]
    async fn write_blocks_on_a_full_window_and_resumes() {
        let config = quiet_config();
        let window = config.initial_stream_window as usize;
        let (client, server) = session_pair(config);

        let mut out = client.open_stream().await.unwrap();
        let mut inc = server.accept_stream().await.unwrap();

        let total = 1024 * 1024;
        let written = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = written.clone();
        let writer = async_std::task::spawn(async move {
            let chunk = vec![7u8; 8 * 1024];
            let mut sent = 0;
            while sent < total {
                let n = chunk.len().min(total - sent);
                out.write_all(&chunk[..n]).await.unwrap();
                sent += n;
                counter.fetch_add(n, std::sync::atomic::Ordering::SeqCst);
            }
            out.close().await.unwrap();
        });

        // The reader is not consuming, so the writer must stall at the
        // initial window.
        async_std::task::sleep(Duration::from_millis(300)).await;
        let stalled_at = written.load(std::sync::atomic::Ordering::SeqCst);
        assert!(stalled_at <= window, "wrote {} past the {} window", stalled_at, window);
        assert!(stalled_at >= window / 2, "writer made no progress: {}", stalled_at);

        // Consuming data opens the window again; everything arrives intact.
        let mut received = Vec::with_capacity(total);
        let mut buf = vec![0u8; 16 * 1024];
        loop {
            let n = inc.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
        }
        writer.await;
        assert_eq!(received.len(), total);
        assert!(received.iter().all(|b| *b == 7));
    }

    #[async_std::test]
    async fn inbound_streams_past_the_limit_are_reset() {
        let config = YamuxConfig { max_incoming_streams: 2, ..quiet_config() };
        let (client, server) = session_pair(config);

        let first = client.open_stream().await.unwrap();
        let second = client.open_stream().await.unwrap();
        let mut third = client.open_stream().await.unwrap();

        let _a = server.accept_stream().await.unwrap();
        let _b = server.accept_stream().await.unwrap();

        let mut buf = [0u8; 1];
        let err = third.read_exact(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::ConnectionReset);

        drop(first);
        drop(second);
    }

    #[async_std::test]
    async fn close_stops_accepts_and_notifies_the_remote() {
        let (client, server) = session_pair(quiet_config());

        client.close();
        assert!(client.is_closed());
        assert!(matches!(
            client.open_stream().await.unwrap_err(),
            ConnectionError::SessionShutdown
        ));

        // The remote sees the go-away and refuses new outbound streams.
        async_std::task::sleep(Duration::from_millis(200)).await;
        assert!(matches!(
            server.open_stream().await.unwrap_err(),
            ConnectionError::RemoteGoAway | ConnectionError::SessionShutdown
        ));

        assert!(matches!(
            server.accept_stream().await.unwrap_err(),
            ConnectionError::SessionShutdown
        ));
    }

    #[test]
    fn config_validation_catches_nonsense() {
        assert!(YamuxConfig::default().validate().is_ok());
        let bad = YamuxConfig { initial_stream_window: 1024, ..YamuxConfig::default() };
        assert!(matches!(bad.validate(), Err(ConfigError::InvalidWindow)));
        let bad = YamuxConfig { accept_backlog: 0, ..YamuxConfig::default() };
        assert!(matches!(bad.validate(), Err(ConfigError::InvalidBacklog)));
        let bad = YamuxConfig { max_message_size: 0, ..YamuxConfig::default() };
        assert!(matches!(bad.validate(), Err(ConfigError::InvalidMessageSize)));
    }
}
