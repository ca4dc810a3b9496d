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

//! The yamux session: one byte pipe, many streams.
//!
//! A session runs three background tasks: an input loop decoding frames off
//! the pipe, an output loop writing queued frames (with a write timeout),
//! and an optional keep-alive loop. Streams and control paths communicate
//! with the output loop through two queues: a bounded one for ordered,
//! window-limited traffic (SYN/ACK, DATA, FIN) and an unbounded one for
//! order-free control frames (window updates, RST, ping, go-away).

use asynchronous_codec::Framed;
use futures::channel::{mpsc, oneshot};
use futures::future::{AbortHandle, Abortable, Either};
use futures::prelude::*;
use futures::stream::{SplitSink, SplitStream};
use futures_timer::Delay;
use log::{debug, error, trace, warn};
use nohash_hasher::IntMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use peerlink_core::muxing::{MuxerError, Pipe, StreamBox, StreamMuxer};
use peerlink_core::{Direction, Executor};

use crate::error::ConnectionError;
use crate::frame::{Frame, FrameCodec, FrameType, GoAwayCode, ACK, RST, SYN};
use crate::stream::{Phase, StreamState, YamuxStream};
use crate::YamuxConfig;

/// Capacity of the bounded queue between streams and the output loop.
const SEND_QUEUE_DEPTH: usize = 64;

pub(crate) struct SessionShared {
    pub(crate) config: YamuxConfig,
    mode: Direction,
    streams: Mutex<IntMap<u32, Arc<StreamState>>>,
    next_stream_id: AtomicU32,
    local_go_away: AtomicBool,
    remote_go_away: AtomicBool,
    closed: AtomicBool,
    control_tx: mpsc::UnboundedSender<Frame>,
    data_tx: mpsc::Sender<Frame>,
    accept_tx: Mutex<Option<mpsc::Sender<Arc<StreamState>>>>,
    accept_rx: futures::lock::Mutex<mpsc::Receiver<Arc<StreamState>>>,
    ping: Mutex<PingState>,
    /// Abort handles for the input and keep-alive loops.
    aborts: Mutex<Vec<AbortHandle>>,
    /// Abort handle for the output loop; only used on non-graceful teardown
    /// so a graceful close can still flush the GO_AWAY frame.
    writer_abort: Mutex<Option<AbortHandle>>,
}

struct PingState {
    next_id: u32,
    inflight: Option<InflightPing>,
    rtt: Option<Duration>,
}

struct InflightPing {
    id: u32,
    sent_at: Instant,
    waiters: Vec<oneshot::Sender<Duration>>,
}

impl SessionShared {
    pub(crate) fn control_send(&self, frame: Frame) {
        let _ = self.control_tx.unbounded_send(frame);
    }

    pub(crate) fn remove_stream(&self, id: u32) {
        self.streams.lock().remove(&id);
    }

    fn inbound_parity(&self) -> u32 {
        match self.mode {
            // We are the initiator, so remote streams carry even ids.
            Direction::Outbound => 0,
            Direction::Inbound => 1,
        }
    }

    fn inbound_stream_count(&self) -> usize {
        let parity = self.inbound_parity();
        self.streams.lock().keys().filter(|id| *id % 2 == parity).count()
    }

    /// Flags the session closed. Returns true for the caller that actually
    /// performed the transition.
    fn begin_shutdown(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    /// Releases everything the session owns. `abort_writer` is false on
    /// paths that still have a GO_AWAY frame in flight.
    fn cleanup(&self, abort_writer: bool) {
        for handle in self.aborts.lock().drain(..) {
            handle.abort();
        }
        if abort_writer {
            if let Some(handle) = self.writer_abort.lock().take() {
                handle.abort();
            }
        }
        *self.accept_tx.lock() = None;
        let streams: Vec<_> = self.streams.lock().drain().map(|(_, s)| s).collect();
        for stream in streams {
            stream.force_reset();
        }
        // Dropping the waiters cancels pending pings.
        self.ping.lock().inflight = None;
    }
}

/// A yamux session over one ordered byte pipe.
pub struct YamuxSession {
    shared: Arc<SessionShared>,
}

impl YamuxSession {
    /// Starts a session over `io`. `direction` decides stream id parity:
    /// the initiator allocates odd ids, the responder even ones.
    pub fn new(
        io: Pipe,
        config: YamuxConfig,
        direction: Direction,
        executor: Arc<dyn Executor>,
    ) -> YamuxSession {
        let framed = Framed::new(io, FrameCodec::new(config.max_message_size));
        let (output, input) = framed.split();

        let (control_tx, control_rx) = mpsc::unbounded();
        let (data_tx, data_rx) = mpsc::channel(SEND_QUEUE_DEPTH);
        let (accept_tx, accept_rx) = mpsc::channel(config.accept_backlog);

        let keep_alive = config.keep_alive_interval;
        let shared = Arc::new(SessionShared {
            config,
            mode: direction,
            streams: Mutex::new(IntMap::default()),
            next_stream_id: AtomicU32::new(match direction {
                Direction::Outbound => 1,
                Direction::Inbound => 2,
            }),
            local_go_away: AtomicBool::new(false),
            remote_go_away: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            control_tx,
            data_tx,
            accept_tx: Mutex::new(Some(accept_tx)),
            accept_rx: futures::lock::Mutex::new(accept_rx),
            ping: Mutex::new(PingState { next_id: 0, inflight: None, rtt: None }),
            aborts: Mutex::new(Vec::new()),
            writer_abort: Mutex::new(None),
        });

        let (writer_handle, writer_reg) = AbortHandle::new_pair();
        *shared.writer_abort.lock() = Some(writer_handle);
        let writer_shared = shared.clone();
        executor.exec_named(
            "yamux-output",
            Box::pin(async move {
                let frames = stream::select(control_rx, data_rx);
                let _ = Abortable::new(run_writer(writer_shared, output, frames), writer_reg).await;
            }),
        );

        let (reader_handle, reader_reg) = AbortHandle::new_pair();
        shared.aborts.lock().push(reader_handle);
        let reader_shared = shared.clone();
        executor.exec_named(
            "yamux-input",
            Box::pin(async move {
                let _ = Abortable::new(run_reader(reader_shared, input), reader_reg).await;
            }),
        );

        if let Some(interval) = keep_alive {
            let (ka_handle, ka_reg) = AbortHandle::new_pair();
            shared.aborts.lock().push(ka_handle);
            let ka_shared = shared.clone();
            executor.exec_named(
                "yamux-keepalive",
                Box::pin(async move {
                    let _ = Abortable::new(run_keepalive(ka_shared, interval), ka_reg).await;
                }),
            );
        }

        YamuxSession { shared }
    }

    /// Opens a new outbound stream.
    pub async fn open_stream(&self) -> Result<YamuxStream, ConnectionError> {
        open_stream_inner(&self.shared).await
    }

    /// Waits for the next inbound stream.
    pub async fn accept_stream(&self) -> Result<YamuxStream, ConnectionError> {
        accept_stream_inner(&self.shared).await
    }

    /// Measures the session round-trip time. Concurrent callers share the
    /// in-flight ping.
    pub async fn ping(&self) -> Result<Duration, ConnectionError> {
        ping_inner(&self.shared).await
    }

    /// The smoothed round-trip time over recent pings.
    pub fn rtt(&self) -> Option<Duration> {
        self.shared.ping.lock().rtt
    }

    /// Closes the session: sends `GO_AWAY(NORMAL)`, resets every stream and
    /// stops the background loops.
    pub fn close(&self) {
        if self.shared.begin_shutdown() {
            debug!("closing session");
            self.shared.local_go_away.store(true, Ordering::SeqCst);
            self.shared.control_send(Frame::go_away(GoAwayCode::Normal));
            self.shared.cleanup(false);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

impl Drop for YamuxSession {
    fn drop(&mut self) {
        self.close()
    }
}

async fn open_stream_inner(shared: &Arc<SessionShared>) -> Result<YamuxStream, ConnectionError> {
    if shared.closed.load(Ordering::SeqCst) || shared.local_go_away.load(Ordering::SeqCst) {
        return Err(ConnectionError::SessionShutdown);
    }
    if shared.remote_go_away.load(Ordering::SeqCst) {
        return Err(ConnectionError::RemoteGoAway);
    }
    let id = shared.next_stream_id.fetch_add(2, Ordering::SeqCst);
    let state = StreamState::new(id, Phase::Init, shared.config.initial_stream_window);
    shared.streams.lock().insert(id, state.clone());

    // The SYN travels on the ordered queue so it cannot be overtaken by the
    // stream's first DATA frame.
    let mut tx = shared.data_tx.clone();
    if tx.send(Frame::window_update(id, SYN, 0)).await.is_err() {
        shared.remove_stream(id);
        return Err(ConnectionError::SessionShutdown);
    }
    state.inner.lock().phase = Phase::SynSent;
    trace!("opened stream {}", id);
    Ok(YamuxStream::new(state, shared.clone(), shared.data_tx.clone()))
}

async fn accept_stream_inner(shared: &Arc<SessionShared>) -> Result<YamuxStream, ConnectionError> {
    let mut rx = shared.accept_rx.lock().await;
    match rx.next().await {
        Some(state) => Ok(YamuxStream::new(state, shared.clone(), shared.data_tx.clone())),
        None => Err(ConnectionError::SessionShutdown),
    }
}

async fn ping_inner(shared: &Arc<SessionShared>) -> Result<Duration, ConnectionError> {
    if shared.closed.load(Ordering::SeqCst) {
        return Err(ConnectionError::SessionShutdown);
    }
    let rx = {
        let mut ping = shared.ping.lock();
        let (tx, rx) = oneshot::channel();
        match &mut ping.inflight {
            Some(inflight) => inflight.waiters.push(tx),
            None => {
                let id = ping.next_id;
                ping.next_id = ping.next_id.wrapping_add(1);
                ping.inflight =
                    Some(InflightPing { id, sent_at: Instant::now(), waiters: vec![tx] });
                shared.control_send(Frame::ping(SYN, id));
            }
        }
        rx
    };
    match timeout(shared.config.connection_write_timeout, rx).await {
        Ok(Ok(rtt)) => Ok(rtt),
        Ok(Err(_)) => Err(ConnectionError::SessionShutdown),
        Err(()) => {
            shared.ping.lock().inflight = None;
            Err(ConnectionError::PingTimeout)
        }
    }
}

fn on_pong(shared: &SessionShared, id: u32) {
    let mut ping = shared.ping.lock();
    match ping.inflight.take() {
        Some(inflight) if inflight.id == id => {
            let rtt = inflight.sent_at.elapsed();
            ping.rtt = Some(match ping.rtt {
                Some(old) => (old + rtt) / 2,
                None => rtt,
            });
            for waiter in inflight.waiters {
                let _ = waiter.send(rtt);
            }
        }
        other => {
            debug!("ignoring unexpected pong {}", id);
            ping.inflight = other;
        }
    }
}

struct Fatal {
    code: Option<GoAwayCode>,
    error: ConnectionError,
}

async fn run_reader(shared: Arc<SessionShared>, mut input: SplitStream<Framed<Pipe, FrameCodec>>) {
    let fatal = loop {
        match input.next().await {
            Some(Ok(frame)) => match handle_frame(&shared, frame).await {
                Ok(()) => {}
                Err(fatal) => break fatal,
            },
            Some(Err(e)) => {
                break Fatal {
                    code: Some(GoAwayCode::ProtocolError),
                    error: ConnectionError::Decode(e),
                }
            }
            // Remote closed the pipe.
            None => break Fatal { code: None, error: ConnectionError::SessionShutdown },
        }
        if shared.closed.load(Ordering::SeqCst) {
            return;
        }
    };
    if shared.begin_shutdown() {
        debug!("session input loop ended: {}", fatal.error);
        if let Some(code) = fatal.code {
            shared.control_send(Frame::go_away(code));
            // The output loop exits after flushing the go-away.
            shared.cleanup(false);
        } else {
            shared.cleanup(true);
        }
    }
}

async fn handle_frame(shared: &Arc<SessionShared>, frame: Frame) -> Result<(), Fatal> {
    let header = frame.header;
    match header.ty {
        FrameType::Data | FrameType::WindowUpdate => {
            if header.flags.contains(SYN) {
                open_inbound(shared, header.stream_id).await?;
            }
            let state = shared.streams.lock().get(&header.stream_id).cloned();
            let state = match state {
                Some(state) => state,
                None => {
                    // Late frame for a stream we already forgot; quietly
                    // drop it.
                    trace!("frame for unknown stream {}", header.stream_id);
                    return Ok(());
                }
            };
            if header.ty == FrameType::Data {
                if state.on_data(frame.body, header.flags).is_err() {
                    return Err(Fatal {
                        code: Some(GoAwayCode::ProtocolError),
                        error: ConnectionError::Protocol(format!(
                            "stream {} exceeded its receive window",
                            header.stream_id
                        )),
                    });
                }
            } else {
                state.on_window_update(header.length, header.flags);
            }
            if state.is_finished() {
                shared.remove_stream(header.stream_id);
            }
            Ok(())
        }
        FrameType::Ping => {
            if header.flags.contains(SYN) {
                shared.control_send(Frame::ping(ACK, header.length));
            } else if header.flags.contains(ACK) {
                on_pong(shared, header.length);
            }
            Ok(())
        }
        FrameType::GoAway => match GoAwayCode::from_u32(header.length) {
            Some(GoAwayCode::Normal) => {
                debug!("remote is going away");
                shared.remote_go_away.store(true, Ordering::SeqCst);
                Ok(())
            }
            Some(code) => {
                error!("remote closed the session with {:?}", code);
                Err(Fatal {
                    code: None,
                    error: ConnectionError::Protocol(format!("remote go-away: {:?}", code)),
                })
            }
            None => Err(Fatal {
                code: Some(GoAwayCode::ProtocolError),
                error: ConnectionError::Protocol(format!(
                    "invalid go-away code {}",
                    header.length
                )),
            }),
        },
    }
}

/// Admits a remote-initiated stream.
async fn open_inbound(shared: &Arc<SessionShared>, id: u32) -> Result<(), Fatal> {
    if id % 2 != shared.inbound_parity() {
        return Err(Fatal {
            code: Some(GoAwayCode::ProtocolError),
            error: ConnectionError::Protocol(format!("invalid parity of inbound stream id {}", id)),
        });
    }
    if shared.streams.lock().contains_key(&id) {
        // Duplicate SYN; the flags are applied by the caller.
        return Ok(());
    }
    if shared.local_go_away.load(Ordering::SeqCst) {
        shared.control_send(Frame::window_update(id, RST, 0));
        return Ok(());
    }
    if shared.inbound_stream_count() >= shared.config.max_incoming_streams {
        warn!("rejecting inbound stream {}: stream limit reached", id);
        shared.control_send(Frame::window_update(id, RST, 0));
        return Ok(());
    }

    let state = StreamState::new(id, Phase::SynReceived, shared.config.initial_stream_window);
    shared.streams.lock().insert(id, state.clone());

    let mut ack_tx = shared.data_tx.clone();
    let _ = ack_tx.send(Frame::window_update(id, ACK, 0)).await;
    state.inner.lock().phase = Phase::Established;

    let accept_tx = shared.accept_tx.lock().clone();
    let mut accept_tx = match accept_tx {
        Some(tx) => tx,
        None => {
            shared.remove_stream(id);
            shared.control_send(Frame::window_update(id, RST, 0));
            return Ok(());
        }
    };
    match accept_tx.try_send(state.clone()) {
        Ok(()) => Ok(()),
        Err(e) if e.is_full() => {
            // Give a stalled acceptor a grace period before rejecting.
            let push = accept_tx.send(state);
            match timeout(shared.config.receive_push_timeout, push).await {
                Ok(Ok(())) => Ok(()),
                _ => {
                    warn!("rejecting inbound stream {}: accept backlog is full", id);
                    shared.remove_stream(id);
                    shared.control_send(Frame::window_update(id, RST, 0));
                    Ok(())
                }
            }
        }
        Err(_) => {
            shared.remove_stream(id);
            shared.control_send(Frame::window_update(id, RST, 0));
            Ok(())
        }
    }
}

async fn run_writer<S>(
    shared: Arc<SessionShared>,
    mut output: SplitSink<Framed<Pipe, FrameCodec>, Frame>,
    frames: S,
) where
    S: Stream<Item = Frame>,
{
    futures::pin_mut!(frames);
    while let Some(frame) = frames.next().await {
        let is_go_away = frame.is_go_away();
        match timeout(shared.config.connection_write_timeout, output.send(frame)).await {
            Ok(Ok(())) => {
                if is_go_away && shared.closed.load(Ordering::SeqCst) {
                    break;
                }
            }
            Ok(Err(e)) => {
                debug!("session output loop ended: {}", e);
                if shared.begin_shutdown() {
                    shared.cleanup(false);
                }
                break;
            }
            Err(()) => {
                warn!("write to session pipe timed out");
                let _ = timeout(
                    Duration::from_secs(1),
                    output.send(Frame::go_away(GoAwayCode::InternalError)),
                )
                .await;
                if shared.begin_shutdown() {
                    shared.cleanup(false);
                }
                break;
            }
        }
    }
    let _ = output.close().await;
}

async fn run_keepalive(shared: Arc<SessionShared>, interval: Duration) {
    let mut failures = 0u32;
    loop {
        Delay::new(interval).await;
        if shared.closed.load(Ordering::SeqCst) {
            return;
        }
        match ping_inner(&shared).await {
            Ok(rtt) => {
                trace!("keep-alive rtt {:?}", rtt);
                failures = 0;
            }
            Err(ConnectionError::SessionShutdown) => return,
            Err(e) => {
                failures += 1;
                warn!("keep-alive ping failed ({} in a row): {}", failures, e);
                if failures >= 2 {
                    error!("closing session: keep-alive timed out");
                    if shared.begin_shutdown() {
                        shared.cleanup(true);
                    }
                    return;
                }
            }
        }
    }
}

async fn timeout<F: Future>(duration: Duration, future: F) -> Result<F::Output, ()> {
    futures::pin_mut!(future);
    match futures::future::select(future, Delay::new(duration)).await {
        Either::Left((out, _)) => Ok(out),
        Either::Right(_) => Err(()),
    }
}

impl StreamMuxer for YamuxSession {
    fn open_stream(&self) -> future::BoxFuture<'static, Result<StreamBox, MuxerError>> {
        let shared = self.shared.clone();
        async move {
            open_stream_inner(&shared)
                .await
                .map(|s| Box::new(s) as StreamBox)
                .map_err(MuxerError::from)
        }
        .boxed()
    }

    fn accept_stream(&self) -> future::BoxFuture<'static, Result<StreamBox, MuxerError>> {
        let shared = self.shared.clone();
        async move {
            accept_stream_inner(&shared)
                .await
                .map(|s| Box::new(s) as StreamBox)
                .map_err(MuxerError::from)
        }
        .boxed()
    }

    fn ping(&self) -> future::BoxFuture<'static, Result<Duration, MuxerError>> {
        let shared = self.shared.clone();
        async move { ping_inner(&shared).await.map_err(MuxerError::from) }.boxed()
    }

    fn close(&self) -> future::BoxFuture<'static, Result<(), MuxerError>> {
        let session = YamuxSession { shared: self.shared.clone() };
        async move {
            session.close();
            Ok(())
        }
        .boxed()
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}
