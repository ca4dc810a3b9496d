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

//! Per-stream state and the stream handle handed to users.

use bytes::{Buf, Bytes, BytesMut};
use futures::channel::mpsc;
use futures::prelude::*;
use log::trace;
use parking_lot::Mutex;
use peerlink_core::muxing::MuxedStream;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use crate::frame::{Frame, Flags, ACK, FIN, RST};
use crate::session::SessionShared;

/// Lifecycle of a stream. Moves monotonically towards `Finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Init,
    SynSent,
    SynReceived,
    Established,
    Finished,
}

/// State of one direction of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Half {
    Open,
    Closed,
    Reset,
}

pub(crate) struct StreamState {
    pub(crate) id: u32,
    pub(crate) inner: Mutex<StreamInner>,
}

pub(crate) struct StreamInner {
    pub(crate) phase: Phase,
    pub(crate) read_half: Half,
    pub(crate) write_half: Half,
    /// Bytes we may still send before the remote must open its window.
    pub(crate) send_window: u32,
    /// Bytes the remote may still send before we must open our window.
    pub(crate) recv_window: u32,
    /// Bytes consumed locally and not yet re-advertised.
    pub(crate) window_debt: u32,
    pub(crate) buffer: BytesMut,
    pub(crate) read_waker: Option<Waker>,
    pub(crate) write_waker: Option<Waker>,
}

impl StreamState {
    pub(crate) fn new(id: u32, phase: Phase, window: u32) -> Arc<StreamState> {
        Arc::new(StreamState {
            id,
            inner: Mutex::new(StreamInner {
                phase,
                read_half: Half::Open,
                write_half: Half::Open,
                send_window: window,
                recv_window: window,
                window_debt: 0,
                buffer: BytesMut::new(),
                read_waker: None,
                write_waker: None,
            }),
        })
    }

    /// Applies an inbound DATA frame. Returns `Err` on a flow-control
    /// violation, which is fatal to the session.
    pub(crate) fn on_data(&self, body: Bytes, flags: Flags) -> Result<(), ()> {
        let mut inner = self.inner.lock();
        if flags.contains(RST) {
            inner.reset();
            return Ok(());
        }
        if flags.contains(ACK) && inner.phase == Phase::SynSent {
            inner.phase = Phase::Established;
        }
        if !body.is_empty() {
            if body.len() as u32 > inner.recv_window {
                return Err(());
            }
            inner.recv_window -= body.len() as u32;
            inner.buffer.extend_from_slice(&body);
        }
        if flags.contains(FIN) {
            inner.close_read();
        }
        inner.wake_reader();
        Ok(())
    }

    /// Applies an inbound WINDOW_UPDATE frame.
    pub(crate) fn on_window_update(&self, delta: u32, flags: Flags) {
        let mut inner = self.inner.lock();
        if flags.contains(RST) {
            inner.reset();
            return;
        }
        if flags.contains(ACK) && inner.phase == Phase::SynSent {
            inner.phase = Phase::Established;
        }
        if flags.contains(FIN) {
            inner.close_read();
            inner.wake_reader();
        }
        inner.send_window = inner.send_window.saturating_add(delta);
        inner.wake_writer();
    }

    /// Tears the stream down without notifying the remote. Used when the
    /// session itself goes away.
    pub(crate) fn force_reset(&self) {
        self.inner.lock().reset();
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.inner.lock().phase == Phase::Finished
    }
}

impl StreamInner {
    fn close_read(&mut self) {
        if self.read_half == Half::Open {
            self.read_half = Half::Closed;
        }
        self.maybe_finish();
    }

    fn reset(&mut self) {
        if self.read_half == Half::Open {
            self.read_half = Half::Reset;
        }
        if self.write_half == Half::Open {
            self.write_half = Half::Reset;
        }
        self.buffer.clear();
        self.phase = Phase::Finished;
        self.wake_reader();
        self.wake_writer();
    }

    pub(crate) fn maybe_finish(&mut self) {
        if self.read_half != Half::Open && self.write_half != Half::Open {
            self.phase = Phase::Finished;
        }
    }

    fn wake_reader(&mut self) {
        if let Some(waker) = self.read_waker.take() {
            waker.wake();
        }
    }

    fn wake_writer(&mut self) {
        if let Some(waker) = self.write_waker.take() {
            waker.wake();
        }
    }
}

/// A logical stream over a yamux session.
///
/// Dropping the handle resets the stream unless both halves were already
/// closed.
pub struct YamuxStream {
    state: Arc<StreamState>,
    session: Arc<SessionShared>,
    data_tx: mpsc::Sender<Frame>,
}

impl YamuxStream {
    pub(crate) fn new(
        state: Arc<StreamState>,
        session: Arc<SessionShared>,
        data_tx: mpsc::Sender<Frame>,
    ) -> YamuxStream {
        YamuxStream { state, session, data_tx }
    }

    pub fn id(&self) -> u32 {
        self.state.id
    }

    fn send_reset(&self) {
        let mut inner = self.state.inner.lock();
        if inner.phase == Phase::Finished {
            return;
        }
        let notify = inner.read_half == Half::Open || inner.write_half == Half::Open;
        inner.reset();
        drop(inner);
        if notify {
            self.session.control_send(Frame::window_update(self.state.id, RST, 0));
        }
        self.session.remove_stream(self.state.id);
    }
}

impl AsyncRead for YamuxStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        let this = self.get_mut();
        let mut inner = this.state.inner.lock();
        if !inner.buffer.is_empty() {
            let n = buf.len().min(inner.buffer.len());
            buf[..n].copy_from_slice(&inner.buffer[..n]);
            inner.buffer.advance(n);
            inner.window_debt += n as u32;
            // Re-advertise consumed bytes once the buffer drains or the debt
            // grows past half the initial window.
            let threshold = this.session.config.initial_stream_window / 2;
            if inner.read_half == Half::Open
                && (inner.buffer.is_empty() || inner.window_debt >= threshold)
            {
                let delta = inner.window_debt;
                inner.window_debt = 0;
                inner.recv_window = inner.recv_window.saturating_add(delta);
                trace!("stream {}: window update of {} bytes", this.state.id, delta);
                this.session
                    .control_send(Frame::window_update(this.state.id, Flags::default(), delta));
            }
            return Poll::Ready(Ok(n));
        }
        match inner.read_half {
            Half::Reset => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "stream reset",
            ))),
            Half::Closed => Poll::Ready(Ok(0)),
            Half::Open => {
                inner.read_waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl AsyncWrite for YamuxStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        let this = self.get_mut();
        {
            let inner = this.state.inner.lock();
            match inner.write_half {
                Half::Closed => {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "write half is closed",
                    )))
                }
                Half::Reset => {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::ConnectionReset,
                        "stream reset",
                    )))
                }
                Half::Open => {}
            }
        }
        // Reserve a slot on the session pipe before consuming window.
        match this.data_tx.poll_ready(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Err(_)) => {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "session is shut down",
                )))
            }
            Poll::Ready(Ok(())) => {}
        }
        let n = {
            let mut inner = this.state.inner.lock();
            if inner.send_window == 0 {
                inner.write_waker = Some(cx.waker().clone());
                return Poll::Pending;
            }
            let n = (buf.len() as u32)
                .min(inner.send_window)
                .min(this.session.config.max_message_size as u32) as usize;
            inner.send_window -= n as u32;
            n
        };
        let frame =
            Frame::data(this.state.id, Flags::default(), Bytes::copy_from_slice(&buf[..n]));
        match this.data_tx.start_send(frame) {
            Ok(()) => Poll::Ready(Ok(n)),
            Err(_) => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "session is shut down",
            ))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // Frames are flushed by the session's output loop as they are
        // dequeued.
        Poll::Ready(Ok(()))
    }

    /// Half-closes the write side with a FIN.
    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        {
            let inner = this.state.inner.lock();
            if inner.write_half != Half::Open {
                return Poll::Ready(Ok(()));
            }
        }
        match this.data_tx.poll_ready(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Err(_)) => return Poll::Ready(Ok(())),
            Poll::Ready(Ok(())) => {}
        }
        let _ = this.data_tx.start_send(Frame::window_update(this.state.id, FIN, 0));
        let mut inner = this.state.inner.lock();
        inner.write_half = Half::Closed;
        inner.maybe_finish();
        let finished = inner.phase == Phase::Finished;
        drop(inner);
        if finished {
            this.session.remove_stream(this.state.id);
        }
        Poll::Ready(Ok(()))
    }
}

impl MuxedStream for YamuxStream {
    fn id(&self) -> u32 {
        self.state.id
    }

    fn reset(&self) {
        self.send_reset()
    }
}

impl Drop for YamuxStream {
    fn drop(&mut self) {
        self.send_reset()
    }
}

impl std::fmt::Debug for YamuxStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.state.inner.lock();
        f.debug_struct("YamuxStream")
            .field("id", &self.state.id)
            .field("phase", &inner.phase)
            .field("read_half", &inner.read_half)
            .field("write_half", &inner.write_half)
            .field("send_window", &inner.send_window)
            .finish()
    }
}
