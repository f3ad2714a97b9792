// Copyright 2020 Netwarps Ltd.
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

//! Stream wrapper with a deferred handshake.
//!
//! [`Multistream`] sends its protocol tokens and validates the peer's tokens
//! the first time it is read from or written to. Either entry point completes
//! both halves of the exchange, since both peers have to announce themselves
//! and confirm the other side. The exchange runs once for the wrapper and all
//! of its clones.

use async_trait::async_trait;
use futures::future::{select, try_join, Either};
use futures::lock::{Mutex, MutexGuard};
use futures_timer::Delay;
use log::{debug, trace, warn};
use parking_lot::RwLock;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use crate::error::NegotiationError;
use crate::token::{read_token_frame, write_token, write_token_buffered};
use crate::{ReadEx, SplitEx, WriteEx, MESSAGE_TOO_LARGE, PROTOCOL_ID};

const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);

/// The stream operation that triggered the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// First touched by a write.
    Outgoing,
    /// First touched by a read.
    Incoming,
}

/// Configuration of a [`Multistream`].
#[derive(Debug, Clone)]
pub struct Config {
    handshake_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Config::default()
    }

    /// Bounds acquiring a handshake gate and each half of the exchange.
    pub fn set_handshake_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct State {
    sent: bool,
    received: bool,
    failed: bool,
}

struct Inner<R, W> {
    reader: Mutex<R>,
    writer: Mutex<W>,
    protocols: Vec<String>,
    state: RwLock<State>,
    send_gate: Mutex<()>,
    recv_gate: Mutex<()>,
    config: Config,
}

/// Resolves `fut` or fails with `HandshakeTimeout` after `dur`.
async fn timeout<F, T>(dur: Duration, dir: Direction, fut: F) -> Result<T, NegotiationError>
where
    F: Future<Output = Result<T, NegotiationError>>,
{
    futures::pin_mut!(fut);
    match select(fut, Delay::new(dur)).await {
        Either::Left((output, _)) => output,
        Either::Right(_) => {
            trace!("{:?} handshake timeout first", dir);
            Err(NegotiationError::HandshakeTimeout(dir))
        }
    }
}

impl<R, W> Inner<R, W>
where
    R: ReadEx + Send + Unpin,
    W: WriteEx + Send + Unpin,
{
    fn state(&self, dir: Direction) -> Result<State, NegotiationError> {
        let state = self
            .state
            .try_read_for(self.config.handshake_timeout)
            .ok_or(NegotiationError::HandshakeTimeout(dir))?;
        if state.failed {
            return Err(NegotiationError::HandshakeFailed);
        }
        Ok(*state)
    }

    fn update<F: FnOnce(&mut State)>(&self, dir: Direction, f: F) -> Result<(), NegotiationError> {
        let mut state = self
            .state
            .try_write_for(self.config.handshake_timeout)
            .ok_or(NegotiationError::HandshakeTimeout(dir))?;
        f(&mut state);
        Ok(())
    }

    /// Records the outcome of one half of the exchange. A failed half leaves
    /// the stream in an unknown position, so the wrapper is unusable after.
    fn finish<F: FnOnce(&mut State)>(
        &self,
        dir: Direction,
        res: Result<(), NegotiationError>,
        f: F,
    ) -> Result<(), NegotiationError> {
        match res {
            Ok(()) => self.update(dir, f),
            Err(e) => {
                debug!("{:?} handshake failed: {}", dir, e);
                self.state.write().failed = true;
                Err(e)
            }
        }
    }

    async fn lock_gate<'a>(&self, gate: &'a Mutex<()>, dir: Direction) -> Result<MutexGuard<'a, ()>, NegotiationError> {
        timeout(self.config.handshake_timeout, dir, async { Ok(gate.lock().await) }).await
    }

    async fn send(&self, dir: Direction) -> Result<(), NegotiationError> {
        let _gate = self.lock_gate(&self.send_gate, dir).await?;
        // someone else may have completed it while we waited
        if self.state(dir)?.sent {
            return Ok(());
        }

        let res = timeout(self.config.handshake_timeout, dir, async {
            let mut writer = self.writer.lock().await;
            for proto in &self.protocols {
                trace!("{:?} handshake: sending {}", dir, proto);
                write_token(&mut *writer, proto.as_bytes()).await?;
            }
            writer.flush2().await?;
            Ok(())
        })
        .await;
        self.finish(dir, res, |s| s.sent = true)
    }

    async fn receive(&self, dir: Direction) -> Result<(), NegotiationError> {
        let _gate = self.lock_gate(&self.recv_gate, dir).await?;
        if self.state(dir)?.received {
            return Ok(());
        }

        let res = timeout(self.config.handshake_timeout, dir, async {
            let mut reader = self.reader.lock().await;
            for expected in &self.protocols {
                let received = match read_token_frame(&mut *reader).await {
                    Err(NegotiationError::OversizedMessage(len)) => {
                        let mut writer = self.writer.lock().await;
                        if let Err(e) = write_token_buffered(&mut *writer, MESSAGE_TOO_LARGE.as_bytes()).await {
                            warn!("failed to notify peer about oversized message: {}", e);
                        }
                        return Err(NegotiationError::OversizedMessage(len));
                    }
                    other => other?,
                };
                trace!("{:?} handshake: received {}", dir, received);
                if received != *expected {
                    return Err(NegotiationError::ProtocolMismatch {
                        expected: expected.clone(),
                        received,
                    });
                }
            }
            Ok(())
        })
        .await;
        self.finish(dir, res, |s| s.received = true)
    }

    /// Completes both halves of the handshake, returns at once when done.
    async fn ensure(&self, dir: Direction) -> Result<(), NegotiationError> {
        let state = self.state(dir)?;
        if state.sent && state.received {
            return Ok(());
        }

        debug!("{:?} handshake: {:?}", dir, self.protocols);
        // Sending is polled first: over a blocking stream a pending read
        // blocks the thread and the peer would never see our tokens.
        try_join(self.send(dir), self.receive(dir)).await?;
        Ok(())
    }
}

/// A stream whose multistream handshake runs on first use.
///
/// Clones share the underlying stream and the handshake state.
pub struct Multistream<T: SplitEx> {
    inner: Arc<Inner<T::Reader, T::Writer>>,
}

impl<T: SplitEx> Clone for Multistream<T> {
    fn clone(&self) -> Self {
        Multistream {
            inner: self.inner.clone(),
        }
    }
}

impl<T: SplitEx> Multistream<T> {
    /// Wraps `stream`, announcing and expecting only `protocol`.
    pub fn create(stream: T, protocol: impl Into<String>) -> Self {
        Self::with_config(stream, vec![protocol.into()], Config::default())
    }

    /// Wraps `stream`, announcing and expecting the multistream version
    /// followed by `protocol`.
    pub fn create_select(stream: T, protocol: impl Into<String>) -> Self {
        Self::with_config(stream, vec![PROTOCOL_ID.to_owned(), protocol.into()], Config::default())
    }

    pub fn with_config(stream: T, protocols: Vec<String>, config: Config) -> Self {
        let (reader, writer) = stream.split2();
        Multistream {
            inner: Arc::new(Inner {
                reader: Mutex::new(reader),
                writer: Mutex::new(writer),
                protocols,
                state: RwLock::new(State::default()),
                send_gate: Mutex::new(()),
                recv_gate: Mutex::new(()),
                config,
            }),
        }
    }

    /// Protocol tokens exchanged by the handshake.
    pub fn protocols(&self) -> &[String] {
        &self.inner.protocols
    }

    /// Runs the handshake now instead of on first use.
    pub async fn handshake(&self, dir: Direction) -> Result<(), NegotiationError> {
        self.inner.ensure(dir).await
    }

    /// Whether both halves of the handshake completed.
    pub fn is_negotiated(&self) -> bool {
        let state = self.inner.state.read();
        state.sent && state.received
    }
}

#[async_trait]
impl<T> ReadEx for Multistream<T>
where
    T: SplitEx + Send + 'static,
{
    async fn read2(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.inner.ensure(Direction::Incoming).await?;
        let mut reader = self.inner.reader.lock().await;
        reader.read2(buf).await
    }
}

#[async_trait]
impl<T> WriteEx for Multistream<T>
where
    T: SplitEx + Send + 'static,
{
    async fn write2(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.ensure(Direction::Outgoing).await?;
        let mut writer = self.inner.writer.lock().await;
        writer.write2(buf).await
    }

    async fn flush2(&mut self) -> io::Result<()> {
        self.inner.writer.lock().await.flush2().await
    }

    async fn close2(&mut self) -> io::Result<()> {
        self.inner.writer.lock().await.close2().await
    }
}
