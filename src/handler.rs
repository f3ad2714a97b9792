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

//! Protocol handlers.
//!
//! A handler is registered into a [`Muxer`](crate::Muxer) under the protocol
//! it serves. Once the muxer has agreed on that protocol with the dialer, the
//! handler is given the negotiated protocol name and the raw stream.
//!
//! > **Note**: Handler is an async trait and can be made into a trait object.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::io::AllowStdIo;
use log::warn;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::thread;

use crate::{ReadWriteEx, SyncStream};

#[async_trait]
pub trait Handler: Send + Sync {
    /// The protocol this handler is registered for.
    fn protocol(&self) -> &str;

    /// Handles a negotiated async stream, returns whether handling succeeded.
    async fn handle(&self, protocol: &str, stream: &mut dyn ReadWriteEx) -> bool;

    /// Handles a negotiated blocking stream.
    ///
    /// Defaults to driving [`Handler::handle`] to completion on the calling
    /// thread.
    fn handle_blocking(&self, protocol: &str, stream: &mut dyn SyncStream) -> bool {
        let mut io = AllowStdIo::new(stream);
        futures::executor::block_on(self.handle(protocol, &mut io))
    }
}

pub type IHandler = Arc<dyn Handler>;

pub type HandleFn = Box<dyn Fn(&str, &mut dyn SyncStream) -> bool + Send + Sync>;

pub type AsyncHandleFn = Box<dyn for<'a> Fn(String, &'a mut dyn ReadWriteEx) -> BoxFuture<'a, bool> + Send + Sync>;

/// A handler made of plain functions.
///
/// Either function may be missing. The blocking capability falls back to the
/// async function and vice versa; a handler without any function refuses
/// every stream.
pub struct FuncHandler {
    protocol: String,
    handle: Option<HandleFn>,
    handle_async: Option<AsyncHandleFn>,
}

impl FuncHandler {
    pub fn new(protocol: impl Into<String>) -> Self {
        FuncHandler {
            protocol: protocol.into(),
            handle: None,
            handle_async: None,
        }
    }

    /// Sets the blocking handle function.
    pub fn on_handle<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &mut dyn SyncStream) -> bool + Send + Sync + 'static,
    {
        self.handle = Some(Box::new(f));
        self
    }

    /// Sets the async handle function.
    ///
    /// The function receives an owned copy of the negotiated protocol so that
    /// it can move it into the returned future.
    pub fn on_handle_async<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(String, &'a mut dyn ReadWriteEx) -> BoxFuture<'a, bool> + Send + Sync + 'static,
    {
        self.handle_async = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for FuncHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FuncHandler")
            .field("protocol", &self.protocol)
            .field("handle", &self.handle.is_some())
            .field("handle_async", &self.handle_async.is_some())
            .finish()
    }
}

#[async_trait]
impl Handler for FuncHandler {
    fn protocol(&self) -> &str {
        &self.protocol
    }

    async fn handle(&self, protocol: &str, stream: &mut dyn ReadWriteEx) -> bool {
        if let Some(f) = &self.handle_async {
            return f(protocol.to_owned(), stream).await;
        }
        match &self.handle {
            // The blocking function drives the stream on a helper thread, the
            // calling thread may already be inside an executor.
            Some(f) => thread::scope(|scope| {
                let mut io = BlockingIo(stream);
                scope
                    .spawn(move || f(protocol, &mut io))
                    .join()
                    .unwrap_or_else(|_| {
                        warn!("blocking handler for {} panicked", protocol);
                        false
                    })
            }),
            None => false,
        }
    }

    fn handle_blocking(&self, protocol: &str, stream: &mut dyn SyncStream) -> bool {
        if let Some(f) = &self.handle {
            return f(protocol, stream);
        }
        match &self.handle_async {
            Some(f) => {
                let mut io = AllowStdIo::new(stream);
                futures::executor::block_on(f(protocol.to_owned(), &mut io))
            }
            None => false,
        }
    }
}

/// Blocking `std::io` view of an async stream.
///
/// Every call blocks the current thread until the async operation completes,
/// so it must not be used from within an executor.
struct BlockingIo<'a>(&'a mut dyn ReadWriteEx);

impl io::Read for BlockingIo<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        futures::executor::block_on(self.0.read2(buf))
    }
}

impl io::Write for BlockingIo<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        futures::executor::block_on(self.0.write2(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        futures::executor::block_on(self.0.flush2())
    }
}
