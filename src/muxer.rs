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

//! Listener side of the negotiation.
//!
//! A [`Muxer`] owns the handlers of all protocols the listener supports and
//! drives the negotiation against an incoming stream:
//!
//! 1. send `/multistream/1.0.0` and expect the same back,
//! 2. answer `ls` with the protocol list,
//! 3. answer unknown protocols with `na`,
//! 4. echo a supported protocol and hand the stream to its handler.

use bytes::{BufMut, BytesMut};
use futures::io::AllowStdIo;
use log::{debug, trace};
use parking_lot::RwLock;
use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;

use crate::error::NegotiationError;
use crate::handler::{Handler, IHandler};
use crate::token::{encode_token, read_token, write_token_buffered};
use crate::{ReadEx, WriteEx, LS, NOT_AVAILABLE, PROTOCOL_ID};

/// The protocol agreed upon and the handler registered for it.
#[derive(Clone)]
pub struct NegotiationResult {
    protocol: String,
    handler: IHandler,
}

impl NegotiationResult {
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn handler(&self) -> &IHandler {
        &self.handler
    }
}

impl fmt::Debug for NegotiationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NegotiationResult").field("protocol", &self.protocol).finish()
    }
}

/// Handler registry and listener-side negotiation driver.
///
/// Lookups and listings share a read lock, adding and removing handlers takes
/// the write lock. At most one handler exists per protocol.
#[derive(Default)]
pub struct Muxer {
    handlers: RwLock<Vec<IHandler>>,
}

impl Muxer {
    pub fn new() -> Self {
        Muxer::default()
    }

    /// Registers `handler`, returning the handler it replaced, if any.
    ///
    /// A replaced protocol moves to the end of the listing order.
    pub fn add_handler<H>(&self, handler: H) -> Option<IHandler>
    where
        H: Handler + 'static,
    {
        self.add_shared_handler(Arc::new(handler))
    }

    pub fn add_shared_handler(&self, handler: IHandler) -> Option<IHandler> {
        let mut handlers = self.handlers.write();
        let old = handlers
            .iter()
            .position(|h| h.protocol() == handler.protocol())
            .map(|i| handlers.remove(i));
        trace!("adding handler for {}, replaced: {}", handler.protocol(), old.is_some());
        handlers.push(handler);
        old
    }

    /// Removes the handler of `protocol`.
    pub fn remove_handler(&self, protocol: &str) -> Option<IHandler> {
        let mut handlers = self.handlers.write();
        handlers
            .iter()
            .position(|h| h.protocol() == protocol)
            .map(|i| handlers.remove(i))
    }

    /// Removes exactly this handler instance, returns whether it was registered.
    pub fn remove(&self, handler: &IHandler) -> bool {
        let mut handlers = self.handlers.write();
        match handlers.iter().position(|h| Arc::ptr_eq(h, handler)) {
            Some(i) => {
                handlers.remove(i);
                true
            }
            None => false,
        }
    }

    pub fn find_handler(&self, protocol: &str) -> Option<IHandler> {
        self.handlers.read().iter().find(|h| h.protocol() == protocol).cloned()
    }

    /// Snapshot of the supported protocols in registration order.
    pub fn protocols(&self) -> Vec<String> {
        self.handlers.read().iter().map(|h| h.protocol().to_owned()).collect()
    }

    /// Encodes the `ls` response:
    /// `uvarint(len(block)) || block` with `block = uvarint(count) || token*count`.
    fn ls_message(&self) -> BytesMut {
        let protocols = self.protocols();

        let mut block = BytesMut::new();
        let mut uvi_buf = unsigned_varint::encode::u64_buffer();
        block.put_slice(unsigned_varint::encode::u64(protocols.len() as u64, &mut uvi_buf));
        for proto in &protocols {
            encode_token(&mut block, proto.as_bytes());
        }

        let mut msg = BytesMut::with_capacity(block.len() + 10);
        msg.put_slice(unsigned_varint::encode::u64(block.len() as u64, &mut uvi_buf));
        msg.put_slice(&block);
        msg
    }

    /// Writes the list of supported protocols to `writer`.
    pub async fn ls<W>(&self, writer: &mut W) -> Result<(), NegotiationError>
    where
        W: WriteEx + Send + ?Sized,
    {
        let msg = self.ls_message();
        writer.write_all2(&msg).await?;
        writer.flush2().await?;
        Ok(())
    }

    /// Runs the listener side of the negotiation.
    ///
    /// Returns `Ok(None)` when the dialer ends the negotiation without
    /// selecting a protocol. A dialer speaking another multistream version is
    /// fatal and the stream gets closed.
    pub async fn negotiate<S>(&self, stream: &mut S) -> Result<Option<NegotiationResult>, NegotiationError>
    where
        S: ReadEx + WriteEx + Send + ?Sized,
    {
        write_token_buffered(stream, PROTOCOL_ID.as_bytes()).await?;

        let version = read_token(stream).await?;
        if version != PROTOCOL_ID {
            debug!("Listener: incorrect version: {}", version);
            if let Err(e) = stream.close2().await {
                trace!("Listener: closing stream failed: {}", e);
            }
            return Err(NegotiationError::VersionMismatch(version));
        }

        loop {
            let token = read_token(stream).await?;
            match token.as_str() {
                "" => {
                    debug!("Listener: negotiation ended without a protocol");
                    return Ok(None);
                }
                LS => {
                    debug!("Listener: listing protocols");
                    self.ls(stream).await?;
                }
                _ => match self.find_handler(&token) {
                    Some(handler) => {
                        debug!("Listener: confirming protocol: {}", token);
                        write_token_buffered(stream, token.as_bytes()).await?;
                        return Ok(Some(NegotiationResult {
                            protocol: token,
                            handler,
                        }));
                    }
                    None => {
                        debug!("Listener: rejecting protocol: {}", token);
                        write_token_buffered(stream, NOT_AVAILABLE.as_bytes()).await?;
                    }
                },
            }
        }
    }

    /// Negotiates and hands the stream to the selected handler.
    ///
    /// Returns the handler's outcome, or `false` if nothing was selected.
    pub async fn handle<S>(&self, stream: &mut S) -> Result<bool, NegotiationError>
    where
        S: ReadEx + WriteEx + Send,
    {
        match self.negotiate(stream).await? {
            Some(result) => Ok(result.handler.handle(&result.protocol, stream).await),
            None => Ok(false),
        }
    }

    /// Blocking version of [`Muxer::ls`].
    pub fn ls_blocking<W>(&self, writer: &mut W) -> Result<(), NegotiationError>
    where
        W: Write + Send + ?Sized,
    {
        let msg = self.ls_message();
        writer.write_all(&msg)?;
        writer.flush()?;
        Ok(())
    }

    /// Blocking version of [`Muxer::negotiate`].
    pub fn negotiate_blocking<S>(&self, stream: &mut S) -> Result<Option<NegotiationResult>, NegotiationError>
    where
        S: Read + Write + Send + ?Sized,
    {
        futures::executor::block_on(self.negotiate(&mut AllowStdIo::new(stream)))
    }

    /// Blocking version of [`Muxer::handle`].
    pub fn handle_blocking<S>(&self, stream: &mut S) -> Result<bool, NegotiationError>
    where
        S: Read + Write + Send,
    {
        match self.negotiate_blocking(stream)? {
            Some(result) => Ok(result.handler.handle_blocking(&result.protocol, stream)),
            None => Ok(false),
        }
    }
}

impl fmt::Debug for Muxer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Muxer").field("protocols", &self.protocols()).finish()
    }
}
