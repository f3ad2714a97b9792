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

//! Blocking counterparts of the token and dialer primitives.
//!
//! Each function drives its async twin to completion on the calling thread,
//! so both behave the same on the wire. None of them may be called from
//! within an executor.

use futures::executor::block_on;
use futures::io::AllowStdIo;
use std::io::{self, Read, Write};

use crate::error::NegotiationError;
use crate::lazy::{Config, Direction};
use crate::{negotiator, token, ReadEx, WriteEx};

pub fn read_token<S>(stream: &mut S) -> Result<String, NegotiationError>
where
    S: Read + Write + Send + ?Sized,
{
    block_on(token::read_token(&mut AllowStdIo::new(stream)))
}

pub fn write_token<W>(writer: &mut W, payload: &[u8]) -> Result<(), NegotiationError>
where
    W: Write + Send + ?Sized,
{
    block_on(token::write_token(&mut AllowStdIo::new(writer), payload))
}

pub fn write_token_buffered<W>(writer: &mut W, payload: &[u8]) -> Result<(), NegotiationError>
where
    W: Write + Send + ?Sized,
{
    block_on(token::write_token_buffered(&mut AllowStdIo::new(writer), payload))
}

pub fn handshake<S>(stream: &mut S) -> Result<(), NegotiationError>
where
    S: Read + Write + Send + ?Sized,
{
    block_on(negotiator::handshake(&mut AllowStdIo::new(stream)))
}

pub fn try_select<S>(stream: &mut S, protocol: &str) -> Result<bool, NegotiationError>
where
    S: Read + Write + Send + ?Sized,
{
    block_on(negotiator::try_select(&mut AllowStdIo::new(stream), protocol))
}

pub fn select_one_of<S, P>(stream: &mut S, protocols: &[P]) -> Result<String, NegotiationError>
where
    S: Read + Write + Send + ?Sized,
    P: AsRef<str> + Sync,
{
    block_on(negotiator::select_one_of(&mut AllowStdIo::new(stream), protocols))
}

pub fn select_proto_or_fail<S>(stream: &mut S, protocol: &str) -> Result<(), NegotiationError>
where
    S: Read + Write + Send + ?Sized,
{
    block_on(negotiator::select_proto_or_fail(&mut AllowStdIo::new(stream), protocol))
}

pub fn list_protocols<S>(stream: &mut S) -> Result<Vec<String>, NegotiationError>
where
    S: Read + Write + Send + ?Sized,
{
    block_on(negotiator::list_protocols(&mut AllowStdIo::new(stream)))
}

/// Blocking counterpart of [`crate::Multistream`].
///
/// The handshake runs on the first read or write, like the async wrapper.
/// Reads and writes through clones share the underlying stream and take
/// turns on it. The handshake timeout cannot interrupt a blocked read,
/// use the stream's own read timeout for that.
pub struct Multistream<S>
where
    S: Read + Write + Send + Unpin + 'static,
{
    inner: crate::Multistream<AllowStdIo<S>>,
}

impl<S> Clone for Multistream<S>
where
    S: Read + Write + Send + Unpin + 'static,
{
    fn clone(&self) -> Self {
        Multistream {
            inner: self.inner.clone(),
        }
    }
}

impl<S> Multistream<S>
where
    S: Read + Write + Send + Unpin + 'static,
{
    /// Wraps `stream`, announcing and expecting only `protocol`.
    pub fn create(stream: S, protocol: impl Into<String>) -> Self {
        Multistream {
            inner: crate::Multistream::create(AllowStdIo::new(stream), protocol),
        }
    }

    /// Wraps `stream`, announcing and expecting the multistream version
    /// followed by `protocol`.
    pub fn create_select(stream: S, protocol: impl Into<String>) -> Self {
        Multistream {
            inner: crate::Multistream::create_select(AllowStdIo::new(stream), protocol),
        }
    }

    pub fn with_config(stream: S, protocols: Vec<String>, config: Config) -> Self {
        Multistream {
            inner: crate::Multistream::with_config(AllowStdIo::new(stream), protocols, config),
        }
    }

    pub fn protocols(&self) -> &[String] {
        self.inner.protocols()
    }

    /// Runs the handshake now instead of on first use.
    pub fn handshake(&self, dir: Direction) -> Result<(), NegotiationError> {
        block_on(self.inner.handshake(dir))
    }

    pub fn is_negotiated(&self) -> bool {
        self.inner.is_negotiated()
    }
}

impl<S> Read for Multistream<S>
where
    S: Read + Write + Send + Unpin + 'static,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        block_on(self.inner.read2(buf))
    }
}

impl<S> Write for Multistream<S>
where
    S: Read + Write + Send + Unpin + 'static,
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        block_on(self.inner.write2(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        block_on(self.inner.flush2())
    }
}
