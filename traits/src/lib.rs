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

//! Duplex byte stream traits consumed by the multistream-select negotiation.
//!
//! `ReadEx` and `WriteEx` are the async side, implemented for every
//! `futures::io::AsyncRead`/`AsyncWrite` type. `SyncStream` is the blocking
//! side, implemented for every `std::io::Read + Write` type.

use async_trait::async_trait;
use futures::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use std::io;
use std::io::ErrorKind;

/// Read Trait for async/wait
///
#[async_trait]
pub trait ReadEx {
    /// Reads some bytes from the byte stream.
    ///
    /// On success, returns the total number of bytes read.
    ///
    /// If the return value is `Ok(n)`, then it must be guaranteed that
    /// `0 <= n <= buf.len()`. A nonzero `n` value indicates that the buffer has been
    /// filled with `n` bytes of data. If `n` is `0`, then it can indicate one of two
    /// scenarios:
    ///
    /// 1. This reader has reached its "end of file" and will likely no longer be able to
    ///    produce bytes.
    /// 2. The buffer specified was 0 bytes in length.
    async fn read2(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Reads the exact number of bytes requested.
    ///
    /// Fails with `ErrorKind::UnexpectedEof` if the stream ends first.
    async fn read_exact2<'a>(&'a mut self, buf: &'a mut [u8]) -> io::Result<()> {
        let mut buf_piece = buf;
        while !buf_piece.is_empty() {
            let n = self.read2(buf_piece).await?;
            if n == 0 {
                return Err(ErrorKind::UnexpectedEof.into());
            }

            let (_, rest) = buf_piece.split_at_mut(n);
            buf_piece = rest;
        }
        Ok(())
    }
}

/// Write Trait for async/wait
///
#[async_trait]
pub trait WriteEx {
    /// Attempt to write bytes from `buf` into the object.
    ///
    /// On success, returns `Ok(num_bytes_written)`.
    /// Otherwise, returns io::Error
    async fn write2(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Attempt to write the entire contents of data into object.
    ///
    /// The operation will not complete until all the data has been written.
    async fn write_all2(&mut self, buf: &[u8]) -> io::Result<()> {
        let mut buf_piece = buf;
        while !buf_piece.is_empty() {
            let n = self.write2(buf_piece).await?;
            if n == 0 {
                return Err(ErrorKind::WriteZero.into());
            }

            let (_, rest) = buf_piece.split_at(n);
            buf_piece = rest;
        }
        Ok(())
    }

    /// Attempt to flush the object, ensuring that any buffered data reach
    /// their destination.
    async fn flush2(&mut self) -> io::Result<()>;

    /// Attempt to close the object.
    async fn close2(&mut self) -> io::Result<()>;
}

/// A full duplex async stream, usable as a trait object.
pub trait ReadWriteEx: ReadEx + WriteEx + Send {}

impl<T: ReadEx + WriteEx + Send> ReadWriteEx for T {}

/// Splits a duplex stream into a read half and a write half which can be
/// driven concurrently from different tasks.
pub trait SplitEx {
    /// The read half.
    type Reader: ReadEx + Send + Unpin;
    /// The write half.
    type Writer: WriteEx + Send + Unpin;

    fn split2(self) -> (Self::Reader, Self::Writer);
}

/// A full duplex blocking stream, usable as a trait object.
pub trait SyncStream: io::Read + io::Write + Send {}

impl<T: io::Read + io::Write + Send> SyncStream for T {}

#[async_trait]
impl<T: AsyncRead + Unpin + Send> ReadEx for T {
    async fn read2(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        AsyncReadExt::read(self, buf).await
    }
}

#[async_trait]
impl<T: AsyncWrite + Unpin + Send> WriteEx for T {
    async fn write2(&mut self, buf: &[u8]) -> io::Result<usize> {
        AsyncWriteExt::write(self, buf).await
    }

    async fn flush2(&mut self) -> io::Result<()> {
        AsyncWriteExt::flush(self).await
    }

    async fn close2(&mut self) -> io::Result<()> {
        AsyncWriteExt::close(self).await
    }
}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> SplitEx for T {
    type Reader = ReadHalf<T>;
    type Writer = WriteHalf<T>;

    fn split2(self) -> (Self::Reader, Self::Writer) {
        AsyncReadExt::split(self)
    }
}
