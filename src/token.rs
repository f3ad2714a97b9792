// Copyright 2017 Parity Technologies (UK) Ltd.
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

//! Token framing.
//!
//! A token is `uvarint(len(payload) + 1) || payload || '\n'`. The declared
//! length includes the trailing newline, which is stripped from the value
//! handed back to the caller. A declared length of zero is an empty token and
//! terminates the caller's read loop.

use bytes::{BufMut, BytesMut};
use log::{debug, trace, warn};

use crate::error::NegotiationError;
use crate::{ReadEx, WriteEx, MAX_MESSAGE_SIZE, MESSAGE_TOO_LARGE};

/// Trailing byte of every token.
pub const DELIMITER: u8 = b'\n';

/// Appends the framed `payload` to `dst`.
pub fn encode_token(dst: &mut BytesMut, payload: &[u8]) {
    let mut uvi_buf = unsigned_varint::encode::u64_buffer();
    let uvi_len = unsigned_varint::encode::u64(payload.len() as u64 + 1, &mut uvi_buf);
    dst.reserve(uvi_len.len() + payload.len() + 1);
    dst.put_slice(uvi_len);
    dst.put_slice(payload);
    dst.put_u8(DELIMITER);
}

fn check_len(payload: &[u8]) -> Result<(), NegotiationError> {
    let len = payload.len() as u64 + 1;
    if len > MAX_MESSAGE_SIZE {
        return Err(NegotiationError::OversizedMessage(len));
    }
    Ok(())
}

/// Writes `payload` as a token with one write call per frame part.
///
/// Nothing is flushed, use [`write_token_buffered`] when several writers
/// share the stream.
pub async fn write_token<W>(writer: &mut W, payload: &[u8]) -> Result<(), NegotiationError>
where
    W: WriteEx + Send + ?Sized,
{
    check_len(payload)?;
    let mut uvi_buf = unsigned_varint::encode::u64_buffer();
    let uvi_len = unsigned_varint::encode::u64(payload.len() as u64 + 1, &mut uvi_buf);
    writer.write_all2(uvi_len).await?;
    writer.write_all2(payload).await?;
    writer.write_all2(&[DELIMITER]).await?;
    Ok(())
}

/// Builds the whole frame in memory, writes it in one shot and flushes.
pub async fn write_token_buffered<W>(writer: &mut W, payload: &[u8]) -> Result<(), NegotiationError>
where
    W: WriteEx + Send + ?Sized,
{
    check_len(payload)?;
    let mut buf = BytesMut::with_capacity(payload.len() + 4);
    encode_token(&mut buf, payload);
    writer.write_all2(&buf).await?;
    writer.flush2().await?;
    Ok(())
}

/// Reads an unsigned varint.
///
/// `Ok(None)` means the stream ended cleanly before the first byte.
pub(crate) async fn read_unsigned_varint<R>(reader: &mut R) -> Result<Option<u64>, NegotiationError>
where
    R: ReadEx + Send + ?Sized,
{
    let mut b = unsigned_varint::encode::u64_buffer();
    for i in 0..b.len() {
        let n = reader.read2(&mut b[i..i + 1]).await?;
        if n == 0 {
            if i == 0 {
                return Ok(None);
            }
            return Err(NegotiationError::TruncatedRead {
                expected: i + 1,
                received: i,
            });
        }
        if unsigned_varint::decode::is_last(b[i]) {
            let (len, _) = unsigned_varint::decode::u64(&b[..=i])
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            return Ok(Some(len));
        }
    }
    Err(std::io::Error::new(std::io::ErrorKind::InvalidData, unsigned_varint::decode::Error::Overflow).into())
}

/// Fills `buf` completely, short reads are retried until the stream ends.
pub(crate) async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), NegotiationError>
where
    R: ReadEx + Send + ?Sized,
{
    let mut off = 0;
    while off < buf.len() {
        let n = reader.read2(&mut buf[off..]).await?;
        if n == 0 {
            return Err(NegotiationError::TruncatedRead {
                expected: buf.len(),
                received: off,
            });
        }
        off += n;
        trace!("read token: {}/{} bytes", off, buf.len());
    }
    Ok(())
}

/// Reads one token without answering oversized frames.
///
/// Used where only the read half of a stream is available.
pub async fn read_token_frame<R>(reader: &mut R) -> Result<String, NegotiationError>
where
    R: ReadEx + Send + ?Sized,
{
    let len = match read_unsigned_varint(reader).await? {
        Some(len) => len,
        None => {
            trace!("read token: eof");
            return Ok(String::new());
        }
    };
    if len == 0 {
        return Ok(String::new());
    }
    if len > MAX_MESSAGE_SIZE {
        return Err(NegotiationError::OversizedMessage(len));
    }

    let mut buf = vec![0u8; len as usize];
    read_full(reader, &mut buf).await?;
    if buf.pop() != Some(DELIMITER) {
        return Err(NegotiationError::MissingTrailingNewline);
    }
    Ok(String::from_utf8(buf)?)
}

/// Reads one token.
///
/// An oversized frame is answered with a framed "Messages over 64k are not
/// allowed" message before the error is returned.
pub async fn read_token<S>(stream: &mut S) -> Result<String, NegotiationError>
where
    S: ReadEx + WriteEx + Send + ?Sized,
{
    match read_token_frame(stream).await {
        Err(NegotiationError::OversizedMessage(len)) => {
            debug!("rejecting token of {} bytes", len);
            if let Err(e) = write_token_buffered(stream, MESSAGE_TOO_LARGE.as_bytes()).await {
                warn!("failed to notify peer about oversized message: {}", e);
            }
            Err(NegotiationError::OversizedMessage(len))
        }
        other => other,
    }
}
