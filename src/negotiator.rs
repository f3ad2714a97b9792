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

//! Dialer side of the negotiation.
//!
//! All functions operate directly on a duplex stream and keep no state
//! between calls.

use futures::io::Cursor;
use log::debug;
use std::io;

use crate::error::NegotiationError;
use crate::token::{read_full, read_token, read_token_frame, read_unsigned_varint, write_token_buffered};
use crate::{ReadEx, WriteEx, LS, MAX_MESSAGE_SIZE, NOT_AVAILABLE, PROTOCOL_ID};

/// Confirms the listener's multistream version and echoes it back.
pub async fn handshake<S>(stream: &mut S) -> Result<(), NegotiationError>
where
    S: ReadEx + WriteEx + Send + ?Sized,
{
    let token = read_token(stream).await?;
    if token != PROTOCOL_ID {
        debug!("Dialer: received mismatch in protocol id: {}", token);
        return Err(NegotiationError::VersionMismatch(token));
    }
    write_token_buffered(stream, PROTOCOL_ID.as_bytes()).await
}

/// Proposes `protocol`, returns whether the listener accepted it.
pub async fn try_select<S>(stream: &mut S, protocol: &str) -> Result<bool, NegotiationError>
where
    S: ReadEx + WriteEx + Send + ?Sized,
{
    write_token_buffered(stream, protocol.as_bytes()).await?;
    debug!("Dialer: Proposed protocol: {}", protocol);

    let token = read_token(stream).await?;
    match token.as_str() {
        t if t == protocol => {
            debug!("Dialer: Received confirmation for protocol: {}", protocol);
            Ok(true)
        }
        "" => {
            debug!("Dialer: Received no answer for protocol: {}", protocol);
            Ok(false)
        }
        NOT_AVAILABLE => {
            debug!("Dialer: Received rejection of protocol: {}", protocol);
            Ok(false)
        }
        _ => Err(NegotiationError::UnrecognizedResponse(token)),
    }
}

/// Handshakes, then tries each candidate in order until one is accepted.
pub async fn select_one_of<S, P>(stream: &mut S, protocols: &[P]) -> Result<String, NegotiationError>
where
    S: ReadEx + WriteEx + Send + ?Sized,
    P: AsRef<str> + Sync,
{
    handshake(stream).await?;

    for proto in protocols {
        if try_select(stream, proto.as_ref()).await? {
            return Ok(proto.as_ref().to_owned());
        }
    }

    Err(NegotiationError::UnsupportedProtocol(
        protocols.iter().map(|p| p.as_ref().to_owned()).collect(),
    ))
}

/// Handshakes and proposes a single protocol.
///
/// Whether the listener accepted the protocol is not reported, a rejected
/// protocol shows up as errors on the following I/O.
pub async fn select_proto_or_fail<S>(stream: &mut S, protocol: &str) -> Result<(), NegotiationError>
where
    S: ReadEx + WriteEx + Send + ?Sized,
{
    handshake(stream).await?;
    let _ = try_select(stream, protocol).await?;
    Ok(())
}

/// Handshakes and asks the listener for the protocols it supports.
pub async fn list_protocols<S>(stream: &mut S) -> Result<Vec<String>, NegotiationError>
where
    S: ReadEx + WriteEx + Send + ?Sized,
{
    handshake(stream).await?;
    write_token_buffered(stream, LS.as_bytes()).await?;
    debug!("Dialer: requested protocol list");
    read_protocol_list(stream).await
}

/// Parses an `ls` response:
/// `uvarint(len(block)) || uvarint(count) || token*count`.
pub async fn read_protocol_list<R>(reader: &mut R) -> Result<Vec<String>, NegotiationError>
where
    R: ReadEx + Send + ?Sized,
{
    let len = read_unsigned_varint(reader).await?.unwrap_or(0);
    if len > MAX_MESSAGE_SIZE {
        return Err(NegotiationError::OversizedMessage(len));
    }
    let mut block = vec![0u8; len as usize];
    read_full(reader, &mut block).await?;

    let mut block = Cursor::new(block);
    let count = read_unsigned_varint(&mut block).await?.unwrap_or(0);
    let mut protocols = Vec::new();
    for _ in 0..count {
        // the block ended before all announced entries
        if block.position() >= len {
            return Err(NegotiationError::TruncatedRead {
                expected: len as usize + 1,
                received: len as usize,
            });
        }
        protocols.push(read_token_frame(&mut block).await?);
    }
    if block.position() < len {
        debug!("Dialer: {} trailing bytes in protocol list", len - block.position());
        return Err(io::Error::new(io::ErrorKind::InvalidData, "trailing bytes in protocol list").into());
    }
    Ok(protocols)
}
