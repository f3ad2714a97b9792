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

use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;

use crate::lazy::Direction;

#[derive(Error, Debug)]
/// Negotiation error
pub enum NegotiationError {
    /// The peer does not speak the same multistream version
    #[error("incorrect version, received `{0}`")]
    VersionMismatch(String),
    /// A token longer than 64 KiB was announced
    #[error("messages over 64k are not allowed, announced length {0}")]
    OversizedMessage(u64),
    /// A token frame did not end with `\n`
    #[error("message did not have trailing newline")]
    MissingTrailingNewline,
    /// The stream ended in the middle of a token frame
    #[error("could not read token, expected {expected} bytes, received {received}")]
    TruncatedRead { expected: usize, received: usize },
    /// None of the proposed protocols was accepted by the peer
    #[error("protocols given are not supported: {}", .0.join(", "))]
    UnsupportedProtocol(Vec<String>),
    /// The peer answered a protocol proposal with garbage
    #[error("unrecognized response: `{0}`")]
    UnrecognizedResponse(String),
    /// The peer sent a different handshake token than expected
    #[error("protocol mismatch, `{received}` != `{expected}`")]
    ProtocolMismatch { expected: String, received: String },
    /// An earlier handshake attempt on the same stream failed
    #[error("handshake failed previously, stream is unusable")]
    HandshakeFailed,
    /// Handshake gate could not be acquired in time
    #[error("{0:?} handshake timed out")]
    HandshakeTimeout(Direction),
    /// Aborted via a cancellation signal
    #[error("operation cancelled")]
    Cancelled,
    /// Token payload is not valid UTF-8
    #[error("token is not valid utf-8: {0}")]
    InvalidUtf8(#[from] FromUtf8Error),
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl From<NegotiationError> for io::Error {
    fn from(err: NegotiationError) -> io::Error {
        match err {
            NegotiationError::Io(e) => e,
            NegotiationError::HandshakeTimeout(_) => io::Error::new(io::ErrorKind::TimedOut, err),
            NegotiationError::Cancelled => io::Error::new(io::ErrorKind::Interrupted, err),
            _ => io::Error::new(io::ErrorKind::InvalidData, err),
        }
    }
}
