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

//! # Multistream-select Protocol Negotiation
//!
//! This crate implements the `multistream-select` protocol, which is the protocol
//! used by libp2p to negotiate which application-layer protocol to use with the
//! remote on a connection or substream.
//!
//! > **Note**: This crate is used primarily by core components of *libp2p* and it
//! > is usually not used directly on its own.
//!
//! ## Roles
//!
//! Two peers using the multistream-select negotiation protocol on an I/O stream
//! are distinguished by their role as a _dialer_ (or _initiator_) or as a _listener_
//! (or _responder_). Thereby the dialer plays the active part, driving the protocol,
//! whereas the listener reacts to the messages received.
//!
//! The dialer has two options: it can either pick a protocol from the complete list
//! of protocols that the listener supports (see [`list_protocols`]), or it can
//! directly suggest a protocol (see [`try_select`] and [`select_one_of`]). Either
//! way, a selected protocol is sent to the listener who can either accept (by
//! echoing the same protocol) or reject (by responding with `na`). If a suggested
//! protocol is not available, the dialer may suggest another protocol. This
//! process continues until a protocol is agreed upon or the dialer has run out
//! of alternatives.
//!
//! The listener side is driven by a [`Muxer`], which owns one [`Handler`] per
//! supported protocol and hands the stream over to it once a protocol is agreed.
//!
//! ## Wire format
//!
//! Every message is a _token_: `uvarint(len + 1) || payload || '\n'`. Tokens are
//! limited to 64 KiB, a peer announcing a larger one is told so and the
//! negotiation fails.
//!
//! ## Lazy negotiation
//!
//! [`Multistream`] wraps a stream and defers the handshake until the stream is
//! first read or written, running the exchange exactly once for all clones of
//! the wrapper.
//!
//! ## Blocking I/O
//!
//! Every async primitive has a blocking counterpart in [`blocking`] operating on
//! `std::io::Read + Write` streams. Both share the same implementation.

pub mod blocking;
mod error;
mod handler;
mod lazy;
mod muxer;
mod negotiator;
mod tests;
mod token;

pub use self::error::NegotiationError;
pub use self::handler::{AsyncHandleFn, FuncHandler, HandleFn, Handler, IHandler};
pub use self::lazy::{Config, Direction, Multistream};
pub use self::muxer::{Muxer, NegotiationResult};
pub use self::negotiator::{handshake, list_protocols, read_protocol_list, select_one_of, select_proto_or_fail, try_select};
pub use self::token::{encode_token, read_token, read_token_frame, write_token, write_token_buffered, DELIMITER};

pub use multistream_traits::{ReadEx, ReadWriteEx, SplitEx, SyncStream, WriteEx};

use futures::future::{AbortRegistration, Abortable, Aborted};
use std::future::Future;

/// Version token exchanged first by both peers.
pub const PROTOCOL_ID: &str = "/multistream/1.0.0";

/// Answer to a protocol the listener does not support.
pub const NOT_AVAILABLE: &str = "na";

/// Request for the list of supported protocols.
pub const LS: &str = "ls";

/// Sent back when a peer announces a token over [`MAX_MESSAGE_SIZE`].
pub const MESSAGE_TOO_LARGE: &str = "Messages over 64k are not allowed";

/// Largest accepted token length, trailing newline included.
pub const MAX_MESSAGE_SIZE: u64 = 64 * 1024;

/// Runs `fut` until it completes or the matching `AbortHandle` fires.
///
/// An abort resolves to [`NegotiationError::Cancelled`].
pub async fn with_cancel<F, T>(fut: F, reg: AbortRegistration) -> Result<T, NegotiationError>
where
    F: Future<Output = Result<T, NegotiationError>>,
{
    match Abortable::new(fut, reg).await {
        Ok(r) => r,
        Err(Aborted) => Err(NegotiationError::Cancelled),
    }
}

#[cfg(test)]
pub(crate) use tests::Memory;
