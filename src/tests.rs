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

//! Contains the unit tests of the library.

#![cfg(test)]

use async_std::net::{TcpListener, TcpStream};
use async_std::task;
use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc;
use futures::future::AbortHandle;
use futures::prelude::*;
use futures::task::{Context, Poll};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::{
    blocking, list_protocols, select_one_of, select_proto_or_fail, token, with_cancel, FuncHandler, Handler,
    Multistream, Muxer, NegotiationError, ReadEx, ReadWriteEx, WriteEx, PROTOCOL_ID,
};

/// In-memory duplex stream, a pair of bounded channels.
///
/// Dropping or closing one end makes reads on the other end return `Ok(0)`.
#[derive(Debug)]
pub struct Memory<T> {
    tx: mpsc::Sender<T>,
    rx: mpsc::Receiver<T>,

    recv_drain: Option<T>,
}

impl Memory<Bytes> {
    pub fn pair() -> (Self, Self) {
        let (tx1, rx1) = mpsc::channel(1);
        let (tx2, rx2) = mpsc::channel(1);
        (
            Memory {
                tx: tx1,
                rx: rx2,
                recv_drain: None,
            },
            Memory {
                tx: tx2,
                rx: rx1,
                recv_drain: None,
            },
        )
    }

    fn drain(&mut self, buf: &mut [u8]) -> Option<usize> {
        if let Some(b) = &mut self.recv_drain {
            // calculate number of bytes that we can copy
            let n = ::std::cmp::min(buf.len(), b.len());
            if n == 0 {
                return None;
            }
            buf[..n].copy_from_slice(b[..n].as_ref());
            *b = b.split_off(n);
            Some(n)
        } else {
            None
        }
    }
}

impl AsyncRead for Memory<Bytes> {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        if let Some(n) = this.drain(buf) {
            return Poll::Ready(Ok(n));
        }
        match futures::ready!(Stream::poll_next(Pin::new(&mut this.rx), cx)) {
            Some(b) => {
                this.recv_drain.replace(b);
                Poll::Ready(Ok(this.drain(buf).unwrap_or(0)))
            }
            None => Poll::Ready(Ok(0)),
        }
    }
}

impl AsyncWrite for Memory<Bytes> {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        log::trace!("write data: {:?}", buf);
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        futures::ready!(self.tx.poll_ready(cx)).map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e))?;
        self.tx
            .start_send(Bytes::copy_from_slice(buf))
            .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e))?;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.tx.close_channel();
        Poll::Ready(Ok(()))
    }
}

fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Counts invocations, writes the protocol back.
struct Recorder {
    protocol: &'static str,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Handler for Recorder {
    fn protocol(&self) -> &str {
        self.protocol
    }

    async fn handle(&self, protocol: &str, stream: &mut dyn ReadWriteEx) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        stream.write_all2(protocol.as_bytes()).await.is_ok()
    }
}

fn muxer_with(protocols: &[&'static str], calls: &Arc<AtomicUsize>) -> Muxer {
    let mux = Muxer::new();
    for &p in protocols {
        mux.add_handler(Recorder {
            protocol: p,
            calls: calls.clone(),
        });
    }
    mux
}

#[test]
fn select_one_of_agrees_with_muxer() {
    init_log();
    task::block_on(async {
        let calls = Arc::new(AtomicUsize::new(0));
        let mux = muxer_with(&["/a", "/b", "/c"], &calls);
        let (mut client, mut server) = Memory::pair();

        let listener = task::spawn(async move { mux.handle(&mut server).await.unwrap() });

        let proto = select_one_of(&mut client, &["/d", "/e", "/c"]).await.unwrap();
        assert_eq!(proto, "/c");

        let mut buf = [0u8; 2];
        client.read_exact2(&mut buf).await.unwrap();
        assert_eq!(&buf, b"/c");
        assert!(listener.await);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    });
}

#[test]
fn select_one_of_unsupported() {
    init_log();
    task::block_on(async {
        let calls = Arc::new(AtomicUsize::new(0));
        let mux = muxer_with(&["/a", "/b", "/c"], &calls);
        let (mut client, mut server) = Memory::pair();

        let listener = task::spawn(async move { mux.negotiate(&mut server).await.unwrap().is_none() });

        let err = select_one_of(&mut client, &["/d", "/e"]).await.unwrap_err();
        match err {
            NegotiationError::UnsupportedProtocol(protos) => assert_eq!(protos, vec!["/d", "/e"]),
            e => panic!("unexpected error: {}", e),
        }
        // hanging up ends the listener loop without a result
        drop(client);
        assert!(listener.await);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    });
}

#[test]
fn ls_over_the_wire() {
    init_log();
    task::block_on(async {
        let calls = Arc::new(AtomicUsize::new(0));
        let protos = ["/a", "/b", "/c", "/d", "/e"];
        let mux = muxer_with(&protos, &calls);
        let (mut client, mut server) = Memory::pair();

        let listener = task::spawn(async move {
            let res = mux.negotiate(&mut server).await.unwrap();
            res.map(|r| r.protocol().to_owned())
        });

        let list = list_protocols(&mut client).await.unwrap();
        assert_eq!(list, protos);

        // the listener keeps negotiating after ls
        assert!(crate::try_select(&mut client, "/b").await.unwrap());
        assert_eq!(listener.await, Some("/b".to_owned()));
    });
}

#[test]
fn version_mismatch_closes_stream() {
    init_log();
    task::block_on(async {
        let calls = Arc::new(AtomicUsize::new(0));
        let mux = muxer_with(&["/a"], &calls);
        let (mut client, mut server) = Memory::pair();

        let listener = task::spawn(async move {
            let err = mux.negotiate(&mut server).await.unwrap_err();
            assert!(matches!(err, NegotiationError::VersionMismatch(v) if v == "/multistream/2.0.0"));
            server
        });

        assert_eq!(token::read_token(&mut client).await.unwrap(), PROTOCOL_ID);
        token::write_token_buffered(&mut client, b"/multistream/2.0.0").await.unwrap();

        // closed by the listener, nothing else follows
        let mut buf = [0u8; 1];
        assert_eq!(client.read2(&mut buf).await.unwrap(), 0);
        let _server = listener.await;
    });
}

#[test]
fn oversized_token_fails_negotiation() {
    init_log();
    task::block_on(async {
        let calls = Arc::new(AtomicUsize::new(0));
        let mux = muxer_with(&["/a"], &calls);
        let (mut client, mut server) = Memory::pair();

        let listener = task::spawn(async move {
            let err = mux.negotiate(&mut server).await.unwrap_err();
            assert!(matches!(err, NegotiationError::OversizedMessage(65537)));
            server
        });

        assert_eq!(token::read_token(&mut client).await.unwrap(), PROTOCOL_ID);
        token::write_token_buffered(&mut client, PROTOCOL_ID.as_bytes()).await.unwrap();
        client.write_all2(&[0x81, 0x80, 0x04]).await.unwrap();

        assert_eq!(token::read_token(&mut client).await.unwrap(), crate::MESSAGE_TOO_LARGE);
        let _server = listener.await;
    });
}

#[test]
fn select_proto_or_fail_ignores_rejection() {
    task::block_on(async {
        let calls = Arc::new(AtomicUsize::new(0));
        let mux = muxer_with(&["/a"], &calls);
        let (mut client, mut server) = Memory::pair();

        let listener = task::spawn(async move { mux.negotiate(&mut server).await.unwrap().is_none() });

        select_proto_or_fail(&mut client, "/x").await.unwrap();
        drop(client);
        assert!(listener.await);
    });
}

#[test]
fn handle_func_over_tcp() {
    init_log();
    task::block_on(async {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = task::spawn(async move {
            let mux = Muxer::new();
            mux.add_handler(FuncHandler::new("/echo").on_handle_async(|_, s| {
                async move {
                    let mut buf = [0u8; 4];
                    s.read_exact2(&mut buf).await.is_ok() && s.write_all2(&buf).await.is_ok()
                }
                .boxed()
            }));
            let mut socket = listener.accept().await.unwrap().0;
            mux.handle(&mut socket).await.unwrap()
        });

        let socket = TcpStream::connect(addr).await.unwrap();
        let mut s = Multistream::create_select(socket, "/echo");
        s.write_all2(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        s.read_exact2(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        assert!(server.await);
    });
}

#[test]
fn handle_blocking_over_tcp() {
    init_log();
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = std::thread::spawn(move || {
        let mux = Muxer::new();
        mux.add_handler(FuncHandler::new("/a"));
        mux.add_handler(FuncHandler::new("/b").on_handle(|p, s| {
            let mut buf = [0u8; 4];
            s.read_exact(&mut buf).is_ok() && &buf == b"ping" && s.write_all(p.as_bytes()).is_ok()
        }));
        let (mut socket, _) = listener.accept().unwrap();
        mux.handle_blocking(&mut socket).unwrap()
    });

    let mut socket = std::net::TcpStream::connect(addr).unwrap();
    assert_eq!(blocking::list_protocols(&mut socket).unwrap(), vec!["/a", "/b"]);
    assert!(!blocking::try_select(&mut socket, "/c").unwrap());
    assert!(blocking::try_select(&mut socket, "/b").unwrap());

    use std::io::{Read, Write};
    socket.write_all(b"ping").unwrap();
    let mut buf = [0u8; 2];
    socket.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"/b");
    assert!(server.join().unwrap());
}

#[test]
fn blocking_function_serves_async_handle() {
    init_log();
    let (mut client, mut server) = Memory::pair();

    let listener = std::thread::spawn(move || {
        let mux = Muxer::new();
        mux.add_handler(FuncHandler::new("/sync").on_handle(|p, s| {
            let mut buf = [0u8; 4];
            s.read_exact(&mut buf).is_ok() && &buf == b"ping" && s.write_all(p.as_bytes()).is_ok()
        }));
        futures::executor::block_on(mux.handle(&mut server)).unwrap()
    });

    task::block_on(async {
        assert_eq!(select_one_of(&mut client, &["/sync"]).await.unwrap(), "/sync");
        client.write_all2(b"ping").await.unwrap();
        let mut buf = [0u8; 5];
        client.read_exact2(&mut buf).await.unwrap();
        assert_eq!(&buf, b"/sync");
    });
    assert!(listener.join().unwrap());
}

#[test]
fn blocking_select_one_of() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = std::thread::spawn(move || {
        let calls = Arc::new(AtomicUsize::new(0));
        let mux = muxer_with(&["/x", "/y"], &calls);
        let (mut socket, _) = listener.accept().unwrap();
        let res = mux.negotiate_blocking(&mut socket).unwrap();
        res.map(|r| r.protocol().to_owned())
    });

    let mut socket = std::net::TcpStream::connect(addr).unwrap();
    assert_eq!(blocking::select_one_of(&mut socket, &["/z", "/y"]).unwrap(), "/y");
    assert_eq!(server.join().unwrap(), Some("/y".to_owned()));
}

#[test]
fn cancelled_negotiation() {
    task::block_on(async {
        let (mut client, _server) = Memory::pair();
        let (handle, reg) = AbortHandle::new_pair();
        handle.abort();

        let res = with_cancel(crate::handshake(&mut client), reg).await;
        assert!(matches!(res, Err(NegotiationError::Cancelled)));
    });
}

#[test]
fn cancelled_lazy_handshake() {
    task::block_on(async {
        let (client, _server) = Memory::pair();
        let mut s = Multistream::create_select(client, "/proto");
        let (handle, reg) = AbortHandle::new_pair();

        let aborter = task::spawn(async move {
            task::sleep(std::time::Duration::from_millis(50)).await;
            handle.abort();
        });

        let mut buf = [0u8; 1];
        let res = with_cancel(s.read2(&mut buf).map_err(NegotiationError::from), reg).await;
        assert!(matches!(res, Err(NegotiationError::Cancelled)));
        aborter.await;
    });
}
