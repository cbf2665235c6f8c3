//! In-memory WebSocket pairs for tests

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{duplex, AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;

/// A connected (server, client) pair over an in-memory pipe
pub(crate) async fn ws_pair() -> (WebSocketStream<DuplexStream>, WebSocketStream<DuplexStream>) {
    let (server_io, client_io) = duplex(64 * 1024);
    tokio::join!(
        WebSocketStream::from_raw_socket(server_io, Role::Server, None),
        WebSocketStream::from_raw_socket(client_io, Role::Client, None),
    )
}

/// How writes on a [`FaultyIo`] misbehave
#[derive(Debug, Clone, Copy)]
pub(crate) enum WriteFault {
    /// Every write fails with `BrokenPipe`
    Fail,
    /// Every write stays pending forever
    Stall,
}

/// Server-side transport that reads normally but cannot write
#[derive(Debug)]
pub(crate) struct FaultyIo {
    inner: DuplexStream,
    fault: WriteFault,
}

impl FaultyIo {
    fn refuse<T>(&self) -> Poll<io::Result<T>> {
        match self.fault {
            WriteFault::Fail => Poll::Ready(Err(io::ErrorKind::BrokenPipe.into())),
            WriteFault::Stall => Poll::Pending,
        }
    }
}

impl AsyncRead for FaultyIo {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for FaultyIo {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.refuse()
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.refuse()
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.refuse()
    }
}

/// Like [`ws_pair`], but the server side cannot deliver anything
pub(crate) async fn faulty_ws_pair(
    fault: WriteFault,
) -> (WebSocketStream<FaultyIo>, WebSocketStream<DuplexStream>) {
    let (server_io, client_io) = duplex(64 * 1024);
    let server_io = FaultyIo {
        inner: server_io,
        fault,
    };
    tokio::join!(
        WebSocketStream::from_raw_socket(server_io, Role::Server, None),
        WebSocketStream::from_raw_socket(client_io, Role::Client, None),
    )
}
