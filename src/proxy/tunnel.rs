//! Bidirectional tunnelling with half-close semantics
//!
//! Splices a client stream and a backend stream together after the
//! hostname peek. The peeked bytes are replayed to the backend before any
//! further client bytes; the two copy directions then run independently.
//! When a direction's read side reaches EOF, the destination's write side
//! is flushed and shut down (half-close), and the tunnel completes only
//! once both directions have finished. An error in one direction never
//! aborts the other.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::{debug, warn};

use crate::error::is_disconnect;

/// Copy buffer size per direction
const TUNNEL_BUFFER_SIZE: usize = 64 * 1024;

/// Result of a completed tunnel
#[derive(Debug, Clone, Copy, Default)]
pub struct TunnelSummary {
    /// Bytes delivered to the backend (peeked replay included)
    pub client_to_backend: u64,
    /// Bytes delivered to the client
    pub backend_to_client: u64,
}

impl TunnelSummary {
    /// Total bytes moved in both directions
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.client_to_backend + self.backend_to_client
    }
}

/// State for one direction of transfer
struct TransferState {
    buf: Box<[u8]>,
    read_done: bool,
    write_done: bool,
    pos: usize,
    cap: usize,
    bytes_transferred: u64,
}

impl TransferState {
    fn new(buf_size: usize) -> Self {
        Self {
            buf: vec![0u8; buf_size].into_boxed_slice(),
            read_done: false,
            write_done: false,
            pos: 0,
            cap: 0,
            bytes_transferred: 0,
        }
    }

    /// Start with `initial` already pending in the buffer, so it drains to
    /// the destination before the first read from the source.
    fn with_initial(initial: Vec<u8>, buf_size: usize) -> Self {
        let cap = initial.len();
        let mut buf = initial;
        if buf.len() < buf_size {
            buf.resize(buf_size, 0);
        }
        Self {
            buf: buf.into_boxed_slice(),
            read_done: false,
            write_done: false,
            pos: 0,
            cap,
            bytes_transferred: 0,
        }
    }

    fn poll_transfer<R, W>(
        &mut self,
        cx: &mut Context<'_>,
        mut reader: Pin<&mut R>,
        mut writer: Pin<&mut W>,
    ) -> Poll<io::Result<()>>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        loop {
            // Drain pending buffered data first
            if self.pos < self.cap {
                let n = match writer.as_mut().poll_write(cx, &self.buf[self.pos..self.cap]) {
                    Poll::Ready(Ok(0)) => {
                        return Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::WriteZero,
                            "write zero bytes",
                        )));
                    }
                    Poll::Ready(Ok(n)) => n,
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                };
                self.pos += n;
                self.bytes_transferred += n as u64;

                if self.pos == self.cap {
                    self.pos = 0;
                    self.cap = 0;
                }
            } else if self.read_done {
                // Source is exhausted: flush, then half-close the
                // destination's write side.
                if !self.write_done {
                    match writer.as_mut().poll_flush(cx) {
                        Poll::Ready(Ok(())) => {}
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                        Poll::Pending => return Poll::Pending,
                    }
                    match writer.as_mut().poll_shutdown(cx) {
                        Poll::Ready(Ok(())) => {
                            self.write_done = true;
                        }
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                        Poll::Pending => return Poll::Pending,
                    }
                }
                return Poll::Ready(Ok(()));
            } else {
                let mut read_buf = ReadBuf::new(&mut self.buf);
                match reader.as_mut().poll_read(cx, &mut read_buf) {
                    Poll::Ready(Ok(())) => {
                        let n = read_buf.filled().len();
                        if n == 0 {
                            self.read_done = true;
                        } else {
                            self.cap = n;
                        }
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                }
            }
        }
    }
}

/// The tunnel future: both directions polled from one task
struct DuplexTunnel<'a, C, B>
where
    C: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    client: &'a mut C,
    backend: &'a mut B,
    c2b: TransferState,
    b2c: TransferState,
    c2b_done: bool,
    b2c_done: bool,
}

impl<C, B> std::future::Future for DuplexTunnel<'_, C, B>
where
    C: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    type Output = TunnelSummary;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;

        if !this.c2b_done {
            match this
                .c2b
                .poll_transfer(cx, Pin::new(&mut *this.client), Pin::new(&mut *this.backend))
            {
                Poll::Ready(Ok(())) => this.c2b_done = true,
                Poll::Ready(Err(e)) => {
                    log_copy_end("client->backend", &e);
                    this.c2b_done = true;
                }
                Poll::Pending => {}
            }
        }

        if !this.b2c_done {
            match this
                .b2c
                .poll_transfer(cx, Pin::new(&mut *this.backend), Pin::new(&mut *this.client))
            {
                Poll::Ready(Ok(())) => this.b2c_done = true,
                Poll::Ready(Err(e)) => {
                    log_copy_end("backend->client", &e);
                    this.b2c_done = true;
                }
                Poll::Pending => {}
            }
        }

        if this.c2b_done && this.b2c_done {
            Poll::Ready(TunnelSummary {
                client_to_backend: this.c2b.bytes_transferred,
                backend_to_client: this.b2c.bytes_transferred,
            })
        } else {
            Poll::Pending
        }
    }
}

fn log_copy_end(direction: &str, err: &io::Error) {
    if is_disconnect(err) {
        debug!("{} closed: {}", direction, err);
    } else {
        warn!("{} copy error: {}", direction, err);
    }
}

/// Run a tunnel between `client` and `backend`.
///
/// `peeked` is delivered to the backend before any further client bytes.
/// Both sockets stay open until both directions have finished; the caller
/// dropping the streams afterwards performs the full close.
pub async fn run_tunnel<C, B>(client: &mut C, backend: &mut B, peeked: Vec<u8>) -> TunnelSummary
where
    C: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    DuplexTunnel {
        client,
        backend,
        c2b: TransferState::with_initial(peeked, TUNNEL_BUFFER_SIZE),
        b2c: TransferState::new(TUNNEL_BUFFER_SIZE),
        c2b_done: false,
        b2c_done: false,
    }
    .await
}
