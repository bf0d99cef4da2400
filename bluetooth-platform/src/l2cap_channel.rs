//! A L2CAP channel for communication between a central and a peripheral.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures_io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

/// The byte stream a platform supplies for an open channel.
pub trait L2capStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> L2capStream for T {}

/// An open L2CAP connection-oriented channel.
///
/// The channel is read and written through its [`AsyncRead`] and [`AsyncWrite`] impls. Clones
/// share the same underlying stream.
#[derive(Clone)]
pub struct L2capChannel {
    psm: u16,
    peer: Uuid,
    stream: Arc<Mutex<Box<dyn L2capStream>>>,
}

impl std::fmt::Debug for L2capChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("L2capChannel")
            .field("psm", &self.psm)
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

impl L2capChannel {
    pub fn new(psm: u16, peer: Uuid, stream: impl L2capStream + 'static) -> Self {
        Self {
            psm,
            peer,
            stream: Arc::new(Mutex::new(Box::new(stream))),
        }
    }

    /// The PSM of the L2CAP channel.
    pub fn psm(&self) -> u16 {
        self.psm
    }

    /// The identifier of the peripheral at the other end of the channel.
    pub fn peer(&self) -> Uuid {
        self.peer
    }

    fn stream(&self) -> MutexGuard<'_, Box<dyn L2capStream>> {
        self.stream.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AsyncRead for L2capChannel {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut **self.stream()).poll_read(cx, buf)
    }
}

impl AsyncWrite for L2capChannel {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut **self.stream()).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut **self.stream()).poll_flush(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut **self.stream()).poll_close(cx)
    }
}

impl PartialEq for L2capChannel {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.stream, &other.stream)
    }
}

impl Eq for L2capChannel {}
