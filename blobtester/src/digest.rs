//! SHA-256 digests computed while payloads stream through.
//!
//! [`DigestReader`] hashes everything read from an inner reader, which is how uploads are hashed
//! without buffering. Since the upload consumes the reader, the digest is collected through a
//! shared [`DigestHandle`]. [`DigestWriter`] hashes everything written into an inner writer and is
//! used on the download side, where the writer stays owned by the caller.

use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::{fmt, io, task};

use sha2::{Digest as _, Sha256};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Length of a [`Digest`] in bytes.
pub const DIGEST_LEN: usize = 32;

/// A finalized SHA-256 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    /// Computes the digest of a byte slice in one go.
    pub fn of(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({self})")
    }
}

#[derive(Default)]
struct HashState {
    hasher: Sha256,
    bytes: u64,
}

impl HashState {
    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.bytes += data.len() as u64;
    }
}

/// Shared access to the hash state of a [`DigestReader`].
#[derive(Clone, Default)]
pub struct DigestHandle(Arc<Mutex<HashState>>);

impl DigestHandle {
    /// Creates a handle for an empty hash.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashState> {
        // The state is updated in one step per chunk, so a poisoned lock still holds a valid hash.
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of bytes hashed so far.
    pub fn bytes(&self) -> u64 {
        self.lock().bytes
    }

    /// Returns the digest of all bytes hashed so far.
    pub fn finalize(&self) -> Digest {
        let hasher = self.lock().hasher.clone();
        Digest(hasher.finalize().into())
    }
}

impl fmt::Debug for DigestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestHandle")
            .field("bytes", &self.bytes())
            .finish_non_exhaustive()
    }
}

/// An [`AsyncRead`] adapter that feeds every byte it returns into a hash.
#[derive(Debug)]
pub struct DigestReader<R> {
    inner: R,
    state: DigestHandle,
}

impl<R> DigestReader<R> {
    /// Wraps `inner`, hashing into the state shared with `handle`.
    pub fn new(inner: R, handle: DigestHandle) -> Self {
        Self {
            inner,
            state: handle,
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for DigestReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> task::Poll<io::Result<()>> {
        let before = buf.filled().len();
        let this = &mut *self;

        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let task::Poll::Ready(Ok(())) = poll {
            this.state.lock().update(&buf.filled()[before..]);
        }

        poll
    }
}

/// An [`AsyncWrite`] adapter that feeds every byte it forwards into a hash.
pub struct DigestWriter<W> {
    inner: W,
    state: HashState,
}

impl<W> DigestWriter<W> {
    /// Wraps `inner` with an empty hash.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            state: HashState::default(),
        }
    }

    /// Number of bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.state.bytes
    }

    /// Consumes the writer and returns the digest of everything written.
    pub fn finalize(self) -> Digest {
        Digest(self.state.hasher.finalize().into())
    }
}

impl<W> fmt::Debug for DigestWriter<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestWriter")
            .field("bytes", &self.state.bytes)
            .finish_non_exhaustive()
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for DigestWriter<W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
        buf: &[u8],
    ) -> task::Poll<io::Result<usize>> {
        let this = &mut *self;

        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let task::Poll::Ready(Ok(written)) = poll {
            this.state.update(&buf[..written]);
        }

        poll
    }

    fn poll_flush(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
