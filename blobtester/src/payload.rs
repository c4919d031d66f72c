//! Pseudo-random payloads that are generated while they are read.

use std::pin::Pin;
use std::{io, task};

use rand::RngCore;
use rand::rngs::SmallRng;
use tokio::io::{AsyncRead, ReadBuf};

/// A read-only, forward-only source of `size` pseudo-random bytes.
///
/// Bytes are generated on demand for every read, so the full payload is never held in memory.
/// Once `size` bytes have been produced, every further read returns zero bytes.
#[derive(Debug)]
pub struct RandomPayload<R = SmallRng> {
    size: u64,
    produced: u64,
    rng: R,
}

impl<R: RngCore> RandomPayload<R> {
    /// Creates a payload of `size` bytes drawn from `rng`.
    pub fn new(size: u64, rng: R) -> Self {
        Self {
            size,
            produced: 0,
            rng,
        }
    }

    /// Number of bytes that can still be read.
    pub fn remaining(&self) -> u64 {
        self.size - self.produced
    }

    /// Fills up to `buf.len()` bytes and returns how many were written.
    fn fill(&mut self, buf: &mut [u8]) -> usize {
        let len_to_fill = (buf.len() as u64).min(self.remaining()) as usize;

        self.rng.fill_bytes(&mut buf[..len_to_fill]);
        self.produced += len_to_fill as u64;

        len_to_fill
    }
}

impl<R: RngCore> io::Read for RandomPayload<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.fill(buf))
    }
}

impl<R: RngCore + Unpin> AsyncRead for RandomPayload<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut task::Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> task::Poll<io::Result<()>> {
        let len_to_fill = (buf.remaining() as u64).min(self.remaining()) as usize;

        let fill_buf = buf.initialize_unfilled_to(len_to_fill);
        let filled = self.fill(fill_buf);
        buf.advance(filled);

        task::Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn never_exceeds_size() {
        use std::io::Read;

        let mut payload = RandomPayload::new(10, SmallRng::seed_from_u64(0));
        let mut buf = [0u8; 4];

        assert_eq!(payload.read(&mut buf).unwrap(), 4);
        assert_eq!(payload.read(&mut buf).unwrap(), 4);
        assert_eq!(payload.remaining(), 2);
        assert_eq!(payload.read(&mut buf).unwrap(), 2);
        assert_eq!(payload.remaining(), 0);
        assert_eq!(payload.read(&mut buf).unwrap(), 0);
        assert_eq!(payload.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn empty_payload() {
        use std::io::Read;

        let mut payload = RandomPayload::new(0, SmallRng::seed_from_u64(0));
        let mut contents = Vec::new();
        assert_eq!(payload.read_to_end(&mut contents).unwrap(), 0);
    }

    #[tokio::test]
    async fn async_read_produces_exact_length() {
        use tokio::io::AsyncReadExt;

        let mut payload = RandomPayload::new(100_000, SmallRng::seed_from_u64(1));
        let mut contents = Vec::new();
        payload.read_to_end(&mut contents).await.unwrap();

        assert_eq!(contents.len(), 100_000);
        assert_eq!(payload.remaining(), 0);
        // random data is not all zeroes
        assert!(contents.iter().any(|b| *b != 0));
    }

    #[test]
    fn same_seed_same_bytes() {
        use std::io::Read;

        let mut a = Vec::new();
        let mut b = Vec::new();
        RandomPayload::new(512, SmallRng::seed_from_u64(7))
            .read_to_end(&mut a)
            .unwrap();
        RandomPayload::new(512, SmallRng::seed_from_u64(7))
            .read_to_end(&mut b)
            .unwrap();
        assert_eq!(a, b);
    }
}
