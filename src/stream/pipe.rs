//! Bounded blocking byte pipe between the transcoder process and the decoder.
//!
//! A fixed-capacity ring with blocking push/pop and an explicit completion
//! sentinel. The producer (process-output reader) blocks when the ring is
//! full — live audio backpressure, never dropped data — and the consumer
//! (format decoder) blocks when it is empty, unless the producer has
//! completed. Cancellation unblocks both sides.

use parking_lot::{Condvar, Mutex};

use crate::common::errors::EngineError;

struct PipeInner {
    buf: Vec<u8>,
    read_at: usize,
    write_at: usize,
    len: usize,
    completed: bool,
    cancelled: bool,
}

impl PipeInner {
    /// Copy `chunk` in at the write offset. Caller guarantees it fits.
    fn push(&mut self, chunk: &[u8]) {
        let cap = self.buf.len();
        let at_end = cap - self.write_at;
        if chunk.len() <= at_end {
            self.buf[self.write_at..self.write_at + chunk.len()].copy_from_slice(chunk);
        } else {
            self.buf[self.write_at..].copy_from_slice(&chunk[..at_end]);
            self.buf[..chunk.len() - at_end].copy_from_slice(&chunk[at_end..]);
        }
        self.write_at = (self.write_at + chunk.len()) % cap;
        self.len += chunk.len();
    }

    /// Copy out up to `out.len()` bytes from the read offset.
    fn pop(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.len);
        let cap = self.buf.len();
        let at_end = cap - self.read_at;
        if n <= at_end {
            out[..n].copy_from_slice(&self.buf[self.read_at..self.read_at + n]);
        } else {
            out[..at_end].copy_from_slice(&self.buf[self.read_at..]);
            out[at_end..n].copy_from_slice(&self.buf[..n - at_end]);
        }
        self.read_at = (self.read_at + n) % cap;
        self.len -= n;
        n
    }
}

pub struct BytePipe {
    inner: Mutex<PipeInner>,
    readable: Condvar,
    writable: Condvar,
}

impl BytePipe {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(PipeInner {
                buf: vec![0u8; capacity],
                read_at: 0,
                write_at: 0,
                len: 0,
                completed: false,
                cancelled: false,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
        }
    }

    /// Write all of `chunk`, blocking while the pipe is full.
    ///
    /// Returns `false` once the pipe is cancelled; whatever was written
    /// before the cancellation stays in the ring.
    pub fn write(&self, mut chunk: &[u8]) -> bool {
        let mut inner = self.inner.lock();
        while !chunk.is_empty() {
            if inner.cancelled {
                return false;
            }
            let free = inner.buf.len() - inner.len;
            if free == 0 {
                self.writable.wait(&mut inner);
                continue;
            }
            let n = free.min(chunk.len());
            inner.push(&chunk[..n]);
            chunk = &chunk[n..];
            self.readable.notify_one();
        }
        true
    }

    /// Read up to `out.len()` bytes, blocking while the pipe is empty.
    ///
    /// Returns `Ok(0)` on normal end-of-stream (producer completed and the
    /// ring is drained) and `Err(Cancelled)` when the pipe is cancelled.
    pub fn read(&self, out: &mut [u8]) -> Result<usize, EngineError> {
        if out.is_empty() {
            return Ok(0);
        }
        let mut inner = self.inner.lock();
        loop {
            if inner.cancelled {
                return Err(EngineError::Cancelled);
            }
            if inner.len > 0 {
                let n = inner.pop(out);
                self.writable.notify_one();
                return Ok(n);
            }
            if inner.completed {
                return Ok(0);
            }
            self.readable.wait(&mut inner);
        }
    }

    /// Producer signal: no more data will be written. Buffered bytes stay
    /// readable.
    pub fn complete(&self) {
        let mut inner = self.inner.lock();
        inner.completed = true;
        self.readable.notify_all();
        self.writable.notify_all();
    }

    /// Poison the pipe and wake every blocked reader and writer.
    pub fn cancel(&self) {
        let mut inner = self.inner.lock();
        inner.cancelled = true;
        self.readable.notify_all();
        self.writable.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.lock().cancelled
    }
}

/// `std::io::Read` adapter so the decoder can treat the pipe as a plain byte
/// stream. Cancellation surfaces as `BrokenPipe`.
pub(crate) struct PipeReader {
    pub pipe: std::sync::Arc<BytePipe>,
}

impl std::io::Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.pipe.read(buf) {
            Ok(n) => Ok(n),
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "stream pipe cancelled",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    #[test]
    fn preserves_fifo_order_across_wraparound() {
        let pipe = BytePipe::new(8);
        assert!(pipe.write(&[1, 2, 3, 4, 5, 6]));
        let mut out = [0u8; 4];
        assert_eq!(pipe.read(&mut out).unwrap(), 4);
        assert_eq!(out, [1, 2, 3, 4]);

        // Wraps around the ring boundary.
        assert!(pipe.write(&[7, 8, 9, 10, 11]));
        let mut rest = [0u8; 8];
        assert_eq!(pipe.read(&mut rest).unwrap(), 7);
        assert_eq!(&rest[..7], &[5, 6, 7, 8, 9, 10, 11]);
    }

    #[test]
    fn completion_drains_then_signals_end() {
        let pipe = BytePipe::new(16);
        assert!(pipe.write(&[9; 5]));
        pipe.complete();

        let mut out = [0u8; 16];
        assert_eq!(pipe.read(&mut out).unwrap(), 5);
        assert_eq!(pipe.read(&mut out).unwrap(), 0);
        assert_eq!(pipe.read(&mut out).unwrap(), 0);
    }

    #[test]
    fn full_pipe_blocks_writer_until_read() {
        let pipe = Arc::new(BytePipe::new(4));
        assert!(pipe.write(&[1, 2, 3, 4]));

        let writer = {
            let pipe = pipe.clone();
            std::thread::spawn(move || pipe.write(&[5, 6, 7, 8]))
        };

        std::thread::sleep(Duration::from_millis(50));
        let mut out = [0u8; 4];
        assert_eq!(pipe.read(&mut out).unwrap(), 4);
        assert_eq!(out, [1, 2, 3, 4]);

        assert!(writer.join().unwrap());
        assert_eq!(pipe.read(&mut out).unwrap(), 4);
        assert_eq!(out, [5, 6, 7, 8]);
    }

    #[test]
    fn cancel_unblocks_a_blocked_writer_within_bounded_time() {
        let pipe = Arc::new(BytePipe::new(4));
        assert!(pipe.write(&[0; 4]));

        let writer = {
            let pipe = pipe.clone();
            std::thread::spawn(move || {
                let start = Instant::now();
                let completed = pipe.write(&[0; 64]);
                (completed, start.elapsed())
            })
        };

        std::thread::sleep(Duration::from_millis(100));
        pipe.cancel();

        let (completed, blocked_for) = writer.join().unwrap();
        assert!(!completed);
        assert!(blocked_for < Duration::from_secs(2));
    }

    #[test]
    fn cancelled_read_reports_cancellation() {
        let pipe = BytePipe::new(16);
        pipe.cancel();
        let mut out = [0u8; 4];
        assert!(matches!(
            pipe.read(&mut out),
            Err(EngineError::Cancelled)
        ));
    }
}
