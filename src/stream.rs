//! Forward-readable, peekable byte stream.
//!
//! Format sniffing needs to look at a bounded prefix of the input without
//! consuming it, and without demanding `Seek` — pipes and network streams
//! must work. [`PeekReader`] buffers read-ahead bytes and replays them
//! through its `Read` implementation, so the longest registered magic
//! pattern bounds the buffer, not the file size.

use std::io::{self, Read};

pub struct PeekReader<R> {
    inner: R,
    buf: Vec<u8>,
    pos: usize,
}

impl<R: Read> PeekReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            pos: 0,
        }
    }

    fn buffered(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Returns up to `n` bytes of lookahead without consuming them.
    /// Fewer than `n` bytes are returned only at end of input.
    pub fn peek(&mut self, n: usize) -> io::Result<&[u8]> {
        while self.buffered() < n {
            let mut chunk = [0u8; 512];
            let want = (n - self.buffered()).min(chunk.len());
            let got = self.inner.read(&mut chunk[..want])?;
            if got == 0 {
                break;
            }
            // Compact lazily so the buffer stays bounded by the largest peek.
            if self.pos > 0 && self.pos == self.buf.len() {
                self.buf.clear();
                self.pos = 0;
            }
            self.buf.extend_from_slice(&chunk[..got]);
        }
        let end = (self.pos + n).min(self.buf.len());
        Ok(&self.buf[self.pos..end])
    }

    /// True once every byte of the input has been consumed.
    pub fn at_eof(&mut self) -> io::Result<bool> {
        Ok(self.peek(1)?.is_empty())
    }
}

impl<R: Read> Read for PeekReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.buffered() > 0 {
            let n = self.buffered().min(out.len());
            out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
            self.pos += n;
            if self.pos == self.buf.len() {
                self.buf.clear();
                self.pos = 0;
            }
            return Ok(n);
        }
        self.inner.read(out)
    }
}
