//! Byte streams with mark/reset.
//!
//! Auto-detection must look at the leading bytes of a stream without
//! consuming them, so the reader chosen afterwards can parse its own header
//! from the start. [`MarkRead`] expresses that capability:
//!
//! 1. `mark(limit)` remembers the current position;
//! 2. up to `limit` bytes may then be read;
//! 3. `reset()` rewinds to the marked position.
//!
//! [`MarkReader`] adds the capability to any [`Read`] by retaining the bytes
//! read since the mark. Plain sources (`File`, `Cursor`, `&[u8]`) implement
//! the trait without it; `mark_supported()` returns `false` for them, and
//! the dispatcher refuses to auto-detect on such a stream.

use std::fs::File;
use std::io::{self, Cursor, Read};

/// A [`Read`] that may support peeking via mark/reset.
pub trait MarkRead: Read {
    /// Whether [`mark`](Self::mark) and [`reset`](Self::reset) work.
    fn mark_supported(&self) -> bool {
        false
    }

    /// Remember the current position; the mark stays valid for the next
    /// `read_limit` bytes.
    fn mark(&mut self, _read_limit: usize) {}

    /// Rewind to the last valid mark.
    fn reset(&mut self) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "mark/reset not supported"))
    }
}

impl MarkRead for File {}
impl MarkRead for &[u8] {}
impl<T: AsRef<[u8]>> MarkRead for Cursor<T> {}

impl<R: MarkRead + ?Sized> MarkRead for &mut R {
    fn mark_supported(&self) -> bool { (**self).mark_supported() }
    fn mark(&mut self, read_limit: usize) { (**self).mark(read_limit) }
    fn reset(&mut self) -> io::Result<()> { (**self).reset() }
}

impl<R: MarkRead + ?Sized> MarkRead for Box<R> {
    fn mark_supported(&self) -> bool { (**self).mark_supported() }
    fn mark(&mut self, read_limit: usize) { (**self).mark(read_limit) }
    fn reset(&mut self) -> io::Result<()> { (**self).reset() }
}

// ── MarkReader ───────────────────────────────────────────────────────────────

/// Adds mark/reset to any reader.
///
/// While a mark is active, bytes pulled from the inner reader are retained
/// in `replay` so `reset()` can serve them again. Reading more than the mark
/// limit past the mark invalidates it.
#[derive(Debug)]
pub struct MarkReader<R> {
    inner:  R,
    /// Bytes from the mark point onward (or unread leftovers after a reset).
    replay: Vec<u8>,
    /// Read cursor into `replay`.
    pos:    usize,
    /// Active mark limit, if any.
    limit:  Option<usize>,
}

impl<R: Read> MarkReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, replay: Vec::new(), pos: 0, limit: None }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Unwrap the inner reader.
    ///
    /// Bytes that were replayed into the buffer but not yet re-read are lost;
    /// hand the `MarkReader` itself onward to keep them.
    pub fn into_inner(self) -> R {
        self.inner
    }

    fn buffered(&self) -> usize {
        self.replay.len() - self.pos
    }
}

impl<R: Read> Read for MarkReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.buffered() > 0 {
            let n = out.len().min(self.buffered());
            out[..n].copy_from_slice(&self.replay[self.pos..self.pos + n]);
            self.pos += n;
            if self.limit.is_none() && self.buffered() == 0 {
                self.replay.clear();
                self.pos = 0;
            }
            return Ok(n);
        }

        let n = self.inner.read(out)?;
        if let Some(limit) = self.limit {
            if self.replay.len() + n > limit {
                self.limit = None;
                self.replay.clear();
                self.pos = 0;
            } else {
                self.replay.extend_from_slice(&out[..n]);
                self.pos = self.replay.len();
            }
        }
        Ok(n)
    }
}

impl<R: Read> MarkRead for MarkReader<R> {
    fn mark_supported(&self) -> bool {
        true
    }

    fn mark(&mut self, read_limit: usize) {
        // Keep unread leftovers; they now sit right after the new mark.
        self.replay.drain(..self.pos);
        self.pos = 0;
        self.limit = Some(read_limit.max(self.replay.len()));
    }

    fn reset(&mut self) -> io::Result<()> {
        if self.limit.is_none() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "reset without a valid mark"));
        }
        self.pos = 0;
        Ok(())
    }
}

/// Fill `buf` as far as the stream allows; stops early only at EOF.
pub fn read_up_to<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
