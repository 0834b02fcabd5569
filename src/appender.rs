//! Buffered appender (§4.3): batches small writes to minimize syscalls on the
//! append-hot path, while still supporting positioned writes for in-place
//! replace-mode updates.
//!
//! Grounded on the teacher's `perf::WriteBuffer`, generalized from a `Write`
//! wrapper into something that also tracks file-absolute positions, since
//! the engine needs to know *where* appended bytes will land before they are
//! actually flushed.

use std::io::{self, Read, Seek, SeekFrom, Write};

/// 80% full triggers a proactive flush ahead of the next append (§4.3).
const AUTO_FLUSH_FULL_RATIO: f64 = 0.8;

pub struct BufferedAppender<F: Read + Write + Seek> {
    inner: F,
    buf: Vec<u8>,
    capacity: usize,
    /// True on-disk length of `inner`, not counting whatever is still
    /// sitting in `buf`. This is always the physical end of file — value
    /// bytes are the only thing ever appended through this type; the index
    /// region is written directly against the file handle elsewhere and
    /// accounted for via [`advance_file_length`](Self::advance_file_length).
    file_length: u64,
}

impl<F: Read + Write + Seek> BufferedAppender<F> {
    pub fn new(inner: F, file_length: u64, capacity: usize) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(capacity),
            capacity: capacity.max(1),
            file_length,
        }
    }

    /// File-absolute offset at which `bytes` will live once `flush()` runs.
    pub fn current_end_position(&self) -> u64 {
        self.file_length + self.buf.len() as u64
    }

    /// True once the buffer has crossed the 80%-full auto-flush line.
    pub fn should_auto_flush(&self) -> bool {
        self.buf.len() as f64 >= self.capacity as f64 * AUTO_FLUSH_FULL_RATIO
    }

    /// Append `bytes`, returning the position they will occupy after a flush.
    ///
    /// If the write would overflow the buffer, or is itself larger than the
    /// buffer's capacity, the buffer is flushed first and the bytes are
    /// written directly. A buffer already at or past the 80%-full line is
    /// also flushed proactively, ahead of needing the space.
    pub fn append(&mut self, bytes: &[u8]) -> io::Result<u64> {
        let position = self.current_end_position();
        if bytes.len() >= self.capacity || self.buf.len() + bytes.len() > self.capacity || self.should_auto_flush() {
            self.flush()?;
        }
        if bytes.len() >= self.capacity {
            self.inner.seek(SeekFrom::Start(self.file_length))?;
            self.inner.write_all(bytes)?;
            self.file_length += bytes.len() as u64;
        } else {
            self.buf.extend_from_slice(bytes);
        }
        Ok(position)
    }

    /// Positioned write used only by replace-mode updates into
    /// already-allocated space. Flushes first so position arithmetic never
    /// straddles buffered and on-disk bytes.
    pub fn write_at(&mut self, position: u64, bytes: &[u8]) -> io::Result<()> {
        self.flush()?;
        self.inner.seek(SeekFrom::Start(position))?;
        self.inner.write_all(bytes)?;
        if position + bytes.len() as u64 > self.file_length {
            self.file_length = position + bytes.len() as u64;
        }
        Ok(())
    }

    /// Write buffered bytes to the end of the stream and fsync-equivalent
    /// flush the underlying writer.
    pub fn flush(&mut self) -> io::Result<()> {
        if !self.buf.is_empty() {
            self.inner.seek(SeekFrom::Start(self.file_length))?;
            self.inner.write_all(&self.buf)?;
            self.file_length += self.buf.len() as u64;
            self.buf.clear();
        }
        self.inner.flush()
    }

    /// Discard buffered content without writing it — used by `clear()` and
    /// by the compactor when abandoning the old file.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn into_inner(self) -> F {
        self.inner
    }

    pub fn get_mut(&mut self) -> &mut F {
        &mut self.inner
    }

    /// True on-disk file length, excluding whatever is still buffered.
    pub fn file_length(&self) -> u64 {
        self.file_length
    }

    /// Reset the tracked file length after an out-of-band truncation (used by
    /// `clear()`), discarding any stale buffered bytes along with it.
    pub fn reset_file_length(&mut self, n: u64) {
        self.buf.clear();
        self.file_length = n;
    }

    /// Record that `n` bytes were written directly against the file handle
    /// by something other than `append`/`write_at` — the index persistence
    /// functions in [`crate::index`] do this when they lay down a fresh
    /// index region past the current end of file.
    pub fn advance_file_length(&mut self, n: u64) {
        self.file_length += n;
    }

    /// Read `len` bytes at `position`, flushing first if any of that range
    /// is still sitting in the write buffer (§4.6.2 step 3).
    pub fn read_at(&mut self, position: u64, len: usize) -> io::Result<Vec<u8>> {
        if position + len as u64 > self.file_length {
            self.flush()?;
        }
        self.inner.seek(SeekFrom::Start(position))?;
        let mut out = vec![0u8; len];
        self.inner.read_exact(&mut out)?;
        Ok(out)
    }
}

impl BufferedAppender<std::fs::File> {
    /// Grow the file to `current_end_position() + additional_bytes` ahead of
    /// a batched write (§4.6.5) so a multi-entry append lands in one
    /// extension of the file instead of growing it entry by entry. Safe to
    /// call before any number of buffered `append`s, since writes always
    /// target the tracked `file_length`, never the OS's literal end-of-file.
    pub fn preallocate(&mut self, additional_bytes: u64) -> io::Result<()> {
        self.inner.set_len(self.current_end_position() + additional_bytes)
    }
}
