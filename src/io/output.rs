//! Buffered output stream.

use super::Cancellable;
use crate::buffer::Buffer;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::io::{ErrorKind, Write};
use std::sync::Arc;

/// Default internal buffer size.
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

fn check(cancellable: Option<&Cancellable>) -> Result<()> {
    cancellable.map_or(Ok(()), Cancellable::check)
}

/// Accumulates small writes and hands them to the underlying writer in
/// larger chunks.
///
/// When the underlying writer accepts only part of the pending bytes, the
/// remainder is moved to the front of the buffer and retried, so a failure
/// part-way leaves exactly the unwritten bytes pending.
pub struct BufferedOutputStream<W: Write> {
    inner: W,
    buf: Box<[u8]>,
    pos: usize,
    auto_grow: bool,
    closed: bool,
}

impl<W: Write> BufferedOutputStream<W> {
    /// Wrap `inner` with a [`DEFAULT_BUFFER_SIZE`] buffer.
    pub fn new(inner: W) -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE, inner)
    }

    /// Wrap `inner` with a `size`-byte buffer.
    pub fn with_capacity(size: usize, inner: W) -> Self {
        Self {
            inner,
            buf: vec![0; size.max(1)].into_boxed_slice(),
            pos: 0,
            auto_grow: false,
            closed: false,
        }
    }

    /// Grow the buffer instead of flushing when it fills up.
    pub fn set_auto_grow(&mut self, auto_grow: bool) {
        self.auto_grow = auto_grow;
    }

    /// Whether the buffer grows instead of flushing.
    pub fn auto_grow(&self) -> bool {
        self.auto_grow
    }

    /// Capacity of the internal buffer.
    pub fn buffer_size(&self) -> usize {
        self.buf.len()
    }

    /// Resize the internal buffer, never below the pending byte count.
    pub fn set_buffer_size(&mut self, size: usize) {
        let size = size.max(self.pos).max(1);
        let mut buf = vec![0; size].into_boxed_slice();
        buf[..self.pos].copy_from_slice(&self.buf[..self.pos]);
        self.buf = buf;
    }

    /// Bytes accepted but not yet handed to the underlying writer.
    pub fn pending(&self) -> usize {
        self.pos
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The underlying writer.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Unwrap, discarding any pending bytes.
    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Accept up to `data.len()` bytes, flushing first if the buffer is full.
    /// Returns how many bytes were taken.
    pub fn write(&mut self, data: &[u8], cancellable: Option<&Cancellable>) -> Result<usize> {
        if self.closed {
            return Err(Error::Closed);
        }
        check(cancellable)?;
        if data.is_empty() {
            return Ok(0);
        }

        if self.pos == self.buf.len() {
            if self.auto_grow {
                let grown = (self.buf.len() * 2).max(self.pos + data.len());
                self.set_buffer_size(grown);
            } else {
                self.flush_buffer(cancellable)?;
            }
        }

        let n = data.len().min(self.buf.len() - self.pos);
        self.buf[self.pos..self.pos + n].copy_from_slice(&data[..n]);
        self.pos += n;
        Ok(n)
    }

    /// Write all of `data`. Returns the number of bytes accepted, together
    /// with the first error that stopped the loop.
    pub fn write_all(
        &mut self,
        data: &[u8],
        cancellable: Option<&Cancellable>,
    ) -> (usize, Result<()>) {
        let mut written = 0;
        while written < data.len() {
            match self.write(&data[written..], cancellable) {
                Ok(n) => written += n,
                Err(err) => return (written, Err(err)),
            }
        }
        (written, Ok(()))
    }

    /// Write a buffer's bytes.
    pub fn write_buffer(&mut self, buffer: &Buffer, cancellable: Option<&Cancellable>) -> Result<()> {
        self.write_all(buffer.as_bytes(), cancellable).1
    }

    /// Hand every pending byte to the underlying writer.
    fn flush_buffer(&mut self, cancellable: Option<&Cancellable>) -> Result<()> {
        while self.pos > 0 {
            check(cancellable)?;
            match self.inner.write(&self.buf[..self.pos]) {
                Ok(0) => {
                    return Err(Error::Io(std::io::Error::new(
                        ErrorKind::WriteZero,
                        "underlying writer accepted no bytes",
                    )));
                }
                Ok(n) => {
                    self.buf.copy_within(n..self.pos, 0);
                    self.pos -= n;
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Flush pending bytes and the underlying writer.
    pub fn flush(&mut self, cancellable: Option<&Cancellable>) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        self.flush_buffer(cancellable)?;
        check(cancellable)?;
        self.inner.flush()?;
        Ok(())
    }

    /// Flush and mark the stream closed. The stream counts as closed even if
    /// the final flush fails.
    pub fn close(&mut self, cancellable: Option<&Cancellable>) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let result = self.flush(cancellable);
        self.closed = true;
        result
    }
}

impl<W: Write> std::fmt::Debug for BufferedOutputStream<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedOutputStream")
            .field("buffer_size", &self.buf.len())
            .field("pending", &self.pos)
            .field("closed", &self.closed)
            .finish()
    }
}

/// [`BufferedOutputStream`] driven from async code.
///
/// Each call runs the synchronous operation on tokio's blocking thread pool
/// and reports the same results.
pub struct AsyncOutputStream<W: Write + Send + 'static> {
    inner: Arc<Mutex<BufferedOutputStream<W>>>,
}

impl<W: Write + Send + 'static> Clone for AsyncOutputStream<W> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<W: Write + Send + 'static> AsyncOutputStream<W> {
    /// Wrap a stream.
    pub fn new(stream: BufferedOutputStream<W>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(stream)),
        }
    }

    async fn offload<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut BufferedOutputStream<W>) -> Result<T> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || op(&mut inner.lock()))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }

    /// Async [`BufferedOutputStream::write_all`]; returns bytes accepted.
    pub async fn write_all(&self, data: Vec<u8>, cancellable: Option<Cancellable>) -> (usize, Result<()>) {
        let inner = self.inner.clone();
        let joined = tokio::task::spawn_blocking(move || {
            inner.lock().write_all(&data, cancellable.as_ref())
        })
        .await;
        match joined {
            Ok(outcome) => outcome,
            Err(e) => (0, Err(Error::Io(std::io::Error::other(e)))),
        }
    }

    /// Async [`BufferedOutputStream::flush`].
    pub async fn flush(&self, cancellable: Option<Cancellable>) -> Result<()> {
        self.offload(move |s| s.flush(cancellable.as_ref())).await
    }

    /// Async [`BufferedOutputStream::close`].
    pub async fn close(&self, cancellable: Option<Cancellable>) -> Result<()> {
        self.offload(move |s| s.close(cancellable.as_ref())).await
    }

    /// Pending byte count.
    pub fn pending(&self) -> usize {
        self.inner.lock().pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Writer accepting at most `chunk` bytes per call and failing after
    /// `fail_after` calls.
    struct Trickle {
        out: Vec<u8>,
        chunk: usize,
        calls: usize,
        fail_after: Option<usize>,
        interrupts: usize,
    }

    impl Trickle {
        fn new(chunk: usize) -> Self {
            Self {
                out: Vec::new(),
                chunk,
                calls: 0,
                fail_after: None,
                interrupts: 0,
            }
        }
    }

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.interrupts > 0 {
                self.interrupts -= 1;
                return Err(ErrorKind::Interrupted.into());
            }
            if self.fail_after.is_some_and(|n| self.calls >= n) {
                return Err(std::io::Error::other("device gone"));
            }
            self.calls += 1;
            let n = buf.len().min(self.chunk);
            self.out.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_partial_writes_are_retried() {
        let mut stream = BufferedOutputStream::with_capacity(8, Trickle::new(3));
        let data: Vec<u8> = (0..50).collect();
        let (written, result) = stream.write_all(&data, None);
        assert!(result.is_ok());
        assert_eq!(written, 50);
        stream.flush(None).unwrap();
        assert_eq!(stream.pending(), 0);
        assert_eq!(stream.get_ref().out, data);
    }

    #[test]
    fn test_interrupted_is_retried() {
        let mut writer = Trickle::new(100);
        writer.interrupts = 2;
        let mut stream = BufferedOutputStream::with_capacity(4, writer);
        assert!(stream.write_all(b"abcdefgh", None).1.is_ok());
        stream.flush(None).unwrap();
        assert_eq!(stream.get_ref().out, b"abcdefgh");
    }

    #[test]
    fn test_failure_keeps_unwritten_bytes_pending() {
        let mut writer = Trickle::new(3);
        writer.fail_after = Some(1);
        let mut stream = BufferedOutputStream::with_capacity(8, writer);

        let (written, result) = stream.write_all(b"0123456789", None);
        assert!(matches!(result, Err(Error::Io(_))));
        assert_eq!(written, 8);
        // 3 bytes reached the writer, 5 remain at the front of the buffer
        assert_eq!(stream.get_ref().out, b"012");
        assert_eq!(stream.pending(), 5);
    }

    #[test]
    fn test_cancelled_write() {
        let cancellable = Cancellable::new();
        let mut stream = BufferedOutputStream::with_capacity(4, Trickle::new(100));
        assert_eq!(stream.write(b"ab", Some(&cancellable)).unwrap(), 2);

        cancellable.cancel();
        let (written, result) = stream.write_all(b"cdef", Some(&cancellable));
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(written, 0);
        assert_eq!(stream.pending(), 2);
    }

    #[test]
    fn test_auto_grow_never_flushes() {
        let mut stream = BufferedOutputStream::with_capacity(2, Trickle::new(100));
        stream.set_auto_grow(true);
        assert!(stream.write_all(b"abcdef", None).1.is_ok());
        assert_eq!(stream.pending(), 6);
        assert!(stream.get_ref().out.is_empty());
        assert!(stream.buffer_size() >= 6);
    }

    #[test]
    fn test_close() {
        let mut stream = BufferedOutputStream::new(Trickle::new(100));
        stream.write(b"tail", None).unwrap();
        stream.close(None).unwrap();
        assert!(stream.is_closed());
        assert_eq!(stream.get_ref().out, b"tail");
        assert!(matches!(stream.write(b"x", None), Err(Error::Closed)));
        assert!(stream.close(None).is_ok());
    }

    #[tokio::test]
    async fn test_async_matches_sync() {
        let stream = AsyncOutputStream::new(BufferedOutputStream::with_capacity(4, Trickle::new(3)));
        let (written, result) = stream.write_all(b"hello async".to_vec(), None).await;
        assert!(result.is_ok());
        assert_eq!(written, 11);
        stream.close(None).await.unwrap();
        assert_eq!(stream.pending(), 0);

        let cancellable = Cancellable::new();
        cancellable.cancel();
        let (_, result) = stream.write_all(b"x".to_vec(), Some(cancellable)).await;
        assert!(matches!(result, Err(Error::Closed)));
    }
}
