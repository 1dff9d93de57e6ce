//! Pull-based byte streams returned by read-stream calls.
//!
//! A [`ReadStream`] is handed back before any I/O happens. Failures, including
//! failures to open the upstream request, arrive as stream items. Dropping the
//! stream drops the upstream request.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt, TryStreamExt};
use tokio::sync::watch;
use tokio_util::io::StreamReader;

use crate::vfs::{VfsError, VfsResult};

/// Transfer progress of a stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    /// Bytes received from upstream so far.
    pub transferred: u64,
    /// Total upstream bytes, when known.
    pub total: Option<u64>,
}

/// A stage applied to every chunk of a stream.
pub trait Transform: Send + 'static {
    /// Transform one chunk. Returning an empty chunk emits nothing.
    fn transform(&mut self, chunk: Bytes) -> VfsResult<Bytes>;

    /// Flush buffered output at end of stream.
    fn finish(&mut self) -> VfsResult<Bytes> {
        Ok(Bytes::new())
    }
}

/// Drops the first `n` bytes of the stream.
#[derive(Debug, Clone)]
pub struct SkipBytes {
    remaining: u64,
}

impl SkipBytes {
    pub fn new(n: u64) -> Self {
        Self { remaining: n }
    }
}

impl Transform for SkipBytes {
    fn transform(&mut self, mut chunk: Bytes) -> VfsResult<Bytes> {
        if self.remaining == 0 {
            return Ok(chunk);
        }
        let skip = self.remaining.min(chunk.len() as u64);
        self.remaining -= skip;
        Ok(chunk.split_off(skip as usize))
    }
}

/// Byte stream with a progress channel.
pub struct ReadStream {
    inner: BoxStream<'static, VfsResult<Bytes>>,
    progress: watch::Receiver<Progress>,
}

impl std::fmt::Debug for ReadStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadStream")
            .field("progress", &*self.progress.borrow())
            .finish_non_exhaustive()
    }
}

impl ReadStream {
    /// Wrap a stream whose progress is not tracked.
    pub fn new(inner: BoxStream<'static, VfsResult<Bytes>>) -> Self {
        let (_tx, rx) = watch::channel(Progress::default());
        Self { inner, progress: rx }
    }

    /// Wrap a response body, counting bytes as they are pulled.
    pub fn from_body(body: BoxStream<'static, VfsResult<Bytes>>, total: Option<u64>) -> Self {
        let (tx, rx) = watch::channel(Progress {
            transferred: 0,
            total,
        });
        let inner = body
            .inspect_ok(move |chunk| {
                tx.send_modify(|p| p.transferred += chunk.len() as u64);
            })
            .boxed();
        Self {
            inner,
            progress: rx,
        }
    }

    /// A stream holding the given bytes.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data: Bytes = data.into();
        let total = data.len() as u64;
        Self::from_body(stream::once(async move { Ok(data) }).boxed(), Some(total))
    }

    /// A stream that yields nothing.
    pub fn empty() -> Self {
        Self::from_body(stream::empty().boxed(), Some(0))
    }

    /// A stream whose only item is `err`.
    pub fn failed(err: VfsError) -> Self {
        Self::new(stream::once(async move { Err(err) }).boxed())
    }

    /// A stream that runs `open` on first poll and then yields its bytes.
    ///
    /// Progress of the opened stream is forwarded onto this stream's channel.
    pub fn deferred(open: BoxFuture<'static, VfsResult<ReadStream>>) -> Self {
        let (tx, rx) = watch::channel(Progress::default());
        let inner = Deferred {
            state: DeferredState::Opening(open),
            tx,
        }
        .boxed();
        Self {
            inner,
            progress: rx,
        }
    }

    /// Append a transform stage.
    pub fn pipe<T: Transform>(self, transform: T) -> Self {
        let inner = Piped {
            inner: self.inner,
            transform,
            finished: false,
        }
        .boxed();
        Self {
            inner,
            progress: self.progress,
        }
    }

    /// End the stream after `n` bytes. The upstream is dropped at that point.
    pub fn limit(self, n: u64) -> Self {
        let inner = Limited {
            inner: Some(self.inner),
            remaining: n,
        }
        .boxed();
        Self {
            inner,
            progress: self.progress,
        }
    }

    /// Subscribe to progress updates.
    pub fn progress(&self) -> watch::Receiver<Progress> {
        self.progress.clone()
    }

    /// Adapt into a tokio `AsyncRead`.
    pub fn into_async_read(self) -> StreamReader<ReadStream, Bytes> {
        StreamReader::new(self)
    }

    /// Drain the stream into one buffer.
    pub async fn collect_bytes(self) -> VfsResult<Bytes> {
        let buf = self
            .try_fold(BytesMut::new(), |mut buf, chunk| async move {
                buf.extend_from_slice(&chunk);
                Ok(buf)
            })
            .await?;
        Ok(buf.freeze())
    }
}

impl Stream for ReadStream {
    type Item = VfsResult<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

struct Piped<T> {
    inner: BoxStream<'static, VfsResult<Bytes>>,
    transform: T,
    finished: bool,
}

impl<T: Transform> Stream for Piped<T> {
    type Item = VfsResult<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        // Piped is Unpin: BoxStream is a pinned box and T is never pinned.
        let this = Pin::into_inner(self);
        loop {
            if this.finished {
                return Poll::Ready(None);
            }
            match this.inner.as_mut().poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(chunk))) => match this.transform.transform(chunk) {
                    Ok(out) if out.is_empty() => continue,
                    Ok(out) => return Poll::Ready(Some(Ok(out))),
                    Err(e) => {
                        this.finished = true;
                        return Poll::Ready(Some(Err(e)));
                    }
                },
                Poll::Ready(Some(Err(e))) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    this.finished = true;
                    return match this.transform.finish() {
                        Ok(out) if out.is_empty() => Poll::Ready(None),
                        Ok(out) => Poll::Ready(Some(Ok(out))),
                        Err(e) => Poll::Ready(Some(Err(e))),
                    };
                }
            }
        }
    }
}

impl<T> Unpin for Piped<T> {}

struct Limited {
    inner: Option<BoxStream<'static, VfsResult<Bytes>>>,
    remaining: u64,
}

impl Stream for Limited {
    type Item = VfsResult<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.remaining == 0 {
            self.inner = None;
            return Poll::Ready(None);
        }
        let Some(inner) = self.inner.as_mut() else {
            return Poll::Ready(None);
        };
        match inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(mut chunk))) => {
                if chunk.len() as u64 > self.remaining {
                    chunk.truncate(self.remaining as usize);
                }
                self.remaining -= chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(None) => {
                self.inner = None;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

enum DeferredState {
    Opening(BoxFuture<'static, VfsResult<ReadStream>>),
    Open(ReadStream),
    Done,
}

struct Deferred {
    state: DeferredState,
    tx: watch::Sender<Progress>,
}

impl Stream for Deferred {
    type Item = VfsResult<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match &mut self.state {
                DeferredState::Opening(open) => match open.as_mut().poll(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(Ok(stream)) => {
                        self.tx.send_replace(*stream.progress.borrow());
                        self.state = DeferredState::Open(stream);
                    }
                    Poll::Ready(Err(e)) => {
                        self.state = DeferredState::Done;
                        return Poll::Ready(Some(Err(e)));
                    }
                },
                DeferredState::Open(stream) => {
                    let item = Pin::new(&mut *stream).poll_next(cx);
                    let progress = *stream.progress.borrow();
                    if let Poll::Ready(None) = item {
                        self.state = DeferredState::Done;
                    }
                    self.tx.send_replace(progress);
                    return item;
                }
                DeferredState::Done => return Poll::Ready(None),
            }
        }
    }
}
