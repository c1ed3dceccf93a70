use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use bytes::Bytes;
use tokio::time::{sleep, Instant, Sleep};

use crate::{error::NetError, ByteStream};

/// Inactivity-timeout decorator for a byte stream.
///
/// The deadline re-arms on every yielded chunk, so a slow-but-alive transfer
/// never trips it; only a stalled one does. On expiry the stream yields a
/// single `NetError::Timeout` and then ends.
pub struct IdleTimeout {
    inner: ByteStream,
    idle: Duration,
    deadline: Pin<Box<Sleep>>,
    expired: bool,
}

impl IdleTimeout {
    pub fn new(inner: ByteStream, idle: Duration) -> Self {
        Self {
            inner,
            idle,
            deadline: Box::pin(sleep(idle)),
            expired: false,
        }
    }
}

impl futures::Stream for IdleTimeout {
    type Item = Result<Bytes, NetError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.expired {
            return Poll::Ready(None);
        }
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(item)) => {
                this.deadline.as_mut().reset(Instant::now() + this.idle);
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => match this.deadline.as_mut().poll(cx) {
                Poll::Ready(()) => {
                    this.expired = true;
                    Poll::Ready(Some(Err(NetError::Timeout)))
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    fn boxed<S>(s: S) -> ByteStream
    where
        S: futures::Stream<Item = Result<Bytes, NetError>> + Send + 'static,
    {
        Box::pin(s)
    }

    #[tokio::test]
    async fn passes_items_through() {
        let inner = boxed(futures::stream::iter(vec![
            Ok(Bytes::from_static(b"ab")),
            Ok(Bytes::from_static(b"cd")),
        ]));
        let mut s = IdleTimeout::new(inner, Duration::from_secs(5));
        assert_eq!(s.next().await.unwrap().unwrap(), Bytes::from_static(b"ab"));
        assert_eq!(s.next().await.unwrap().unwrap(), Bytes::from_static(b"cd"));
        assert!(s.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_stream_times_out() {
        let inner = boxed(futures::stream::pending());
        let mut s = IdleTimeout::new(inner, Duration::from_millis(100));
        let item = s.next().await.expect("timeout item");
        assert!(matches!(item, Err(NetError::Timeout)));
        assert!(s.next().await.is_none(), "stream is fused after expiry");
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_rearms_on_each_chunk() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let inner = boxed(futures::stream::poll_fn(move |cx| rx.poll_recv(cx)));
        let mut s = IdleTimeout::new(inner, Duration::from_millis(100));

        tx.send(Ok(Bytes::from_static(b"x"))).unwrap();
        assert_eq!(s.next().await.unwrap().unwrap(), Bytes::from_static(b"x"));

        // 80ms of silence, then a chunk: under the window each time.
        tokio::time::sleep(Duration::from_millis(80)).await;
        tx.send(Ok(Bytes::from_static(b"y"))).unwrap();
        assert_eq!(s.next().await.unwrap().unwrap(), Bytes::from_static(b"y"));
    }
}
