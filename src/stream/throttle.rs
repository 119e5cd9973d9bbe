//! Leading-edge throttle with latest-wins coalescing

use futures::Stream;
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{Instant, Sleep, sleep};

/// Extension trait to add throttling to any Stream
pub trait ThrottleExt: Stream {
    /// Emit at most one item per `period`.
    ///
    /// The first item passes through immediately. Items arriving during the quiet
    /// period replace each other and only the latest is emitted when it expires.
    /// The final item before the source ends is never lost.
    fn throttle(self, period: Duration) -> Throttle<Self>
    where
        Self: Sized,
    {
        Throttle::new(self, period)
    }
}

impl<T: Stream> ThrottleExt for T {}

pin_project! {
    /// Stream returned by [`ThrottleExt::throttle`]
    pub struct Throttle<S: Stream> {
        #[pin]
        stream: S,
        #[pin]
        quiet: Sleep,
        period: Duration,
        cooling: bool,
        finished: bool,
        pending: Option<S::Item>,
    }
}

impl<S: Stream> Throttle<S> {
    pub fn new(stream: S, period: Duration) -> Self {
        Self { stream, quiet: sleep(Duration::ZERO), period, cooling: false, finished: false, pending: None }
    }
}

impl<S: Stream> Stream for Throttle<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        while !*this.finished {
            match this.stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(item)) => *this.pending = Some(item),
                Poll::Ready(None) => *this.finished = true,
                Poll::Pending => break,
            }
        }

        if this.pending.is_none() {
            return if *this.finished { Poll::Ready(None) } else { Poll::Pending };
        }

        if *this.cooling {
            if this.quiet.as_mut().poll(cx).is_pending() {
                return Poll::Pending;
            }
            *this.cooling = false;
        }

        this.quiet.as_mut().reset(Instant::now() + *this.period);
        *this.cooling = true;
        Poll::Ready(this.pending.take())
    }
}
