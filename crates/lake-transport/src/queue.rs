//! Message queues sized by [`HighWaterMark`].

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::options::HighWaterMark;

/// Outcome of a non-blocking offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Offer {
    Accepted,
    Full,
    Closed,
}

pub(crate) enum QueueSender {
    Bounded(mpsc::Sender<Bytes>),
    Unbounded(mpsc::UnboundedSender<Bytes>),
}

pub(crate) enum QueueReceiver {
    Bounded(mpsc::Receiver<Bytes>),
    Unbounded(mpsc::UnboundedReceiver<Bytes>),
}

pub(crate) fn queue(high_water_mark: HighWaterMark) -> (QueueSender, QueueReceiver) {
    match high_water_mark {
        HighWaterMark::Unbounded => {
            let (tx, rx) = mpsc::unbounded_channel();
            (QueueSender::Unbounded(tx), QueueReceiver::Unbounded(rx))
        }
        HighWaterMark::Bounded(limit) => {
            // mpsc::channel rejects a zero capacity
            let (tx, rx) = mpsc::channel(limit.max(1));
            (QueueSender::Bounded(tx), QueueReceiver::Bounded(rx))
        }
    }
}

impl Clone for QueueSender {
    fn clone(&self) -> Self {
        match self {
            Self::Bounded(tx) => Self::Bounded(tx.clone()),
            Self::Unbounded(tx) => Self::Unbounded(tx.clone()),
        }
    }
}

impl QueueSender {
    /// Enqueues, waiting for room on a bounded queue.
    ///
    /// Fails only when the receiving side is gone.
    pub(crate) async fn send(&self, message: Bytes) -> Result<(), Bytes> {
        match self {
            Self::Bounded(tx) => tx.send(message).await.map_err(|e| e.0),
            Self::Unbounded(tx) => tx.send(message).map_err(|e| e.0),
        }
    }

    /// Enqueues without waiting.
    pub(crate) fn offer(&self, message: Bytes) -> Offer {
        match self {
            Self::Bounded(tx) => match tx.try_send(message) {
                Ok(()) => Offer::Accepted,
                Err(mpsc::error::TrySendError::Full(_)) => Offer::Full,
                Err(mpsc::error::TrySendError::Closed(_)) => Offer::Closed,
            },
            Self::Unbounded(tx) => match tx.send(message) {
                Ok(()) => Offer::Accepted,
                Err(_) => Offer::Closed,
            },
        }
    }
}

impl QueueReceiver {
    async fn recv(&mut self) -> Option<Bytes> {
        match self {
            Self::Bounded(rx) => rx.recv().await,
            Self::Unbounded(rx) => rx.recv().await,
        }
    }

    fn try_recv(&mut self) -> Option<Bytes> {
        match self {
            Self::Bounded(rx) => rx.try_recv().ok(),
            Self::Unbounded(rx) => rx.try_recv().ok(),
        }
    }

    /// Waits for the next message. With `conflate`, anything queued behind
    /// it is consumed and only the newest message is returned.
    pub(crate) async fn next(&mut self, conflate: bool) -> Option<Bytes> {
        let mut message = self.recv().await?;
        if conflate {
            while let Some(newer) = self.try_recv() {
                message = newer;
            }
        }
        Some(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unbounded_keeps_everything_in_order() {
        let (tx, mut rx) = queue(HighWaterMark::Unbounded);
        for i in 0..1000u32 {
            assert_eq!(tx.offer(Bytes::from(i.to_string())), Offer::Accepted);
        }
        for i in 0..1000u32 {
            assert_eq!(rx.next(false).await, Some(Bytes::from(i.to_string())));
        }
    }

    #[tokio::test]
    async fn test_bounded_reports_full() {
        let (tx, _rx) = queue(HighWaterMark::Bounded(2));
        assert_eq!(tx.offer(Bytes::from_static(b"a")), Offer::Accepted);
        assert_eq!(tx.offer(Bytes::from_static(b"b")), Offer::Accepted);
        assert_eq!(tx.offer(Bytes::from_static(b"c")), Offer::Full);
    }

    #[tokio::test]
    async fn test_zero_bound_is_clamped() {
        let (tx, mut rx) = queue(HighWaterMark::Bounded(0));
        assert_eq!(tx.offer(Bytes::from_static(b"a")), Offer::Accepted);
        assert_eq!(rx.next(false).await, Some(Bytes::from_static(b"a")));
    }

    #[tokio::test]
    async fn test_closed_receiver() {
        let (tx, rx) = queue(HighWaterMark::Unbounded);
        drop(rx);
        assert_eq!(tx.offer(Bytes::from_static(b"a")), Offer::Closed);
        assert!(tx.send(Bytes::from_static(b"a")).await.is_err());
    }

    #[tokio::test]
    async fn test_conflate_returns_latest() {
        let (tx, mut rx) = queue(HighWaterMark::Unbounded);
        tx.offer(Bytes::from_static(b"1"));
        tx.offer(Bytes::from_static(b"2"));
        tx.offer(Bytes::from_static(b"3"));
        assert_eq!(rx.next(true).await, Some(Bytes::from_static(b"3")));
    }
}
