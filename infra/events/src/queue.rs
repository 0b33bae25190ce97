//! Multi-producer, single-consumer FIFO used by every channel of the hub.
//!
//! Items travel through an unbounded `flume` channel; bounded queues meter capacity with a
//! [`Semaphore`]. A producer first reserves a [`Slot`] and only then builds its item, so an
//! item exists (and counts as pending) only once it is certain to be queued. The queue keeps
//! its own receiver clone, which lets a producer pop the oldest item for drop-oldest.

use flume::{Receiver, Sender};
use std::fmt;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;

/// Why a slot could not be reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Rejected {
    Full,
    Closed,
}

/// Items that a drop-oldest publish may push out of a full queue.
pub(crate) trait Evict {
    /// Disposes of an evicted item. Returns `false` when it was not a published event.
    fn evict(self) -> bool;
}

pub(crate) struct EventQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    capacity: Option<usize>,
    permits: Option<Semaphore>,
    closed: CancellationToken,
}

/// Reserved room for exactly one item.
///
/// Dropping the slot unused gives the room back.
#[must_use = "A reserved slot holds queue capacity until it is used or dropped"]
pub(crate) struct Slot<'a, T> {
    queue: &'a EventQueue<T>,
    permit: Option<SemaphorePermit<'a>>,
}

impl<T> Slot<'_, T> {
    /// Enqueues `item`. The capacity it holds is returned when the consumer pops the item.
    ///
    /// A send racing [`EventQueue::close`] may land after the consumer stopped; such items
    /// are dropped together with the queue.
    pub(crate) fn send(self, item: T) {
        if let Some(permit) = self.permit {
            permit.forget();
        }
        // The queue owns a receiver, so the channel is never disconnected.
        let _ = self.queue.tx.send(item);
    }
}

impl<T> EventQueue<T> {
    /// `capacity == None` yields an unbounded queue.
    pub(crate) fn new(capacity: Option<usize>) -> Self {
        let (tx, rx) = flume::unbounded();
        Self {
            tx,
            rx,
            capacity,
            permits: capacity.map(|cap| Semaphore::new(cap.min(Semaphore::MAX_PERMITS))),
            closed: CancellationToken::new(),
        }
    }

    /// Fast path: reserves room without waiting.
    pub(crate) fn try_reserve(&self) -> Result<Slot<'_, T>, Rejected> {
        if self.closed.is_cancelled() {
            return Err(Rejected::Closed);
        }
        let Some(permits) = &self.permits else {
            return Ok(Slot { queue: self, permit: None });
        };
        match permits.try_acquire() {
            Ok(permit) => Ok(Slot { queue: self, permit: Some(permit) }),
            Err(tokio::sync::TryAcquireError::NoPermits) => Err(Rejected::Full),
            Err(tokio::sync::TryAcquireError::Closed) => Err(Rejected::Closed),
        }
    }

    /// Slow path: waits until there is room. Resolves with [`Rejected::Closed`] once the queue
    /// is closed.
    pub(crate) async fn reserve(&self) -> Result<Slot<'_, T>, Rejected> {
        let Some(permits) = &self.permits else {
            return self.try_reserve();
        };
        tokio::select! {
            biased;
            () = self.closed.cancelled() => Err(Rejected::Closed),
            permit = permits.acquire() => match permit {
                Ok(permit) => Ok(Slot { queue: self, permit: Some(permit) }),
                Err(_) => Err(Rejected::Closed),
            },
        }
    }

    /// Reserves room, evicting the oldest queued items while the queue is full.
    ///
    /// Every evicted item is handed back. The room an evicted item held passes to the slot.
    pub(crate) fn reserve_evicting(&self) -> Result<(Slot<'_, T>, Vec<T>), Rejected> {
        let mut evicted = Vec::new();
        loop {
            match self.try_reserve() {
                Ok(slot) => return Ok((slot, evicted)),
                Err(Rejected::Closed) => return Err(Rejected::Closed),
                Err(Rejected::Full) => {},
            }
            if let Ok(oldest) = self.rx.try_recv() {
                evicted.push(oldest);
                return Ok((Slot { queue: self, permit: None }, evicted));
            }
            // The consumer emptied the queue meanwhile; its pop frees a permit.
            std::hint::spin_loop();
        }
    }

    /// Waits for the next item. Returns `None` once the queue is closed and empty.
    pub(crate) async fn pop(&self) -> Option<T> {
        let item = tokio::select! {
            biased;
            item = self.rx.recv_async() => item.ok(),
            () = self.closed.cancelled() => self.rx.try_recv().ok(),
        }?;
        if let Some(permits) = &self.permits {
            permits.add_permits(1);
        }
        Some(item)
    }

    /// Stops accepting items and wakes every waiting producer. Queued items remain poppable.
    pub(crate) fn close(&self) {
        self.closed.cancel();
        if let Some(permits) = &self.permits {
            permits.close();
        }
    }

    /// Closes the queue and hands back whatever was still queued.
    pub(crate) fn close_and_take(&self) -> Vec<T> {
        self.close();
        self.rx.drain().collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.rx.len()
    }
}

impl<T> fmt::Debug for EventQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventQueue")
            .field("len", &self.rx.len())
            .field("capacity", &self.capacity)
            .field("closed", &self.closed.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn push<T>(queue: &EventQueue<T>, item: T) -> Result<(), Rejected> {
        queue.try_reserve().map(|slot| slot.send(item))
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = EventQueue::new(None);
        for i in 0..5 {
            push(&queue, i).unwrap();
        }
        for i in 0..5 {
            assert_eq!(queue.pop().await, Some(i));
        }
    }

    #[tokio::test]
    async fn test_bounded_rejects_when_full() {
        let queue = EventQueue::new(Some(1));
        push(&queue, 1).unwrap();
        assert_eq!(push(&queue, 2), Err(Rejected::Full));
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.pop().await, Some(1));
        push(&queue, 3).unwrap();
    }

    #[tokio::test]
    async fn test_unused_slot_returns_capacity() {
        let queue = EventQueue::<u32>::new(Some(1));
        let slot = queue.try_reserve().unwrap();
        assert_eq!(queue.try_reserve().err(), Some(Rejected::Full));
        drop(slot);
        push(&queue, 1).unwrap();
    }

    #[tokio::test]
    async fn test_reserve_evicting_drops_oldest() {
        let queue = EventQueue::new(Some(2));
        push(&queue, 1).unwrap();
        push(&queue, 2).unwrap();

        let (slot, evicted) = queue.reserve_evicting().unwrap();
        slot.send(3);
        assert_eq!(evicted, [1]);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().await, Some(2));
        assert_eq!(queue.pop().await, Some(3));

        push(&queue, 4).unwrap();
        push(&queue, 5).unwrap();
        assert_eq!(push(&queue, 6), Err(Rejected::Full));
    }

    #[tokio::test]
    async fn test_blocked_reserve_resumes_after_pop() {
        let queue = Arc::new(EventQueue::new(Some(1)));
        push(&queue, 1).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.reserve().await.map(|slot| slot.send(2)).is_ok() })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!producer.is_finished());
        assert_eq!(queue.pop().await, Some(1));
        assert!(producer.await.unwrap());
        assert_eq!(queue.pop().await, Some(2));
    }

    #[tokio::test]
    async fn test_close_wakes_consumer_and_producers() {
        let queue = Arc::new(EventQueue::<u32>::new(Some(1)));
        push(&queue, 7).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.reserve().await.map(|slot| slot.send(8)) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        queue.close();
        assert_eq!(producer.await.unwrap(), Err(Rejected::Closed));
        assert_eq!(queue.pop().await, Some(7));
        assert_eq!(queue.pop().await, None);
        assert_eq!(push(&queue, 9), Err(Rejected::Closed));
    }

    #[tokio::test]
    async fn test_close_and_take_discards_items() {
        let queue = EventQueue::new(None);
        push(&queue, 1).unwrap();
        push(&queue, 2).unwrap();

        assert_eq!(queue.close_and_take(), [1, 2]);
        assert_eq!(queue.pop().await, None);
        assert_eq!(queue.reserve().await.err(), Some(Rejected::Closed));
    }
}
