use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

/// Unbounded FIFO between many producers and a single consumer.
///
/// Producers never wait. The consumer parks in [`pop`](HandoffQueue::pop) until an item is
/// available. Completion is decided by the consumer counting items, not by closing the queue.
#[derive(Debug)]
pub struct HandoffQueue<T> {
    items: Mutex<VecDeque<T>>,
    available: Notify,
}

impl<T> Default for HandoffQueue<T> {
    fn default() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Notify::new(),
        }
    }
}

impl<T> HandoffQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, item: T) {
        match self.items.lock() {
            Ok(mut items) => items.push_back(item),
            Err(poisoned) => poisoned.into_inner().push_back(item),
        }
        // Stores a permit when the consumer is not parked yet.
        self.available.notify_one();
    }

    fn try_pop(&self) -> Option<T> {
        match self.items.lock() {
            Ok(mut items) => items.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        }
    }

    /// Waits for the next item. Must only be called from one task at a time.
    pub async fn pop(&self) -> T {
        loop {
            if let Some(item) = self.try_pop() {
                return item;
            }
            self.available.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_items_come_out_in_push_order() {
        let queue = HandoffQueue::new();
        queue.push(1);
        queue.push(2);
        queue.push(3);

        assert_eq!(queue.pop().await, 1);
        assert_eq!(queue.pop().await, 2);
        assert_eq!(queue.pop().await, 3);
        assert!(queue.try_pop().is_none());
    }

    #[tokio::test]
    async fn test_consumer_wakes_for_late_producer() {
        let queue = Arc::new(HandoffQueue::new());
        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move {
                for i in 0..50u32 {
                    if i % 10 == 0 {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                    queue.push(i);
                }
            })
        };

        let mut received = Vec::new();
        while received.len() < 50 {
            received.push(queue.pop().await);
        }
        producer.await.unwrap();

        assert_eq!(received, (0..50).collect::<Vec<_>>());
    }
}
