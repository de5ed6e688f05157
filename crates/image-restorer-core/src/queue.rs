//! Unbounded FIFO work queue between admission and the single worker

use crate::error::{ProcessingError, Result};
use crate::models::JobDescriptor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Producer side of the work queue. Cheap to clone; `enqueue` never blocks.
#[derive(Debug, Clone)]
pub struct WorkQueue {
    sender: mpsc::UnboundedSender<JobDescriptor>,
    depth: Arc<AtomicUsize>,
}

/// Consumer side of the work queue. There is exactly one per queue.
#[derive(Debug)]
pub struct QueueConsumer {
    receiver: mpsc::UnboundedReceiver<JobDescriptor>,
    depth: Arc<AtomicUsize>,
}

impl WorkQueue {
    /// Create a queue and its only consumer
    pub fn new() -> (Self, QueueConsumer) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));

        (
            Self {
                sender,
                depth: depth.clone(),
            },
            QueueConsumer { receiver, depth },
        )
    }

    /// Append a descriptor to the tail
    pub fn enqueue(&self, descriptor: JobDescriptor) -> Result<()> {
        let job_id = descriptor.job_id;
        self.depth.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(descriptor).is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(ProcessingError::QueueClosed);
        }

        tracing::debug!("Job {} enqueued", job_id);
        Ok(())
    }

    /// Descriptors enqueued but not yet taken by the consumer
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl QueueConsumer {
    /// Wait for the next descriptor in FIFO order.
    ///
    /// Returns `None` once every producer handle has been dropped and the
    /// queue is drained.
    pub async fn dequeue(&mut self) -> Option<JobDescriptor> {
        let descriptor = self.receiver.recv().await?;
        self.depth.fetch_sub(1, Ordering::SeqCst);
        Some(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobOptions;
    use std::time::Duration;
    use uuid::Uuid;

    fn descriptor() -> JobDescriptor {
        JobDescriptor {
            job_id: Uuid::new_v4(),
            files: Vec::new(),
            options: JobOptions::default(),
        }
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let (queue, mut consumer) = WorkQueue::new();
        let ids: Vec<_> = (0..5)
            .map(|_| {
                let item = descriptor();
                let id = item.job_id;
                queue.enqueue(item).unwrap();
                id
            })
            .collect();

        assert_eq!(queue.depth(), 5);
        for id in ids {
            assert_eq!(consumer.dequeue().await.unwrap().job_id, id);
        }
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn test_dequeue_waits_for_items() {
        let (queue, mut consumer) = WorkQueue::new();
        let item = descriptor();
        let id = item.job_id;

        let handle = tokio::spawn(async move { consumer.dequeue().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        queue.enqueue(item).unwrap();
        let received = handle.await.unwrap().unwrap();
        assert_eq!(received.job_id, id);
    }

    #[tokio::test]
    async fn test_dequeue_ends_when_producers_drop() {
        let (queue, mut consumer) = WorkQueue::new();
        queue.enqueue(descriptor()).unwrap();
        drop(queue);

        assert!(consumer.dequeue().await.is_some());
        assert!(consumer.dequeue().await.is_none());
    }

    #[tokio::test]
    async fn test_enqueue_fails_without_consumer() {
        let (queue, consumer) = WorkQueue::new();
        drop(consumer);

        assert!(queue.is_closed());
        assert!(matches!(queue.enqueue(descriptor()), Err(ProcessingError::QueueClosed)));
        assert_eq!(queue.depth(), 0);
    }
}
