//! 송신 큐 (백프레셔)
//!
//! 용량만큼의 permit을 가진 세마포어와 FIFO를 1:1로 묶음.
//! - enqueue: permit 하나 소비 (가득 차면 대기)
//! - dequeue: permit 하나 반환
//! - close: 큐를 떼어내고 남은 엔트리 수만큼 permit 반환

use std::collections::VecDeque;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};

use crate::{Error, Result};

/// 송신 큐 엔트리
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendEntry {
    /// 전송할 버퍼 (헤더 포함)
    pub buf: Bytes,

    /// 이 버퍼를 보낸 뒤 쓰기 방향 종료
    pub close_after: bool,
}

impl SendEntry {
    pub fn new(buf: Bytes) -> Self {
        Self {
            buf,
            close_after: false,
        }
    }

    pub fn closing(buf: Bytes) -> Self {
        Self {
            buf,
            close_after: true,
        }
    }
}

/// 용량 제한 송신 큐
#[derive(Debug)]
pub struct SendQueue {
    /// None이면 닫힌 큐
    entries: Mutex<Option<VecDeque<SendEntry>>>,

    permits: Semaphore,

    /// 소비자 깨우기
    notify: Notify,

    capacity: usize,
}

impl SendQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(Some(VecDeque::with_capacity(capacity))),
            permits: Semaphore::new(capacity),
            notify: Notify::new(),
            capacity,
        }
    }

    /// 엔트리 하나 추가 (큐가 가득 차면 대기)
    pub async fn enqueue(&self, entry: SendEntry) -> Result<()> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| Error::QueueClosed)?;

        {
            let mut guard = self.entries.lock();
            let queue = guard.as_mut().ok_or(Error::QueueClosed)?;
            queue.push_back(entry);
        }

        // permit은 dequeue 시점에 반환
        permit.forget();
        self.notify.notify_one();
        Ok(())
    }

    /// 여러 엔트리를 연속으로 추가
    ///
    /// 필요한 permit을 한 번에 얻으므로 다른 생산자의 엔트리가 끼어들지 않음
    pub async fn enqueue_many(&self, batch: Vec<SendEntry>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        if batch.len() > self.capacity {
            return Err(Error::BatchTooLarge {
                size: batch.len(),
                capacity: self.capacity,
            });
        }

        let permit = self
            .permits
            .acquire_many(batch.len() as u32)
            .await
            .map_err(|_| Error::QueueClosed)?;

        {
            let mut guard = self.entries.lock();
            let queue = guard.as_mut().ok_or(Error::QueueClosed)?;
            queue.extend(batch);
        }

        permit.forget();
        self.notify.notify_one();
        Ok(())
    }

    /// 대기 없이 엔트리 하나 꺼내기
    pub fn try_dequeue(&self) -> Option<SendEntry> {
        let entry = self.entries.lock().as_mut()?.pop_front()?;
        self.permits.add_permits(1);
        Some(entry)
    }

    /// 엔트리 하나 꺼내기 (비어 있으면 대기, 닫히면 None)
    pub async fn dequeue(&self) -> Option<SendEntry> {
        loop {
            let notified = self.notify.notified();

            if self.is_closed() {
                return None;
            }
            if let Some(entry) = self.try_dequeue() {
                return Some(entry);
            }

            notified.await;
        }
    }

    /// 큐 닫기
    ///
    /// 이후 enqueue는 QueueClosed. 대기 중인 생산자는 반환된 permit으로
    /// 깨어나 닫힌 큐를 확인하고, 그 permit을 다시 반환하며 다음 대기자를 깨움
    pub fn close(&self) -> usize {
        let drained = match self.entries.lock().take() {
            Some(queue) => queue.len(),
            None => return 0,
        };

        self.permits.add_permits(drained);
        self.notify.notify_waiters();
        drained
    }

    pub fn is_closed(&self) -> bool {
        self.entries.lock().is_none()
    }

    /// 큐에 남아 있는 엔트리 수
    pub fn len(&self) -> usize {
        self.entries.lock().as_ref().map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn entry(n: u8) -> SendEntry {
        SendEntry::new(Bytes::copy_from_slice(&[n]))
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = SendQueue::new(4);
        for n in 0..4 {
            queue.enqueue(entry(n)).await.unwrap();
        }
        for n in 0..4 {
            assert_eq!(queue.dequeue().await, Some(entry(n)));
        }
        assert!(queue.try_dequeue().is_none());
    }

    #[tokio::test]
    async fn test_backpressure_blocks_until_dequeue() {
        let queue = Arc::new(SendQueue::new(2));
        queue.enqueue(entry(0)).await.unwrap();
        queue.enqueue(entry(1)).await.unwrap();

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.enqueue(entry(2)).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!producer.is_finished());
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.dequeue().await, Some(entry(0)));
        tokio::time::timeout(Duration::from_secs(1), producer)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        // 유실 없음
        assert_eq!(queue.dequeue().await, Some(entry(1)));
        assert_eq!(queue.dequeue().await, Some(entry(2)));
    }

    #[tokio::test]
    async fn test_close_unblocks_waiting_producers() {
        let queue = Arc::new(SendQueue::new(1));
        queue.enqueue(entry(0)).await.unwrap();

        let producers: Vec<_> = (1..=3)
            .map(|n| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.enqueue(entry(n)).await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(queue.close(), 1);
        assert!(queue.is_closed());

        for producer in producers {
            let result = tokio::time::timeout(Duration::from_secs(1), producer)
                .await
                .unwrap()
                .unwrap();
            assert!(matches!(result, Err(Error::QueueClosed)));
        }
        assert_eq!(queue.dequeue().await, None);
    }

    #[tokio::test]
    async fn test_close_wakes_consumer() {
        let queue = Arc::new(SendQueue::new(1));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();
        let result = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_batch_limits() {
        let queue = SendQueue::new(3);
        let batch: Vec<_> = (0..4).map(entry).collect();
        assert!(matches!(
            queue.enqueue_many(batch).await,
            Err(Error::BatchTooLarge { size: 4, capacity: 3 })
        ));

        queue.enqueue_many((0..3).map(entry).collect()).await.unwrap();
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.try_dequeue(), Some(entry(0)));
    }
}
