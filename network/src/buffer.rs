//! Bounded multi-reader packet buffer.
//!
//! One instance sits between each pair of pipeline stages. Many
//! producers push framed packets, many consumers await them. When the
//! buffer is full the oldest unread packet is dropped and counted:
//! ingestion is best-effort, verification is the gate. Closing the
//! buffer wakes every waiting consumer; a drained, closed buffer yields
//! `None` so consumers can exit cleanly.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use bytes::Bytes;
use tokio::sync::Notify;

pub struct PacketBuffer {
    inner: Mutex<Inner>,
    notify: Notify,
    dropped: AtomicU64,
    capacity: usize,
}

struct Inner {
    queue: VecDeque<Bytes>,
    closed: bool,
}

impl PacketBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            capacity,
        }
    }

    /// Enqueue a packet. Returns false when the buffer is closed. On
    /// overflow the oldest packet is dropped and the drop counter bumped.
    pub fn push(&self, packet: Bytes) -> bool {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed {
                return false;
            }
            if inner.queue.len() >= self.capacity {
                inner.queue.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            inner.queue.push_back(packet);
        }
        self.notify.notify_one();
        true
    }

    /// Await the next packet. Returns `None` once the buffer is closed
    /// and drained.
    pub async fn pop(&self) -> Option<Bytes> {
        loop {
            // Arm the waiter before checking so a push between the check
            // and the await cannot be lost.
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock().unwrap();
                if let Some(packet) = inner.queue.pop_front() {
                    // Pass the baton: another consumer may be waiting for
                    // a packet that is already queued.
                    if !inner.queue.is_empty() {
                        self.notify.notify_one();
                    }
                    return Some(packet);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Non-blocking variant used by drain loops at shutdown.
    pub fn try_pop(&self) -> Option<Bytes> {
        self.inner.lock().unwrap().queue.pop_front()
    }

    /// Close the buffer and wake every waiting consumer.
    pub fn close(&self) {
        self.inner.lock().unwrap().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Packets lost to overflow since startup.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn push_pop_in_order() {
        let buffer = PacketBuffer::new(4);
        assert!(buffer.push(Bytes::from_static(b"a")));
        assert!(buffer.push(Bytes::from_static(b"b")));
        assert_eq!(buffer.pop().await.unwrap(), Bytes::from_static(b"a"));
        assert_eq!(buffer.pop().await.unwrap(), Bytes::from_static(b"b"));
    }

    #[tokio::test]
    async fn overflow_drops_oldest() {
        let buffer = PacketBuffer::new(2);
        buffer.push(Bytes::from_static(b"a"));
        buffer.push(Bytes::from_static(b"b"));
        buffer.push(Bytes::from_static(b"c"));
        assert_eq!(buffer.dropped(), 1);
        assert_eq!(buffer.pop().await.unwrap(), Bytes::from_static(b"b"));
    }

    #[tokio::test]
    async fn close_wakes_waiting_consumers() {
        let buffer = Arc::new(PacketBuffer::new(2));
        let waiter = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        buffer.close();
        let got = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("consumer must wake on close")
            .unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn closed_buffer_drains_remaining_packets() {
        let buffer = PacketBuffer::new(4);
        buffer.push(Bytes::from_static(b"a"));
        buffer.close();
        assert!(!buffer.push(Bytes::from_static(b"b")));
        assert_eq!(buffer.pop().await.unwrap(), Bytes::from_static(b"a"));
        assert!(buffer.pop().await.is_none());
    }

    #[tokio::test]
    async fn many_producers_many_consumers() {
        let buffer = Arc::new(PacketBuffer::new(1024));
        let mut producers = Vec::new();
        for p in 0..4u8 {
            let buffer = buffer.clone();
            producers.push(tokio::spawn(async move {
                for _ in 0..100 {
                    buffer.push(Bytes::from(vec![p]));
                }
            }));
        }
        let mut consumers = Vec::new();
        for _ in 0..4 {
            let buffer = buffer.clone();
            consumers.push(tokio::spawn(async move {
                let mut seen = 0usize;
                while buffer.pop().await.is_some() {
                    seen += 1;
                }
                seen
            }));
        }
        for producer in producers {
            producer.await.unwrap();
        }
        buffer.close();
        let mut total = 0;
        for consumer in consumers {
            total += consumer.await.unwrap();
        }
        assert_eq!(total, 400);
    }
}
