//! Capture queue: driver thread → async consumer
//!
//! A fixed-capacity SPSC ring buffer. The driver callback is the only
//! producer and never blocks: when the ring is full the new chunk is dropped
//! and counted as an overrun. The async side is the only consumer and waits
//! on a [`Notify`] so it never spins.
//!
//! # Example
//!
//! ```
//! use parlance_lib::audio::capture_queue::CaptureQueue;
//! use parlance_lib::audio::{AudioChunk, PortCounters};
//! use std::sync::Arc;
//! use std::time::Instant;
//!
//! let counters = Arc::new(PortCounters::new());
//! let (mut producer, mut consumer) = CaptureQueue::new(100, counters);
//!
//! producer.push(AudioChunk::new(vec![0u8; 64], 16000, 1, Instant::now()));
//! assert!(consumer.try_pop().is_some());
//! ```

use crate::audio::chunk::AudioChunk;
use crate::audio::error::{AudioError, AudioResult};
use crate::audio::port::PortCounters;
use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Constructor for a capture queue pair
pub struct CaptureQueue;

/// Producer half, owned by the driver callback
pub struct CaptureProducer {
    producer: HeapProd<AudioChunk>,
    notify: Arc<Notify>,
    counters: Arc<PortCounters>,
}

/// Consumer half, owned by the async side of the port
pub struct CaptureConsumer {
    consumer: HeapCons<AudioChunk>,
    notify: Arc<Notify>,
    counters: Arc<PortCounters>,
}

impl CaptureQueue {
    /// Create a queue holding at most `capacity` chunks
    ///
    /// Both halves report into `counters`.
    pub fn new(capacity: usize, counters: Arc<PortCounters>) -> (CaptureProducer, CaptureConsumer) {
        let rb = HeapRb::<AudioChunk>::new(capacity.max(1));
        let (producer, consumer) = rb.split();
        let notify = Arc::new(Notify::new());

        (
            CaptureProducer {
                producer,
                notify: Arc::clone(&notify),
                counters: Arc::clone(&counters),
            },
            CaptureConsumer {
                consumer,
                notify,
                counters,
            },
        )
    }
}

impl CaptureProducer {
    /// Enqueue a chunk without blocking
    ///
    /// Returns `false` and counts an overrun when the queue is full; the
    /// chunk is dropped in that case.
    pub fn push(&mut self, chunk: AudioChunk) -> bool {
        let bytes = chunk.len();
        self.counters.record_chunk(bytes);

        match self.producer.try_push(chunk) {
            Ok(()) => {
                self.counters.increment_depth();
                self.notify.notify_one();
                true
            }
            Err(_dropped) => {
                self.counters.record_drop();
                false
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.producer.capacity().get()
    }

    pub fn is_full(&self) -> bool {
        self.producer.is_full()
    }
}

impl CaptureConsumer {
    /// Take the oldest chunk if one is ready
    pub fn try_pop(&mut self) -> Option<AudioChunk> {
        let chunk = self.consumer.try_pop()?;
        self.counters.decrement_depth();
        Some(chunk)
    }

    /// Wait up to `timeout` for the next chunk
    ///
    /// # Errors
    /// Returns `AudioError::ReadTimeout` if nothing arrives in time.
    pub async fn pop(&mut self, timeout: Duration) -> AudioResult<AudioChunk> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if let Some(chunk) = self.try_pop() {
                return Ok(chunk);
            }

            // Notify keeps a permit if the producer fired between the check
            // above and this wait, so a wakeup is never lost.
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return self
                    .try_pop()
                    .ok_or(AudioError::ReadTimeout(timeout.as_millis() as u64));
            }
        }
    }

    /// Discard everything currently queued
    pub fn clear(&mut self) -> usize {
        let mut cleared = 0;
        while self.try_pop().is_some() {
            cleared += 1;
        }
        cleared
    }

    pub fn len(&self) -> usize {
        self.consumer.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.consumer.capacity().get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn chunk(tag: u8) -> AudioChunk {
        AudioChunk::new(vec![tag; 32], 16000, 1, Instant::now())
    }

    #[test]
    fn test_fifo_order() {
        let counters = Arc::new(PortCounters::new());
        let (mut producer, mut consumer) = CaptureQueue::new(8, Arc::clone(&counters));

        for tag in 0..5 {
            assert!(producer.push(chunk(tag)));
        }
        assert_eq!(consumer.len(), 5);
        assert_eq!(counters.queue_depth(), 5);

        for tag in 0..5 {
            assert_eq!(consumer.try_pop().unwrap().data()[0], tag);
        }
        assert!(consumer.try_pop().is_none());
        assert_eq!(counters.queue_depth(), 0);
    }

    #[test]
    fn test_overrun_drops_new_chunks() {
        let counters = Arc::new(PortCounters::new());
        let (mut producer, mut consumer) = CaptureQueue::new(10, Arc::clone(&counters));

        let pushed = 25;
        for tag in 0..pushed {
            producer.push(chunk(tag));
        }

        assert_eq!(counters.dropped(), (pushed - 10) as u64);
        assert_eq!(consumer.len(), 10);
        assert_eq!(counters.chunks(), pushed as u64);

        // The oldest ten survived
        assert_eq!(consumer.try_pop().unwrap().data()[0], 0);
        assert_eq!(consumer.clear(), 9);
    }

    #[tokio::test]
    async fn test_pop_times_out() {
        let counters = Arc::new(PortCounters::new());
        let (_producer, mut consumer) = CaptureQueue::new(4, counters);

        let started = Instant::now();
        let result = consumer.pop(Duration::from_millis(50)).await;
        assert!(matches!(result, Err(AudioError::ReadTimeout(50))));
        assert!(started.elapsed() >= Duration::from_millis(45));
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push_from_thread() {
        let counters = Arc::new(PortCounters::new());
        let (mut producer, mut consumer) = CaptureQueue::new(4, counters);

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            producer.push(chunk(7));
        });

        let received = consumer.pop(Duration::from_secs(2)).await.unwrap();
        assert_eq!(received.data()[0], 7);
        handle.join().unwrap();
    }
}
