//! Playback queue: async producers → driver thread
//!
//! Built on a bounded `crossbeam-channel`, so any number of writers can feed
//! it and the reader can sit on a thread the async runtime knows nothing
//! about. The reader side ([`PlaybackFeeder`]) always fills the whole buffer
//! the driver asks for, padding with silence when the queue runs dry.

use crate::audio::format::BYTES_PER_SAMPLE;
use crate::audio::port::PortCounters;
use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};
use std::sync::Arc;

/// Constructor for a playback queue pair
pub struct PlaybackQueue;

/// Cloneable writer half
#[derive(Clone)]
pub struct PlaybackWriter {
    sender: Sender<Vec<u8>>,
    counters: Arc<PortCounters>,
}

/// Reader half, owned by the driver callback
pub struct PlaybackFeeder {
    receiver: Receiver<Vec<u8>>,
    counters: Arc<PortCounters>,
    /// Chunk currently being played out
    current: Vec<u8>,
    /// Read offset into `current`, in bytes
    offset: usize,
}

impl PlaybackQueue {
    /// Create a queue holding at most `capacity` buffers
    pub fn new(capacity: usize, counters: Arc<PortCounters>) -> (PlaybackWriter, PlaybackFeeder) {
        let (sender, receiver) = crossbeam_channel::bounded(capacity.max(1));
        (
            PlaybackWriter {
                sender,
                counters: Arc::clone(&counters),
            },
            PlaybackFeeder {
                receiver,
                counters,
                current: Vec::new(),
                offset: 0,
            },
        )
    }
}

/// Why a non-blocking write did not go through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteRejected {
    Full,
    Closed,
}

impl PlaybackWriter {
    /// Enqueue without blocking; usable from any thread
    ///
    /// On rejection the data is handed back so the caller can retry.
    pub fn try_write(&self, data: Vec<u8>) -> Result<(), (WriteRejected, Vec<u8>)> {
        match self.sender.try_send(data) {
            Ok(()) => {
                self.counters.increment_depth();
                Ok(())
            }
            Err(TrySendError::Full(data)) => Err((WriteRejected::Full, data)),
            Err(TrySendError::Disconnected(data)) => Err((WriteRejected::Closed, data)),
        }
    }

    /// Buffers waiting to be played
    pub fn len(&self) -> usize {
        self.sender.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sender.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.sender.is_full()
    }

    pub fn capacity(&self) -> usize {
        self.sender.capacity().unwrap_or(0)
    }
}

impl PlaybackFeeder {
    /// Fill `out` completely from the queue
    ///
    /// Counts each fully drained chunk as played. If the queue runs out
    /// before `out` is full the rest is zeroed and one underrun is counted.
    /// Never blocks and never panics.
    pub fn fill(&mut self, out: &mut [i16]) {
        let mut written = 0;

        while written < out.len() {
            if self.offset + BYTES_PER_SAMPLE > self.current.len() {
                match self.receiver.try_recv() {
                    Ok(next) => {
                        self.counters.decrement_depth();
                        self.current = next;
                        self.offset = 0;
                        continue;
                    }
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {
                        out[written..].fill(0);
                        self.counters.record_drop();
                        return;
                    }
                }
            }

            let available = (self.current.len() - self.offset) / BYTES_PER_SAMPLE;
            let take = available.min(out.len() - written);
            for (slot, pair) in out[written..written + take]
                .iter_mut()
                .zip(self.current[self.offset..].chunks_exact(BYTES_PER_SAMPLE))
            {
                *slot = i16::from_le_bytes([pair[0], pair[1]]);
            }
            written += take;
            self.offset += take * BYTES_PER_SAMPLE;

            if self.offset + BYTES_PER_SAMPLE > self.current.len() {
                // An odd trailing byte cannot form a sample and is dropped.
                self.counters.record_chunk(self.current.len());
                self.current.clear();
                self.offset = 0;
            }
        }
    }

    /// Produce one buffer of `bytes` bytes, as the driver would request it
    pub fn next_buffer(&mut self, bytes: usize) -> Vec<u8> {
        let mut samples = vec![0i16; bytes / BYTES_PER_SAMPLE];
        self.fill(&mut samples);
        let mut buffer = Vec::with_capacity(bytes);
        for sample in samples {
            buffer.extend_from_slice(&sample.to_le_bytes());
        }
        buffer
    }

    /// Drop everything queued, including a partially played chunk
    pub fn clear(&mut self) -> usize {
        let mut cleared = 0;
        while self.receiver.try_recv().is_ok() {
            self.counters.decrement_depth();
            cleared += 1;
        }
        self.current.clear();
        self.offset = 0;
        cleared
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}
