//! Fixed ring of sample chunks shared by the data-ready handler and the
//! recording writer.
//!
//! The producer fills one chunk at a time. When a chunk is full it is sealed
//! with a sequence number and the producer moves on to the next one. The
//! writer drains sealed chunks oldest first and releases them. Every slot and
//! flag is an atomic, so a lapping producer can at worst tear a chunk's
//! contents, which is counted, never cause undefined behaviour.
//!
//! There must be exactly one producer and one consumer at a time.

use std::sync::atomic::{AtomicI32, AtomicU64, AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;
use node_types::{OverrunPolicy, NUM_BUFFERS, REC_ADC_CHUNK};

/// Chunk state value meaning "free for the producer".
const FREE: u64 = 0;

struct Chunk {
    samples: [AtomicI32; REC_ADC_CHUNK],
    /// `FREE`, or the sequence number the chunk was sealed with.
    sealed: AtomicU64,
}

impl Chunk {
    fn new() -> Self {
        Self {
            samples: std::array::from_fn(|_| AtomicI32::new(0)),
            sealed: AtomicU64::new(FREE),
        }
    }
}

/// Result of pushing one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Stored,
    /// The sample completed a chunk, which is now ready for the writer.
    Sealed,
    /// The next chunk was still undrained and the policy refused to reuse it.
    Dropped,
}

/// A sealed chunk handed to the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyChunk {
    pub index: usize,
    pub seq: u64,
}

/// Counter snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingStats {
    pub samples_stored: u64,
    pub chunks_sealed: u64,
    /// Samples thrown away under [`OverrunPolicy::Refuse`].
    pub samples_dropped: u64,
    /// Undrained chunks reused under [`OverrunPolicy::Overwrite`].
    pub chunks_overwritten: u64,
}

pub struct ChunkRing {
    chunks: [Chunk; NUM_BUFFERS],
    policy: OverrunPolicy,
    // Producer-owned cursor.
    write_chunk: CachePadded<AtomicUsize>,
    write_index: CachePadded<AtomicUsize>,
    samples_stored: AtomicU64,
    chunks_sealed: CachePadded<AtomicU64>,
    samples_dropped: AtomicU64,
    chunks_overwritten: AtomicU64,
}

impl ChunkRing {
    pub fn new(policy: OverrunPolicy) -> Self {
        Self {
            chunks: std::array::from_fn(|_| Chunk::new()),
            policy,
            write_chunk: CachePadded::new(AtomicUsize::new(0)),
            write_index: CachePadded::new(AtomicUsize::new(0)),
            samples_stored: AtomicU64::new(0),
            chunks_sealed: CachePadded::new(AtomicU64::new(0)),
            samples_dropped: AtomicU64::new(0),
            chunks_overwritten: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> OverrunPolicy {
        self.policy
    }

    /// Appends one sample. Producer side only.
    pub fn push(&self, value: i32) -> PushOutcome {
        let current = self.write_chunk.load(Ordering::Relaxed);
        let index = self.write_index.load(Ordering::Relaxed);
        let chunk = &self.chunks[current];

        if index == 0 && chunk.sealed.load(Ordering::Acquire) != FREE {
            match self.policy {
                OverrunPolicy::Refuse => {
                    self.samples_dropped.fetch_add(1, Ordering::Relaxed);
                    return PushOutcome::Dropped;
                }
                OverrunPolicy::Overwrite => {
                    chunk.sealed.store(FREE, Ordering::Release);
                    self.chunks_overwritten.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        chunk.samples[index].store(value, Ordering::Relaxed);
        self.samples_stored.fetch_add(1, Ordering::Relaxed);

        if index + 1 < REC_ADC_CHUNK {
            self.write_index.store(index + 1, Ordering::Release);
            return PushOutcome::Stored;
        }

        let seq = self.chunks_sealed.load(Ordering::Relaxed) + 1;
        chunk.sealed.store(seq, Ordering::Release);
        self.chunks_sealed.store(seq, Ordering::Release);
        self.write_chunk
            .store((current + 1) % NUM_BUFFERS, Ordering::Relaxed);
        self.write_index.store(0, Ordering::Release);
        PushOutcome::Sealed
    }

    /// The oldest sealed chunk, if any. Consumer side only.
    pub fn peek_ready(&self) -> Option<ReadyChunk> {
        self.chunks
            .iter()
            .enumerate()
            .filter_map(|(index, chunk)| match chunk.sealed.load(Ordering::Acquire) {
                FREE => None,
                seq => Some(ReadyChunk { index, seq }),
            })
            .min_by_key(|ready| ready.seq)
    }

    /// Copies the samples of a ready chunk into `out`.
    pub fn read_chunk(&self, ready: ReadyChunk, out: &mut [i32; REC_ADC_CHUNK]) {
        for (slot, value) in self.chunks[ready.index].samples.iter().zip(out.iter_mut()) {
            *value = slot.load(Ordering::Relaxed);
        }
    }

    /// Hands a drained chunk back to the producer. Returns false if the
    /// producer reused the chunk while it was being read, in which case the
    /// data read from it may be torn.
    pub fn release(&self, ready: ReadyChunk) -> bool {
        self.chunks[ready.index]
            .sealed
            .compare_exchange(ready.seq, FREE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Copies the samples of the chunk currently being filled. Only
    /// meaningful while the producer is stopped.
    pub fn read_partial(&self, out: &mut Vec<i32>) {
        let current = self.write_chunk.load(Ordering::Acquire);
        let len = self.write_index.load(Ordering::Acquire);
        out.clear();
        out.extend(
            self.chunks[current].samples[..len]
                .iter()
                .map(|slot| slot.load(Ordering::Relaxed)),
        );
    }

    /// Number of chunks sealed since the last reset. Sequence numbers of
    /// sealed chunks run from 1 to this value.
    pub fn sealed_count(&self) -> u64 {
        self.chunks_sealed.load(Ordering::Acquire)
    }

    /// Returns the ring to its empty state and zeroes the counters. Neither
    /// side may be running.
    pub fn reset(&self) {
        for chunk in &self.chunks {
            chunk.sealed.store(FREE, Ordering::Relaxed);
        }
        self.write_chunk.store(0, Ordering::Relaxed);
        self.write_index.store(0, Ordering::Relaxed);
        self.samples_stored.store(0, Ordering::Relaxed);
        self.chunks_sealed.store(0, Ordering::Relaxed);
        self.samples_dropped.store(0, Ordering::Relaxed);
        self.chunks_overwritten.store(0, Ordering::Release);
    }

    pub fn stats(&self) -> RingStats {
        RingStats {
            samples_stored: self.samples_stored.load(Ordering::Relaxed),
            chunks_sealed: self.chunks_sealed.load(Ordering::Relaxed),
            samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
            chunks_overwritten: self.chunks_overwritten.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for ChunkRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkRing")
            .field("policy", &self.policy)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
