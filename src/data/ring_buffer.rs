//! Lock-free single-channel sample ring buffer.
//!
//! This module implements the buffer that sits between the acquisition producer and the
//! processing consumers. It is designed for one writer and one reader per read cursor,
//! with several read cursors allowed so that independent processing stages can drain the
//! same samples at their own pace.
//!
//! # Features
//! - Lock-free push and pop using atomic cursors
//! - Zero-copy reads when the requested run does not wrap
//! - 64-byte aligned sample storage
//! - Overflow policy: drop the newest sample (default) or overwrite the oldest
//! - Data loss reported through counters only, never through control flow
//!
//! # Memory Layout
//! ```text
//! write cursor           (own cache line)
//! read cursor[0..n]      (one cache line each)
//! storage                (capacity x 8 bytes, 64-byte aligned)
//! ```
//!
//! Cursors are monotonically increasing `u64` counters that are never reset. Storage is
//! indexed with `cursor & (capacity - 1)`, which is why the capacity must be a power of two.
//!
//! # Ordering
//! The producer stores a sample, then release-stores the write cursor. A consumer
//! acquire-loads the write cursor before loading samples, and release-stores its read
//! cursor once it is finished with them. The producer acquire-loads read cursors before
//! reusing slots.

use std::alloc::{self, Layout};
use std::borrow::Cow;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam_utils::CachePadded;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Alignment of the sample storage in bytes (one cache line, wide enough for AVX-512).
pub const STORAGE_ALIGNMENT: usize = 64;

/// What the producer does when a push finds the buffer full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Reject the incoming sample and count an overflow.
    #[default]
    DropNewest,
    /// Evict the oldest unread sample, store the incoming one and count an overflow.
    OverwriteOldest,
}

/// Errors raised while constructing sample buffers.
///
/// These only occur at session setup. Once a buffer exists, no operation on it fails.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BufferError {
    /// Capacity is zero or not a power of two.
    #[error("Ring buffer capacity must be a non-zero power of two, got {0}")]
    InvalidCapacity(usize),

    /// At least one read cursor is required.
    #[error("Ring buffer needs at least one consumer")]
    NoConsumers,

    /// A multi-channel buffer needs at least one channel.
    #[error("Buffer needs at least one channel")]
    NoChannels,

    /// Sample rate must be finite and positive.
    #[error("Invalid sample rate: {0} Hz")]
    InvalidSampleRate(f64),

    /// The aligned allocation could not be satisfied.
    #[error("Failed to allocate {bytes} bytes of sample storage")]
    AllocationFailed {
        /// Requested allocation size
        bytes: usize,
    },
}

/// Per-consumer cursor state.
#[derive(Debug, Default)]
struct ReadCursor {
    /// Next sample position this consumer will read
    position: AtomicU64,
    /// Set while a `BlockView` from this cursor is alive
    leased: AtomicBool,
    /// Samples handed out to this consumer
    samples_read: AtomicU64,
    /// Pop attempts that found nothing to read
    underflows: AtomicU64,
}

/// Single-channel, fixed-capacity, lock-free sample ring.
///
/// # Safety
/// The buffer owns a raw aligned allocation. It is safe to share between threads as long as:
/// - Only one thread pushes at a time
/// - For each read cursor, only one thread pops at a time
///
/// Both rules are upheld by the acquisition pipeline, which has exactly one producer
/// thread and gives every consumer stage its own cursor.
#[derive(Debug)]
pub struct ChannelRingBuffer {
    /// Sample storage, `capacity` slots holding `f64` bit patterns
    /// SAFETY: valid for `capacity` elements until `Drop`
    storage: NonNull<AtomicU64>,
    capacity: usize,
    mask: u64,
    policy: OverflowPolicy,
    write_cursor: CachePadded<AtomicU64>,
    readers: Box<[CachePadded<ReadCursor>]>,
    overflows: AtomicU64,
    samples_written: AtomicU64,
}

// SAFETY: the storage pointer is owned by this buffer and every slot is an atomic, so the
// buffer can move between threads.
unsafe impl Send for ChannelRingBuffer {}

// SAFETY: all shared state is atomic. Slots are only read without atomics while the
// cursor protocol guarantees the producer cannot write them.
unsafe impl Sync for ChannelRingBuffer {}

impl ChannelRingBuffer {
    /// Create a buffer with a single consumer and the default drop-newest policy.
    pub fn new(capacity: usize) -> Result<Self, BufferError> {
        Self::with_consumers(capacity, OverflowPolicy::default(), 1)
    }

    /// Create a buffer with `consumers` independent read cursors.
    ///
    /// # Arguments
    /// * `capacity` - Number of sample slots, must be a power of two
    /// * `policy` - Behaviour when the slowest consumer is a full buffer behind
    /// * `consumers` - Number of read cursors (processing stages)
    pub fn with_consumers(
        capacity: usize,
        policy: OverflowPolicy,
        consumers: usize,
    ) -> Result<Self, BufferError> {
        if capacity == 0 || !capacity.is_power_of_two() {
            return Err(BufferError::InvalidCapacity(capacity));
        }
        if consumers == 0 {
            return Err(BufferError::NoConsumers);
        }

        let layout = Self::storage_layout(capacity)?;
        // SAFETY: layout has non-zero size. Zeroed memory is a valid `AtomicU64` (0.0 as f64).
        let raw = unsafe { alloc::alloc_zeroed(layout) } as *mut AtomicU64;
        let storage = NonNull::new(raw).ok_or(BufferError::AllocationFailed {
            bytes: layout.size(),
        })?;

        let readers = (0..consumers)
            .map(|_| CachePadded::new(ReadCursor::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Self {
            storage,
            capacity,
            mask: capacity as u64 - 1,
            policy,
            write_cursor: CachePadded::new(AtomicU64::new(0)),
            readers,
            overflows: AtomicU64::new(0),
            samples_written: AtomicU64::new(0),
        })
    }

    fn storage_layout(capacity: usize) -> Result<Layout, BufferError> {
        let bytes = capacity
            .checked_mul(std::mem::size_of::<AtomicU64>())
            .ok_or(BufferError::InvalidCapacity(capacity))?;
        Layout::from_size_align(bytes, STORAGE_ALIGNMENT)
            .map_err(|_| BufferError::AllocationFailed { bytes })
    }

    #[inline]
    fn slot(&self, position: u64) -> &AtomicU64 {
        // SAFETY: the mask keeps the index below `capacity`, and storage lives as long as self
        unsafe { &*self.storage.as_ptr().add((position & self.mask) as usize) }
    }

    #[inline]
    fn slowest_reader(&self) -> u64 {
        self.readers
            .iter()
            .map(|r| r.position.load(Ordering::Acquire))
            .min()
            .unwrap_or(0)
    }

    /// Push one sample. Never blocks and never fails.
    ///
    /// Returns `false` when the buffer was full. Under [`OverflowPolicy::DropNewest`] the
    /// sample is discarded; under [`OverflowPolicy::OverwriteOldest`] it is stored after
    /// evicting the oldest unread sample. Either way the overflow counter is incremented.
    #[inline]
    pub fn push(&self, sample: f64) -> bool {
        // Only the producer writes this cursor
        let write = self.write_cursor.load(Ordering::Relaxed);
        let mut accepted = true;

        if write - self.slowest_reader() >= self.capacity as u64 {
            self.overflows.fetch_add(1, Ordering::Relaxed);
            match self.policy {
                OverflowPolicy::DropNewest => return false,
                OverflowPolicy::OverwriteOldest => {
                    self.evict_oldest(write);
                    accepted = false;
                }
            }
        }

        self.slot(write).store(sample.to_bits(), Ordering::Relaxed);
        self.write_cursor.store(write + 1, Ordering::Release);
        self.samples_written.fetch_add(1, Ordering::Relaxed);
        accepted
    }

    /// Advance every cursor that is a full buffer behind `write` by one sample.
    fn evict_oldest(&self, write: u64) {
        for reader in self.readers.iter() {
            loop {
                let position = reader.position.load(Ordering::Acquire);
                if write - position < self.capacity as u64 {
                    break;
                }
                if reader
                    .position
                    .compare_exchange_weak(
                        position,
                        position + 1,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    break;
                }
            }
        }
    }

    /// Whether the next push would be stored without an overflow.
    #[inline]
    pub fn has_room(&self) -> bool {
        self.free_slots() > 0
    }

    /// Slots the producer can fill before the slowest consumer blocks it.
    #[inline]
    pub fn free_slots(&self) -> usize {
        let used = self.write_cursor.load(Ordering::Relaxed) - self.slowest_reader();
        (self.capacity as u64).saturating_sub(used) as usize
    }

    /// Count an overflow for a sample the caller chose not to push.
    #[inline]
    pub(crate) fn record_overflow(&self) {
        self.overflows.fetch_add(1, Ordering::Relaxed);
    }

    /// Pop up to `max_count` samples for consumer 0.
    pub fn pop_block(&self, max_count: usize) -> Option<BlockView<'_>> {
        self.pop_block_for(0, max_count)
    }

    /// Pop up to `max_count` samples for the given consumer.
    ///
    /// Returns `None` when nothing is available, when `consumer` is out of range, or when
    /// a previous view from the same cursor is still alive. The returned view borrows the
    /// storage directly when the run does not wrap (drop-newest policy only) and holds
    /// those slots until it is dropped; otherwise it owns a copy.
    pub fn pop_block_for(&self, consumer: usize, max_count: usize) -> Option<BlockView<'_>> {
        let reader = self.readers.get(consumer)?;
        if max_count == 0 {
            return None;
        }
        if reader.leased.swap(true, Ordering::Acquire) {
            return None;
        }

        match self.policy {
            OverflowPolicy::DropNewest => {
                // Only this consumer writes its cursor
                let start = reader.position.load(Ordering::Relaxed);
                let write = self.write_cursor.load(Ordering::Acquire);
                let count = (write - start).min(max_count as u64) as usize;
                if count == 0 {
                    reader.underflows.fetch_add(1, Ordering::Relaxed);
                    reader.leased.store(false, Ordering::Release);
                    return None;
                }

                let offset = (start & self.mask) as usize;
                let data = if offset + count <= self.capacity {
                    // SAFETY: slots [start, start + count) were published before the acquire
                    // load above, and the producer cannot reuse them until this view
                    // releases the cursor. AtomicU64 and f64 share size and alignment.
                    Cow::Borrowed(unsafe {
                        std::slice::from_raw_parts(
                            self.storage.as_ptr().add(offset) as *const f64,
                            count,
                        )
                    })
                } else {
                    Cow::Owned(self.copy_range(start, count))
                };

                Some(BlockView {
                    data,
                    start,
                    reader,
                    commit: Some(start + count as u64),
                })
            }
            OverflowPolicy::OverwriteOldest => loop {
                let start = reader.position.load(Ordering::Acquire);
                let write = self.write_cursor.load(Ordering::Acquire);
                let count = (write - start).min(max_count as u64) as usize;
                if count == 0 {
                    reader.underflows.fetch_add(1, Ordering::Relaxed);
                    reader.leased.store(false, Ordering::Release);
                    return None;
                }

                let data = self.copy_range(start, count);
                // The producer moves the cursor before overwriting a slot, so a successful
                // exchange proves none of the copied slots were rewritten.
                if reader
                    .position
                    .compare_exchange(
                        start,
                        start + count as u64,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    return Some(BlockView {
                        data: Cow::Owned(data),
                        start,
                        reader,
                        commit: None,
                    });
                }
            },
        }
    }

    fn copy_range(&self, start: u64, count: usize) -> Vec<f64> {
        (0..count as u64)
            .map(|i| f64::from_bits(self.slot(start + i).load(Ordering::Relaxed)))
            .collect()
    }

    /// Move a consumer's cursor forward to `target`, discarding the samples in between.
    ///
    /// The target is clamped to the write cursor. Returns the number of samples skipped,
    /// which is zero if the cursor is already at or past `target` or a view is alive.
    pub fn skip_to(&self, consumer: usize, target: u64) -> u64 {
        let Some(reader) = self.readers.get(consumer) else {
            return 0;
        };
        if reader.leased.load(Ordering::Acquire) {
            return 0;
        }
        loop {
            let position = reader.position.load(Ordering::Acquire);
            let target = target.min(self.write_cursor.load(Ordering::Acquire));
            if position >= target {
                return 0;
            }
            if reader
                .position
                .compare_exchange(position, target, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return target - position;
            }
        }
    }

    /// Unread samples for consumer 0.
    pub fn available(&self) -> usize {
        self.available_for(0)
    }

    /// Unread samples for the given consumer (0 if out of range).
    pub fn available_for(&self, consumer: usize) -> usize {
        self.readers
            .get(consumer)
            .map(|reader| {
                let position = reader.position.load(Ordering::Acquire);
                let write = self.write_cursor.load(Ordering::Acquire);
                write.saturating_sub(position).min(self.capacity as u64) as usize
            })
            .unwrap_or(0)
    }

    /// Number of sample slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Configured overflow policy.
    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Number of independent read cursors.
    pub fn consumer_count(&self) -> usize {
        self.readers.len()
    }

    /// Total pushes that found the buffer full.
    pub fn overflow_count(&self) -> u64 {
        self.overflows.load(Ordering::Relaxed)
    }

    /// Total pop attempts (all consumers) that found nothing to read.
    pub fn underflow_count(&self) -> u64 {
        self.readers
            .iter()
            .map(|r| r.underflows.load(Ordering::Relaxed))
            .sum()
    }

    /// Samples stored by the producer (including those later evicted).
    pub fn samples_written(&self) -> u64 {
        self.samples_written.load(Ordering::Relaxed)
    }

    /// Samples handed out to all consumers.
    pub fn samples_read(&self) -> u64 {
        self.readers
            .iter()
            .map(|r| r.samples_read.load(Ordering::Relaxed))
            .sum()
    }

    /// Current write cursor (total samples stored).
    pub fn write_position(&self) -> u64 {
        self.write_cursor.load(Ordering::Acquire)
    }

    /// Current read cursor of a consumer.
    pub fn read_position(&self, consumer: usize) -> Option<u64> {
        self.readers
            .get(consumer)
            .map(|r| r.position.load(Ordering::Acquire))
    }

    /// Fill level relative to the slowest consumer, in `0.0..=1.0`.
    pub fn fill_ratio(&self) -> f64 {
        let used = self
            .write_position()
            .saturating_sub(self.slowest_reader())
            .min(self.capacity as u64);
        used as f64 / self.capacity as f64
    }

    /// Address of the first storage slot (alignment diagnostics).
    pub fn storage_address(&self) -> usize {
        self.storage.as_ptr() as usize
    }
}

impl Drop for ChannelRingBuffer {
    fn drop(&mut self) {
        if let Ok(layout) = Self::storage_layout(self.capacity) {
            // SAFETY: allocated in `with_consumers` with this exact layout
            unsafe { alloc::dealloc(self.storage.as_ptr() as *mut u8, layout) };
        }
    }
}

/// A read-only run of samples taken from one consumer cursor.
///
/// Dropping the view hands its slots back to the producer. Until then the cursor is
/// leased and further pops for the same consumer return `None`.
#[derive(Debug)]
pub struct BlockView<'a> {
    data: Cow<'a, [f64]>,
    start: u64,
    reader: &'a ReadCursor,
    /// Cursor value to publish on drop (drop-newest policy)
    commit: Option<u64>,
}

impl BlockView<'_> {
    /// Sequence position of the first sample in this view.
    pub fn start_position(&self) -> u64 {
        self.start
    }

    /// `true` when the view reads the ring storage directly (no copy was made).
    pub fn is_zero_copy(&self) -> bool {
        matches!(self.data, Cow::Borrowed(_))
    }

    /// Release the lease without consuming the samples.
    ///
    /// Under the overwrite-oldest policy the cursor has already moved, so only the
    /// drop-newest policy actually returns the samples to the cursor.
    pub(crate) fn abandon(mut self) {
        self.commit = None;
        self.data = Cow::Borrowed(&[]);
    }
}

impl Deref for BlockView<'_> {
    type Target = [f64];

    fn deref(&self) -> &[f64] {
        &self.data
    }
}

impl Drop for BlockView<'_> {
    fn drop(&mut self) {
        if let Some(end) = self.commit.take() {
            self.reader.position.store(end, Ordering::Release);
        }
        self.reader
            .samples_read
            .fetch_add(self.data.len() as u64, Ordering::Relaxed);
        self.reader.leased.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_cursors_do_not_share_cache_lines() {
        let buffer = ChannelRingBuffer::with_consumers(8, OverflowPolicy::DropNewest, 3).unwrap();
        let write = &*buffer.write_cursor as *const AtomicU64 as usize;
        let mut addresses: Vec<usize> = buffer
            .readers
            .iter()
            .map(|r| &**r as *const ReadCursor as usize)
            .collect();
        addresses.push(write);
        addresses.sort_unstable();
        for pair in addresses.windows(2) {
            assert!(pair[1] - pair[0] >= 64);
        }
    }

    #[test]
    fn test_rejects_invalid_capacity() {
        assert_eq!(
            ChannelRingBuffer::new(0).unwrap_err(),
            BufferError::InvalidCapacity(0)
        );
        assert_eq!(
            ChannelRingBuffer::new(100).unwrap_err(),
            BufferError::InvalidCapacity(100)
        );
        assert_eq!(
            ChannelRingBuffer::with_consumers(64, OverflowPolicy::DropNewest, 0).unwrap_err(),
            BufferError::NoConsumers
        );
    }

    #[test]
    fn test_storage_is_aligned() {
        let rb = ChannelRingBuffer::new(16).unwrap();
        assert_eq!(rb.storage_address() % STORAGE_ALIGNMENT, 0);
        assert_eq!(rb.capacity(), 16);
    }

    #[test]
    fn test_push_and_pop_in_order() {
        let rb = ChannelRingBuffer::new(8).unwrap();
        for i in 0..5 {
            assert!(rb.push(i as f64));
        }
        assert_eq!(rb.available(), 5);

        let view = rb.pop_block(3).unwrap();
        assert_eq!(&*view, &[0.0, 1.0, 2.0]);
        assert_eq!(view.start_position(), 0);
        drop(view);

        let view = rb.pop_block(10).unwrap();
        assert_eq!(&*view, &[3.0, 4.0]);
        assert_eq!(view.start_position(), 3);
        drop(view);

        assert_eq!(rb.available(), 0);
        assert!(rb.pop_block(1).is_none());
        assert_eq!(rb.underflow_count(), 1);
        assert_eq!(rb.samples_read(), 5);
    }

    #[test]
    fn test_zero_copy_unless_wrapping() {
        let rb = ChannelRingBuffer::new(8).unwrap();
        for i in 0..6 {
            rb.push(i as f64);
        }
        let view = rb.pop_block(6).unwrap();
        assert!(view.is_zero_copy());
        drop(view);

        // Cursor at 6, next run of 4 wraps around slot 7 -> 0
        for i in 6..10 {
            rb.push(i as f64);
        }
        let view = rb.pop_block(4).unwrap();
        assert!(!view.is_zero_copy());
        assert_eq!(&*view, &[6.0, 7.0, 8.0, 9.0]);
    }

    #[test]
    fn test_drop_newest_counts_overflow() {
        let rb = ChannelRingBuffer::new(4).unwrap();
        for i in 0..7 {
            let accepted = rb.push(i as f64);
            assert_eq!(accepted, i < 4);
        }
        assert_eq!(rb.overflow_count(), 3);
        assert_eq!(rb.available(), 4);

        let view = rb.pop_block(4).unwrap();
        assert_eq!(&*view, &[0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_overwrite_oldest_keeps_latest() {
        let rb = ChannelRingBuffer::with_consumers(4, OverflowPolicy::OverwriteOldest, 1).unwrap();
        for i in 0..7 {
            rb.push(i as f64);
        }
        assert_eq!(rb.overflow_count(), 3);
        assert_eq!(rb.available(), 4);

        let view = rb.pop_block(8).unwrap();
        assert_eq!(&*view, &[3.0, 4.0, 5.0, 6.0]);
        assert_eq!(view.start_position(), 3);
    }

    #[test]
    fn test_view_holds_slots_until_dropped() {
        let rb = ChannelRingBuffer::new(4).unwrap();
        for i in 0..4 {
            rb.push(i as f64);
        }
        let view = rb.pop_block(2).unwrap();
        // Slots are still owned by the live view
        assert!(!rb.push(99.0));
        assert!(rb.pop_block(1).is_none());
        drop(view);

        assert!(rb.push(4.0));
        let view = rb.pop_block(8).unwrap();
        assert_eq!(&*view, &[2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_independent_consumers() {
        let rb = ChannelRingBuffer::with_consumers(8, OverflowPolicy::DropNewest, 2).unwrap();
        for i in 0..6 {
            rb.push(i as f64);
        }

        let fast = rb.pop_block_for(0, 6).unwrap();
        assert_eq!(fast.len(), 6);
        drop(fast);
        assert_eq!(rb.available_for(0), 0);
        assert_eq!(rb.available_for(1), 6);

        // The slow consumer still pins its six samples
        for i in 6..8 {
            assert!(rb.push(i as f64));
        }
        assert!(!rb.push(8.0));

        let slow = rb.pop_block_for(1, 3).unwrap();
        assert_eq!(&*slow, &[0.0, 1.0, 2.0]);
        assert!(rb.pop_block_for(2, 1).is_none());
    }

    #[test]
    fn test_skip_to_discards_samples() {
        let rb = ChannelRingBuffer::new(8).unwrap();
        for i in 0..6 {
            rb.push(i as f64);
        }
        assert_eq!(rb.skip_to(0, 4), 4);
        assert_eq!(rb.skip_to(0, 2), 0);
        assert_eq!(rb.skip_to(0, 100), 2);
        assert_eq!(rb.available(), 0);
    }

    #[test]
    fn test_fill_ratio_tracks_slowest_consumer() {
        let rb = ChannelRingBuffer::new(8).unwrap();
        assert_eq!(rb.fill_ratio(), 0.0);
        for i in 0..4 {
            rb.push(i as f64);
        }
        assert!((rb.fill_ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_concurrent_push_pop_preserves_order() {
        const TOTAL: usize = 200_000;
        let rb = Arc::new(ChannelRingBuffer::new(1024).unwrap());

        let producer_rb = Arc::clone(&rb);
        let producer = thread::spawn(move || {
            let mut next = 0usize;
            while next < TOTAL {
                if producer_rb.push(next as f64) {
                    next += 1;
                } else {
                    thread::yield_now();
                }
            }
        });

        let consumer_rb = Arc::clone(&rb);
        let consumer = thread::spawn(move || {
            let mut expected = 0usize;
            while expected < TOTAL {
                match consumer_rb.pop_block(128) {
                    Some(view) => {
                        for &value in view.iter() {
                            assert_eq!(value, expected as f64);
                            expected += 1;
                        }
                    }
                    None => thread::yield_now(),
                }
            }
            expected
        });

        producer.join().unwrap();
        assert_eq!(consumer.join().unwrap(), TOTAL);
    }

    #[test]
    fn test_concurrent_overwrite_never_reorders() {
        const TOTAL: usize = 100_000;
        let rb = Arc::new(
            ChannelRingBuffer::with_consumers(64, OverflowPolicy::OverwriteOldest, 1).unwrap(),
        );

        let producer_rb = Arc::clone(&rb);
        let producer = thread::spawn(move || {
            for i in 0..TOTAL {
                producer_rb.push(i as f64);
            }
        });

        let mut last = -1.0;
        let mut seen = 0usize;
        loop {
            if let Some(view) = rb.pop_block(16) {
                for (i, &value) in view.iter().enumerate() {
                    // Values match their sequence position and only ever increase
                    assert_eq!(value, (view.start_position() + i as u64) as f64);
                    assert!(value > last);
                    last = value;
                    seen += 1;
                }
            } else if producer.is_finished() && rb.available() == 0 {
                break;
            }
        }
        producer.join().unwrap();
        assert!(seen > 0);
        assert!(rb.overflow_count() + seen as u64 >= TOTAL as u64);
    }
}
