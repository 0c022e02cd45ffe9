//! Multi-channel sample buffer with aligned block reads.
//!
//! `MultiChannelBuffer` owns one [`ChannelRingBuffer`] per probe and adds the two things
//! the processing stages need on top of a plain ring:
//!
//! - **Synchronised writes**: [`push_frame`](MultiChannelBuffer::push_frame) either stores
//!   a sample on every channel or on none, so channels never drift apart under the
//!   drop-newest policy.
//! - **Aligned reads**: [`pop_aligned_block_for`](MultiChannelBuffer::pop_aligned_block_for)
//!   returns a block only when every channel has enough samples, and all returned slices
//!   start at the same sequence position.
//!
//! Per-channel writes via [`push_sample`](MultiChannelBuffer::push_sample) are also
//! supported. When one of them is rejected, a NaN placeholder is written in its place as
//! soon as room returns so that sequence positions keep lining up across channels.
//!
//! All counters are relaxed atomics and therefore advisory.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

use super::ring_buffer::{BlockView, BufferError, ChannelRingBuffer, OverflowPolicy};

/// Attempts at re-aligning diverged cursors before a read reports "not ready".
const MAX_RESYNC_ATTEMPTS: usize = 4;

/// Snapshot of one channel's counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChannelStats {
    /// Channel index
    pub channel: usize,
    /// Samples stored (including gap placeholders)
    pub samples_written: u64,
    /// Pushes that found the channel full
    pub overflow_count: u64,
    /// Unread samples for the slowest consumer
    pub available: usize,
    /// Fill level in percent
    pub fill_percent: f64,
}

/// Aggregate buffer statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BufferStats {
    /// Samples stored over all channels
    pub samples_written: u64,
    /// Samples handed out over all channels and consumers
    pub samples_read: u64,
    /// Overflows over all channels
    pub overflow_count: u64,
    /// Reads that found too little data
    pub underflow_count: u64,
    /// Fill level of the fullest channel, in percent
    pub fill_percent: f64,
    /// Frames stored by `push_frame`
    pub frames_written: u64,
    /// Frames rejected by `push_frame`
    pub frames_dropped: u64,
    /// Stored samples per second since the buffer was created
    pub throughput_sps: f64,
    /// Samples skipped to re-align diverged channels
    pub resync_discards: u64,
    /// NaN placeholders written for rejected per-channel samples
    pub gap_samples: u64,
    /// Per-channel breakdown
    pub channels: Vec<ChannelStats>,
}

/// One aligned block: `block_size` samples per channel, all starting at the same
/// sequence position.
///
/// Holds the underlying ring slots until dropped.
#[derive(Debug)]
pub struct AlignedBlock<'a> {
    views: Vec<BlockView<'a>>,
    start: u64,
    gap_samples: usize,
}

impl AlignedBlock<'_> {
    /// Sequence position of the first sample in every channel.
    pub fn start_position(&self) -> u64 {
        self.start
    }

    /// Samples per channel.
    pub fn len(&self) -> usize {
        self.views.first().map_or(0, |v| v.len())
    }

    /// Whether the block is empty (never true for a block returned by the buffer).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of channels.
    pub fn channel_count(&self) -> usize {
        self.views.len()
    }

    /// Samples of one channel.
    pub fn channel(&self, index: usize) -> Option<&[f64]> {
        self.views.get(index).map(|v| &**v)
    }

    /// All channels as slices, in channel order.
    pub fn channels(&self) -> Vec<&[f64]> {
        self.views.iter().map(|v| &**v).collect()
    }

    /// NaN placeholders contained in the block across all channels.
    pub fn gap_samples(&self) -> usize {
        self.gap_samples
    }

    /// Copy the block out of the ring, releasing the slots.
    pub fn to_owned_channels(&self) -> Vec<Vec<f64>> {
        self.views.iter().map(|v| v.to_vec()).collect()
    }
}

/// N synchronised channel rings sharing capacity, sample rate and overflow policy.
#[derive(Debug)]
pub struct MultiChannelBuffer {
    channels: Vec<ChannelRingBuffer>,
    sample_rate: f64,
    capacity: usize,
    policy: OverflowPolicy,
    /// Per-channel rejected samples still owed a placeholder (producer only)
    pending_gaps: Vec<AtomicU64>,
    gap_samples: AtomicU64,
    frames_written: AtomicU64,
    frames_dropped: AtomicU64,
    resync_discards: AtomicU64,
    aligned_underflows: AtomicU64,
    created: Instant,
}

impl MultiChannelBuffer {
    /// Create a buffer with one consumer and the drop-newest policy.
    pub fn new(channels: usize, capacity: usize, sample_rate: f64) -> Result<Self, BufferError> {
        Self::with_options(channels, capacity, sample_rate, OverflowPolicy::default(), 1)
    }

    /// Create a buffer with an explicit overflow policy and consumer count.
    pub fn with_options(
        channels: usize,
        capacity: usize,
        sample_rate: f64,
        policy: OverflowPolicy,
        consumers: usize,
    ) -> Result<Self, BufferError> {
        if channels == 0 {
            return Err(BufferError::NoChannels);
        }
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(BufferError::InvalidSampleRate(sample_rate));
        }

        let rings = (0..channels)
            .map(|_| ChannelRingBuffer::with_consumers(capacity, policy, consumers))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            channels: rings,
            sample_rate,
            capacity,
            policy,
            pending_gaps: (0..channels).map(|_| AtomicU64::new(0)).collect(),
            gap_samples: AtomicU64::new(0),
            frames_written: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            resync_discards: AtomicU64::new(0),
            aligned_underflows: AtomicU64::new(0),
            created: Instant::now(),
        })
    }

    /// Number of channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Per-channel capacity in samples.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Nominal sample rate in Hz.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Overflow policy shared by all channels.
    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Independent read cursors per channel.
    pub fn consumer_count(&self) -> usize {
        self.channels.first().map_or(0, ChannelRingBuffer::consumer_count)
    }

    /// Direct access to one channel ring.
    pub fn channel(&self, index: usize) -> Option<&ChannelRingBuffer> {
        self.channels.get(index)
    }

    /// Samples ready for an aligned read by `consumer` (minimum over channels).
    pub fn available_aligned(&self, consumer: usize) -> usize {
        self.channels
            .iter()
            .map(|c| c.available_for(consumer))
            .min()
            .unwrap_or(0)
    }

    /// Write placeholders owed to `channel`, then `value`. Caller has checked room.
    #[inline]
    fn write_with_gaps(&self, channel: usize, value: f64) -> bool {
        let ring = &self.channels[channel];
        let gaps = self.pending_gaps[channel].swap(0, Ordering::Relaxed);
        for _ in 0..gaps {
            ring.push(f64::NAN);
        }
        if gaps > 0 {
            self.gap_samples.fetch_add(gaps, Ordering::Relaxed);
        }
        ring.push(value)
    }

    #[inline]
    fn room_needed(&self, channel: usize) -> usize {
        self.pending_gaps[channel].load(Ordering::Relaxed) as usize + 1
    }

    /// Push one sample to a single channel.
    ///
    /// Returns `false` if the channel index is out of range or the channel was full.
    /// A rejected sample under the drop-newest policy is remembered and replaced by a NaN
    /// placeholder on the next accepted push.
    pub fn push_sample(&self, channel: usize, value: f64) -> bool {
        let Some(ring) = self.channels.get(channel) else {
            return false;
        };

        match self.policy {
            OverflowPolicy::DropNewest => {
                if ring.free_slots() >= self.room_needed(channel) {
                    self.write_with_gaps(channel, value)
                } else {
                    ring.record_overflow();
                    let gaps = &self.pending_gaps[channel];
                    let owed = gaps.load(Ordering::Relaxed);
                    // A full buffer of placeholders is the most that can ever be written
                    if owed + 1 < self.capacity as u64 {
                        gaps.store(owed + 1, Ordering::Relaxed);
                    }
                    false
                }
            }
            OverflowPolicy::OverwriteOldest => ring.push(value),
        }
    }

    /// Push one synchronised frame (one value per channel, in channel order).
    ///
    /// Under drop-newest the frame is stored on every channel or on none. A rejected
    /// frame counts one overflow per full channel and one dropped frame. Under
    /// overwrite-oldest every channel stores its value and full channels evict their
    /// oldest sample. Returns `false` whenever any overflow occurred or `values` has the
    /// wrong length.
    pub fn push_frame(&self, values: &[f64]) -> bool {
        if values.len() != self.channels.len() {
            self.frames_dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        match self.policy {
            OverflowPolicy::DropNewest => {
                let mut fits = true;
                for (index, ring) in self.channels.iter().enumerate() {
                    if ring.free_slots() < self.room_needed(index) {
                        ring.record_overflow();
                        fits = false;
                    }
                }
                if !fits {
                    self.frames_dropped.fetch_add(1, Ordering::Relaxed);
                    return false;
                }
                for (index, &value) in values.iter().enumerate() {
                    self.write_with_gaps(index, value);
                }
                self.frames_written.fetch_add(1, Ordering::Relaxed);
                true
            }
            OverflowPolicy::OverwriteOldest => {
                let mut clean = true;
                for (ring, &value) in self.channels.iter().zip(values) {
                    clean &= ring.push(value);
                }
                self.frames_written.fetch_add(1, Ordering::Relaxed);
                clean
            }
        }
    }

    /// Aligned read of `block_size` samples per channel for consumer 0.
    pub fn pop_aligned_block(&self, block_size: usize) -> Option<AlignedBlock<'_>> {
        self.pop_aligned_block_for(0, block_size)
    }

    /// Aligned read of `block_size` samples per channel for the given consumer.
    ///
    /// Never blocks. Returns `None` ("not ready") unless every channel has at least
    /// `block_size` unread samples for this consumer. When cursors have diverged (only
    /// possible under overwrite-oldest), lagging channels are first advanced to the
    /// common position and the skipped samples are counted as resync discards.
    pub fn pop_aligned_block_for(
        &self,
        consumer: usize,
        block_size: usize,
    ) -> Option<AlignedBlock<'_>> {
        if block_size == 0 || block_size > self.capacity || consumer >= self.consumer_count() {
            self.aligned_underflows.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        for _ in 0..MAX_RESYNC_ATTEMPTS {
            let positions: Vec<u64> = self
                .channels
                .iter()
                .filter_map(|c| c.read_position(consumer))
                .collect();
            let newest = positions.iter().copied().max().unwrap_or(0);
            let oldest = positions.iter().copied().min().unwrap_or(0);

            if newest != oldest {
                let skipped: u64 = self
                    .channels
                    .iter()
                    .map(|c| c.skip_to(consumer, newest))
                    .sum();
                self.resync_discards.fetch_add(skipped, Ordering::Relaxed);
                continue;
            }

            if self.available_aligned(consumer) < block_size {
                self.aligned_underflows.fetch_add(1, Ordering::Relaxed);
                return None;
            }

            let views: Vec<BlockView<'_>> = self
                .channels
                .iter()
                .filter_map(|c| c.pop_block_for(consumer, block_size))
                .collect();

            let consistent = views.len() == self.channels.len()
                && views
                    .iter()
                    .all(|v| v.len() == block_size && v.start_position() == newest);
            if !consistent {
                // Evicted while reading; put back what we can and re-align
                views.into_iter().for_each(BlockView::abandon);
                continue;
            }

            let gap_samples = views
                .iter()
                .map(|v| v.iter().filter(|s| s.is_nan()).count())
                .sum();
            return Some(AlignedBlock {
                views,
                start: newest,
                gap_samples,
            });
        }

        self.aligned_underflows.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Snapshot of all counters.
    pub fn get_stats(&self) -> BufferStats {
        let channels: Vec<ChannelStats> = self
            .channels
            .iter()
            .enumerate()
            .map(|(index, ring)| ChannelStats {
                channel: index,
                samples_written: ring.samples_written(),
                overflow_count: ring.overflow_count(),
                available: (0..ring.consumer_count())
                    .map(|c| ring.available_for(c))
                    .max()
                    .unwrap_or(0),
                fill_percent: ring.fill_ratio() * 100.0,
            })
            .collect();

        let samples_written: u64 = channels.iter().map(|c| c.samples_written).sum();
        let elapsed = self.created.elapsed().as_secs_f64();

        BufferStats {
            samples_written,
            samples_read: self.channels.iter().map(ChannelRingBuffer::samples_read).sum(),
            overflow_count: channels.iter().map(|c| c.overflow_count).sum(),
            underflow_count: self.aligned_underflows.load(Ordering::Relaxed)
                + self
                    .channels
                    .iter()
                    .map(ChannelRingBuffer::underflow_count)
                    .sum::<u64>(),
            fill_percent: channels
                .iter()
                .map(|c| c.fill_percent)
                .fold(0.0, f64::max),
            frames_written: self.frames_written.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            throughput_sps: if elapsed > 0.0 {
                samples_written as f64 / elapsed
            } else {
                0.0
            },
            resync_discards: self.resync_discards.load(Ordering::Relaxed),
            gap_samples: self.gap_samples.load(Ordering::Relaxed),
            channels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(value: f64, channels: usize) -> Vec<f64> {
        (0..channels).map(|c| value + c as f64 * 1000.0).collect()
    }

    #[test]
    fn test_rejects_invalid_layout() {
        assert_eq!(
            MultiChannelBuffer::new(0, 64, 100.0).unwrap_err(),
            BufferError::NoChannels
        );
        assert!(matches!(
            MultiChannelBuffer::new(2, 64, 0.0).unwrap_err(),
            BufferError::InvalidSampleRate(_)
        ));
        assert_eq!(
            MultiChannelBuffer::new(2, 60, 100.0).unwrap_err(),
            BufferError::InvalidCapacity(60)
        );
    }

    #[test]
    fn test_aligned_block_not_ready_until_all_channels_filled() {
        let buffer = MultiChannelBuffer::new(3, 64, 100.0).unwrap();
        for i in 0..10 {
            buffer.push_sample(0, i as f64);
            buffer.push_sample(1, i as f64);
        }
        assert!(buffer.pop_aligned_block(8).is_none());

        for i in 0..10 {
            buffer.push_sample(2, i as f64);
        }
        let block = buffer.pop_aligned_block(8).unwrap();
        assert_eq!(block.channel_count(), 3);
        assert_eq!(block.len(), 8);
        assert_eq!(block.start_position(), 0);
        for channel in block.channels() {
            assert_eq!(channel[7], 7.0);
        }
        drop(block);

        assert_eq!(buffer.available_aligned(0), 2);
        assert_eq!(buffer.get_stats().underflow_count, 1);
    }

    #[test]
    fn test_push_frame_keeps_channels_in_lockstep() {
        let buffer = MultiChannelBuffer::new(4, 16, 100.0).unwrap();
        for i in 0..20 {
            let stored = buffer.push_frame(&frame(i as f64, 4));
            assert_eq!(stored, i < 16);
        }

        let stats = buffer.get_stats();
        assert_eq!(stats.frames_written, 16);
        assert_eq!(stats.frames_dropped, 4);
        assert_eq!(stats.overflow_count, 16);
        assert!((stats.fill_percent - 100.0).abs() < 1e-9);

        let block = buffer.pop_aligned_block(16).unwrap();
        for (c, channel) in block.channels().iter().enumerate() {
            assert_eq!(channel[15], 15.0 + c as f64 * 1000.0);
        }
    }

    #[test]
    fn test_push_frame_rejects_wrong_width() {
        let buffer = MultiChannelBuffer::new(2, 16, 100.0).unwrap();
        assert!(!buffer.push_frame(&[1.0]));
        assert_eq!(buffer.get_stats().frames_dropped, 1);
        assert_eq!(buffer.available_aligned(0), 0);
    }

    #[test]
    fn test_rejected_sample_becomes_gap_placeholder() {
        let buffer = MultiChannelBuffer::new(1, 4, 100.0).unwrap();
        for i in 0..4 {
            assert!(buffer.push_sample(0, i as f64));
        }
        assert!(!buffer.push_sample(0, 4.0));

        let block = buffer.pop_aligned_block(2).unwrap();
        assert_eq!(block.gap_samples(), 0);
        drop(block);

        // Placeholder for the rejected sample goes in first
        assert!(buffer.push_sample(0, 5.0));
        let block = buffer.pop_aligned_block(4).unwrap();
        let samples = block.channel(0).unwrap();
        assert_eq!(samples[..2], [2.0, 3.0]);
        assert!(samples[2].is_nan());
        assert_eq!(samples[3], 5.0);
        assert_eq!(block.gap_samples(), 1);

        let stats = buffer.get_stats();
        assert_eq!(stats.gap_samples, 1);
        assert_eq!(stats.overflow_count, 1);
    }

    #[test]
    fn test_push_frame_writes_owed_gaps_first() {
        let buffer = MultiChannelBuffer::new(2, 4, 100.0).unwrap();
        for i in 0..4 {
            assert!(buffer.push_frame(&[i as f64, 10.0 * i as f64]));
        }
        assert!(!buffer.push_sample(0, 99.0));
        assert!(!buffer.push_sample(1, 99.0));

        drop(buffer.pop_aligned_block(1).unwrap());
        // One free slot cannot hold the placeholder and the value
        assert!(!buffer.push_frame(&[4.0, 40.0]));

        drop(buffer.pop_aligned_block(1).unwrap());
        assert!(buffer.push_frame(&[5.0, 50.0]));
        let block = buffer.pop_aligned_block(4).unwrap();
        let first = block.channel(0).unwrap();
        let second = block.channel(1).unwrap();
        assert_eq!(first[..2], [2.0, 3.0]);
        assert!(first[2].is_nan());
        assert_eq!(first[3], 5.0);
        assert_eq!(second[..2], [20.0, 30.0]);
        assert!(second[2].is_nan());
        assert_eq!(second[3], 50.0);
        assert_eq!(block.gap_samples(), 2);
        drop(block);

        let stats = buffer.get_stats();
        assert_eq!(stats.gap_samples, 2);
        assert_eq!(stats.frames_dropped, 1);
        assert_eq!(stats.frames_written, 5);
    }

    #[test]
    fn test_overflow_on_one_channel_does_not_stop_others() {
        let buffer = MultiChannelBuffer::new(2, 4, 100.0).unwrap();
        for i in 0..6 {
            buffer.push_sample(0, i as f64);
        }
        for i in 0..3 {
            assert!(buffer.push_sample(1, i as f64));
        }

        let stats = buffer.get_stats();
        assert_eq!(stats.channels[0].overflow_count, 2);
        assert_eq!(stats.channels[1].overflow_count, 0);
        assert_eq!(stats.channels[1].available, 3);
    }

    #[test]
    fn test_independent_consumers_see_same_blocks() {
        let buffer =
            MultiChannelBuffer::with_options(2, 32, 100.0, OverflowPolicy::DropNewest, 2).unwrap();
        for i in 0..12 {
            buffer.push_frame(&frame(i as f64, 2));
        }

        let first = buffer.pop_aligned_block_for(0, 8).unwrap().to_owned_channels();
        let second = buffer.pop_aligned_block_for(1, 8).unwrap().to_owned_channels();
        assert_eq!(first, second);
        assert!(buffer.pop_aligned_block_for(2, 8).is_none());
    }

    #[test]
    fn test_overwrite_resyncs_diverged_channels() {
        let buffer =
            MultiChannelBuffer::with_options(2, 8, 100.0, OverflowPolicy::OverwriteOldest, 1)
                .unwrap();
        // Channel 0 runs ahead and evicts its oldest samples
        for i in 0..12 {
            buffer.push_sample(0, i as f64);
        }
        for i in 0..8 {
            buffer.push_sample(1, i as f64);
        }

        let block = buffer.pop_aligned_block(4).unwrap();
        assert_eq!(block.start_position(), 4);
        assert_eq!(block.channel(0).unwrap(), &[4.0, 5.0, 6.0, 7.0]);
        assert_eq!(block.channel(1).unwrap(), &[4.0, 5.0, 6.0, 7.0]);
        drop(block);

        let stats = buffer.get_stats();
        assert_eq!(stats.resync_discards, 4);
        assert_eq!(stats.overflow_count, 4);
    }

    #[test]
    fn test_invalid_block_size_is_not_ready() {
        let buffer = MultiChannelBuffer::new(1, 8, 100.0).unwrap();
        for i in 0..8 {
            buffer.push_sample(0, i as f64);
        }
        assert!(buffer.pop_aligned_block(0).is_none());
        assert!(buffer.pop_aligned_block(16).is_none());
        assert_eq!(buffer.available_aligned(0), 8);
    }

    #[test]
    fn test_stats_track_reads_and_throughput() {
        let buffer = MultiChannelBuffer::new(2, 16, 100.0).unwrap();
        for i in 0..10 {
            buffer.push_frame(&frame(i as f64, 2));
        }
        drop(buffer.pop_aligned_block(5));

        let stats = buffer.get_stats();
        assert_eq!(stats.samples_written, 20);
        assert_eq!(stats.samples_read, 10);
        assert!(stats.throughput_sps > 0.0);
        assert_eq!(stats.channels.len(), 2);
        assert_eq!(stats.channels[1].available, 5);
    }
}
