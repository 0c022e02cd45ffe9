//! Sample buffering between the acquisition producer and the processing stages.
pub mod multi_channel;
pub mod ring_buffer;

pub use multi_channel::{AlignedBlock, BufferStats, ChannelStats, MultiChannelBuffer};
pub use ring_buffer::{BlockView, BufferError, ChannelRingBuffer, OverflowPolicy};
