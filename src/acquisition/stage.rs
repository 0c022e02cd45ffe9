//! Processing stages fed by the consumer thread.
//!
//! Each stage owns one read cursor of the shared [`MultiChannelBuffer`], so the spectral
//! and wave stages see the same samples without sharing a cursor.
//!
//! [`MultiChannelBuffer`]: crate::data::MultiChannelBuffer

use std::sync::Arc;
use tracing::trace;

use super::observer::AcquisitionEvent;
use crate::data::AlignedBlock;
use crate::error::{AppResult, DaqError};
use crate::spectral::{SpectralConfig, SpectralProcessor};
use crate::wave::{WaveConfig, WaveSeparationAnalyzer};

/// Read cursor of the spectral stage.
pub const SPECTRAL_CONSUMER: usize = 0;
/// Read cursor of the wave stage.
pub const WAVE_CONSUMER: usize = 1;

/// A consumer of aligned blocks.
pub trait ProcessingStage: Send {
    /// Name used in logs and error events.
    fn name(&self) -> &'static str;

    /// Buffer read cursor this stage drains.
    fn consumer(&self) -> usize;

    /// Samples per channel in each block.
    fn block_size(&self) -> usize;

    /// Process one block. Errors are reported per block and never stop acquisition.
    fn process(&mut self, block: &AlignedBlock<'_>) -> AppResult<AcquisitionEvent>;
}

fn reject_gaps(stage: &str, block: &AlignedBlock<'_>) -> AppResult<()> {
    if block.gap_samples() > 0 {
        return Err(DaqError::Processing(format!(
            "{} block at position {} contains {} gap placeholders",
            stage,
            block.start_position(),
            block.gap_samples()
        )));
    }
    Ok(())
}

/// Welch PSD and coherence over every channel.
#[derive(Debug)]
pub struct SpectralStage {
    processor: SpectralProcessor,
    block_size: usize,
}

impl SpectralStage {
    /// Stage reading `block_size` samples per channel.
    pub fn new(sample_rate: f64, config: SpectralConfig, block_size: usize) -> AppResult<Self> {
        Ok(Self {
            processor: SpectralProcessor::new(sample_rate, config)?,
            block_size,
        })
    }

    /// Underlying processor.
    pub fn processor(&self) -> &SpectralProcessor {
        &self.processor
    }
}

impl ProcessingStage for SpectralStage {
    fn name(&self) -> &'static str {
        "spectral"
    }

    fn consumer(&self) -> usize {
        SPECTRAL_CONSUMER
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn process(&mut self, block: &AlignedBlock<'_>) -> AppResult<AcquisitionEvent> {
        reject_gaps(self.name(), block)?;
        let analysis = self.processor.process_aligned(&block.channels())?;
        trace!(
            position = block.start_position(),
            channels = analysis.channels.len(),
            "Spectral block processed"
        );
        Ok(AcquisitionEvent::Spectral(Arc::new(analysis)))
    }
}

/// Incident/reflected separation over the probe channels.
#[derive(Debug)]
pub struct WaveStage {
    analyzer: WaveSeparationAnalyzer,
    probe_channels: Vec<usize>,
    block_size: usize,
}

impl WaveStage {
    /// Stage reading `block_size` samples per channel.
    pub fn new(sample_rate: f64, config: WaveConfig, block_size: usize) -> AppResult<Self> {
        let probe_channels = config.resolved_probe_channels();
        Ok(Self {
            analyzer: WaveSeparationAnalyzer::new(sample_rate, config)?,
            probe_channels,
            block_size,
        })
    }

    /// Underlying analyzer.
    pub fn analyzer(&self) -> &WaveSeparationAnalyzer {
        &self.analyzer
    }
}

impl ProcessingStage for WaveStage {
    fn name(&self) -> &'static str {
        "wave"
    }

    fn consumer(&self) -> usize {
        WAVE_CONSUMER
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn process(&mut self, block: &AlignedBlock<'_>) -> AppResult<AcquisitionEvent> {
        reject_gaps(self.name(), block)?;
        let probes = self
            .probe_channels
            .iter()
            .map(|&c| {
                block.channel(c).ok_or_else(|| {
                    DaqError::Processing(format!("probe channel {} missing from block", c))
                })
            })
            .collect::<AppResult<Vec<&[f64]>>>()?;
        let result = self.analyzer.analyze(&probes)?;
        trace!(
            position = block.start_position(),
            hm0 = result.statistics.incident_hm0,
            "Wave block processed"
        );
        Ok(AcquisitionEvent::Wave(Arc::new(result)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{MultiChannelBuffer, OverflowPolicy};
    use crate::spectral::WindowType;
    use crate::wave::ProbeGeometry;

    fn spectral_config() -> SpectralConfig {
        SpectralConfig {
            window: WindowType::Hann,
            window_length: 64,
            ..Default::default()
        }
    }

    fn filled_buffer(channels: usize, samples: usize) -> MultiChannelBuffer {
        let buffer =
            MultiChannelBuffer::with_options(channels, 256, 100.0, OverflowPolicy::DropNewest, 2)
                .unwrap();
        for i in 0..samples {
            let frame: Vec<f64> = (0..channels)
                .map(|c| (0.1 * i as f64 + c as f64).sin())
                .collect();
            assert!(buffer.push_frame(&frame));
        }
        buffer
    }

    #[test]
    fn spectral_stage_publishes_every_channel() {
        let buffer = filled_buffer(3, 128);
        let mut stage = SpectralStage::new(100.0, spectral_config(), 128).unwrap();
        let block = buffer
            .pop_aligned_block_for(stage.consumer(), stage.block_size())
            .unwrap();
        match stage.process(&block).unwrap() {
            AcquisitionEvent::Spectral(analysis) => assert_eq!(analysis.channels.len(), 3),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn stages_reject_gap_placeholders() {
        let buffer =
            MultiChannelBuffer::with_options(2, 8, 100.0, OverflowPolicy::DropNewest, 1).unwrap();
        for i in 0..8 {
            assert!(buffer.push_frame(&[i as f64, i as f64]));
        }
        // Channel 1 is full, so this sample becomes a pending gap
        assert!(!buffer.push_sample(1, 99.0));
        drop(buffer.pop_aligned_block(8));
        for i in 0..8 {
            buffer.push_sample(0, i as f64);
            buffer.push_sample(1, i as f64);
        }

        let block = buffer.pop_aligned_block(4).unwrap();
        assert!(block.gap_samples() > 0);
        let mut stage = SpectralStage::new(
            100.0,
            SpectralConfig {
                window_length: 4,
                ..Default::default()
            },
            4,
        )
        .unwrap();
        let err = stage.process(&block).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn wave_stage_maps_probe_channels() {
        let buffer = filled_buffer(3, 128);
        let mut config = WaveConfig::new(ProbeGeometry::from_offsets(&[0.0, 0.4]).unwrap());
        config.probe_channels = vec![2, 0];
        config.max_frequency = Some(5.0);
        let mut stage = WaveStage::new(100.0, config, 128).unwrap();
        assert_eq!(stage.consumer(), WAVE_CONSUMER);

        let block = buffer
            .pop_aligned_block_for(stage.consumer(), stage.block_size())
            .unwrap();
        match stage.process(&block).unwrap() {
            AcquisitionEvent::Wave(result) => assert_eq!(result.block_length, 128),
            other => panic!("unexpected event: {:?}", other),
        }
        // The spectral cursor is untouched
        assert_eq!(buffer.available_aligned(SPECTRAL_CONSUMER), 128);
    }
}
