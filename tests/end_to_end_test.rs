//! End-to-end tests: frames in, spectra and separated waves out.

use parking_lot::Mutex;
use std::f64::consts::PI;
use std::sync::Arc;
use std::time::Duration;
use wave_daq::acquisition::{AcquisitionEvent, AcquisitionOrchestrator, AcquisitionState};
use wave_daq::config::AcquisitionConfig;
use wave_daq::data::{MultiChannelBuffer, OverflowPolicy};
use wave_daq::hardware::{SimulatedConfig, SourceConfig, WaveComponent};
use wave_daq::spectral::{FftPlanCache, SpectralConfig, SpectralProcessor, WindowType};
use wave_daq::wave::{DispersionSolver, ProbeGeometry, WaveConfig, WaveSeparationAnalyzer};

const FS: f64 = 100.0;
const OFFSETS: [f64; 4] = [0.0, 0.31, 0.74, 1.17];

fn expected_hm0(amplitude: f64) -> f64 {
    4.0 * (amplitude * amplitude / 2.0).sqrt()
}

/// Amplitude of the equivalent sine: `A = sqrt(2 m0) = H_m0 / (2 sqrt 2)`.
fn amplitude_from_hm0(hm0: f64) -> f64 {
    hm0 / (2.0 * 2.0_f64.sqrt())
}

fn wave_config() -> WaveConfig {
    let mut config = WaveConfig::new(ProbeGeometry::from_offsets(&OFFSETS).unwrap());
    config.depth = 1.0;
    config.max_frequency = Some(5.0);
    config
}

/// Frames of a progressive 0.5 Hz wave of unit amplitude at the four probes.
fn incident_frames(n: usize) -> Vec<Vec<f64>> {
    let k = DispersionSolver::default().wavenumber(0.5, 1.0).unwrap();
    let omega = 2.0 * PI * 0.5;
    (0..n)
        .map(|i| {
            let t = i as f64 / FS;
            OFFSETS.iter().map(|x| (omega * t - k * x).cos()).collect()
        })
        .collect()
}

fn lab_config() -> AcquisitionConfig {
    let mut config = AcquisitionConfig::default();
    config.session.name = "flume-e2e".into();
    config.buffer.channels = 4;
    config.buffer.sample_rate = FS;
    config.buffer.capacity = 1024;
    config.buffer.block_size = 256;
    config.spectral.window_length = 256;
    config.wave = Some(wave_config());
    config.orchestrator.drain_timeout = Duration::from_secs(5);
    config.orchestrator.source = SourceConfig::Simulated(SimulatedConfig {
        components: vec![WaveComponent {
            frequency: 0.5,
            amplitude: 1.0,
        }],
        depth: 1.0,
        frame_limit: Some(500),
        ..Default::default()
    });
    config
}

#[test]
fn test_buffered_block_feeds_both_analyses() {
    let buffer = MultiChannelBuffer::with_options(4, 1024, FS, OverflowPolicy::DropNewest, 2)
        .unwrap();
    for frame in incident_frames(500) {
        assert!(buffer.push_frame(&frame));
    }
    assert_eq!(buffer.get_stats().overflow_count, 0);

    let mut spectral = SpectralProcessor::new(FS, SpectralConfig::default()).unwrap();
    let block = buffer.pop_aligned_block_for(0, 256).unwrap();
    let analysis = spectral.process_aligned(&block.channels()).unwrap();
    drop(block);
    let resolution = FS / 256.0;
    for channel in &analysis.channels {
        assert!(
            (channel.peak_frequency - 0.5).abs() <= resolution,
            "peak at {} Hz",
            channel.peak_frequency
        );
    }

    let mut analyzer = WaveSeparationAnalyzer::new(FS, wave_config()).unwrap();
    let block = buffer.pop_aligned_block_for(1, 256).unwrap();
    let result = analyzer.analyze(&block.channels()).unwrap();
    let error = (result.statistics.incident_hm0 - expected_hm0(1.0)).abs() / expected_hm0(1.0);
    assert!(error < 0.1, "relative error {error}");
    assert_eq!(result.excluded_bin_count(), 0);

    // Only one whole block fits in 500 frames
    assert!(buffer.pop_aligned_block_for(0, 256).is_none());
    assert!(buffer.pop_aligned_block_for(1, 256).is_none());
}

#[test]
fn test_simulated_session_end_to_end() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);

    let mut orchestrator = AcquisitionOrchestrator::new();
    orchestrator.register_observer(Arc::new(move |event: &AcquisitionEvent| {
        sink.lock().push(event.clone());
    }));
    orchestrator.configure(lab_config()).unwrap();
    orchestrator.start().unwrap();
    assert!(orchestrator.wait_until_finished(Duration::from_secs(10)));

    let summary = orchestrator.stop().unwrap();
    assert_eq!(orchestrator.state(), AcquisitionState::Idle);
    assert_eq!(summary.session, "flume-e2e");
    assert_eq!(summary.frames_acquired, 500);
    assert_eq!(summary.stats.overflow_count, 0);
    assert_eq!(summary.blocks_processed("spectral"), 1);
    assert_eq!(summary.blocks_processed("wave"), 1);
    assert_eq!(summary.processing_errors(), 0);

    let events = events.lock();
    let spectral: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            AcquisitionEvent::Spectral(analysis) => Some(Arc::clone(analysis)),
            _ => None,
        })
        .collect();
    assert_eq!(spectral.len(), 1);
    assert_eq!(spectral[0].channels.len(), 4);
    assert!((spectral[0].channels[0].peak_frequency - 0.5).abs() <= FS / 256.0);

    let waves: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            AcquisitionEvent::Wave(result) => Some(Arc::clone(result)),
            _ => None,
        })
        .collect();
    assert_eq!(waves.len(), 1);
    let hm0 = waves[0].statistics.incident_hm0;
    assert!((hm0 - expected_hm0(1.0)).abs() / expected_hm0(1.0) < 0.1, "H_m0 {hm0}");
    let amplitude = amplitude_from_hm0(hm0);
    assert!((amplitude - 1.0).abs() < 0.1, "incident amplitude {amplitude}");
    assert_eq!(waves[0].excluded_bin_count(), 0);
    assert_eq!(waves[0].block_length, 256);
}

#[test]
fn test_geometry_cache_is_bit_identical() {
    let blocks: Vec<Vec<f64>> = {
        let frames = incident_frames(256);
        (0..4)
            .map(|c| frames.iter().map(|f| f[c]).collect())
            .collect()
    };

    let mut analyzer = WaveSeparationAnalyzer::new(FS, wave_config()).unwrap();
    let first = analyzer.analyze(&blocks).unwrap();
    let warm = analyzer.analyze(&blocks).unwrap();
    assert_eq!(analyzer.geometry_cache().hits(), 1);

    let mut fresh = WaveSeparationAnalyzer::new(FS, wave_config()).unwrap();
    let cold = fresh.analyze(&blocks).unwrap();

    for (a, b) in warm.incident_spectrum.iter().zip(&cold.incident_spectrum) {
        assert_eq!(a.to_bits(), b.to_bits());
    }
    assert_eq!(first, warm);
    assert_eq!(warm, cold);
}

#[test]
fn test_flat_block_gives_zero_statistics() {
    let mut analyzer = WaveSeparationAnalyzer::new(FS, wave_config()).unwrap();
    let result = analyzer.analyze(&vec![vec![0.25; 256]; 4]).unwrap();
    assert_eq!(result.statistics.incident_hm0, 0.0);
    assert_eq!(result.statistics.reflection_coefficient, 0.0);
    assert_eq!(result.statistics.peak_period, 0.0);
    assert!(result.statistics.mean_period.is_finite());
}

#[test]
fn test_on_bin_sine_power_is_half_amplitude_squared() {
    // 8 whole cycles in 256 samples
    let frequency = FS * 8.0 / 256.0;
    let amplitude = 1.5;
    let samples: Vec<f64> = (0..256)
        .map(|i| amplitude * (2.0 * PI * frequency * i as f64 / FS).sin())
        .collect();

    let config = SpectralConfig {
        window: WindowType::Rectangular,
        window_length: 256,
        ..Default::default()
    };
    let mut processor = SpectralProcessor::new(FS, config).unwrap();
    let result = processor.process_block(&samples).unwrap();
    let expected = amplitude * amplitude / 2.0;
    assert!((result.total_power - expected).abs() < 1e-9 * expected.max(1.0));
    assert!((result.peak_frequency - frequency).abs() < 1e-12);

    let mut plans = FftPlanCache::new(4);
    let spectrum = plans.real_forward(&samples).unwrap();
    let restored = plans.real_inverse(&spectrum, samples.len()).unwrap();
    for (a, b) in restored.iter().zip(&samples) {
        assert!((a - b).abs() < 1e-9);
    }
}
