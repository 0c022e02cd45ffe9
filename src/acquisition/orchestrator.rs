//! Acquisition orchestrator: owns the session lifecycle and the producer and consumer
//! threads.
//!
//! # Threads
//!
//! ```text
//!  FrameSource ──poll──> producer thread ──push_frame──> MultiChannelBuffer
//!                                                            │ cursor 0   │ cursor 1
//!                                                            ▼            ▼
//!                                   consumer thread: SpectralStage     WaveStage
//!                                                            │            │
//!                                                            └──notify────┴──> observers
//! ```
//!
//! The producer never waits on the consumer: a full buffer only raises overflow counters.
//! Cancellation is a pair of atomic flags checked once per iteration. After the producer
//! exits the consumer keeps draining whole blocks until the buffer runs dry or the drain
//! timeout expires.
//!
//! In callback mode ([`AcquisitionOrchestrator::start_with_callback`]) there is no
//! producer thread; the driver's own thread pushes frames through a [`FrameCallback`].

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::observer::{AcquisitionEvent, ObserverId, ObserverRegistry, ResultObserver};
use super::stage::{ProcessingStage, SpectralStage, WaveStage};
use super::state::{AcquisitionState, StateEvent};
use crate::config::AcquisitionConfig;
use crate::data::{BufferStats, MultiChannelBuffer};
use crate::error::{AppResult, DaqError};
use crate::hardware::{build_source, FramePoll, FrameSource, HardwareError};

/// Per-stage counters in a [`SessionSummary`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StageSummary {
    /// Stage name
    pub stage: String,
    /// Blocks processed successfully
    pub blocks_processed: u64,
    /// Blocks that failed
    pub errors: u64,
}

/// What a finished session did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    /// Session name from the configuration
    pub session: String,
    /// Frames delivered by the source (accepted or not)
    pub frames_acquired: u64,
    /// Per-stage counters
    pub stages: Vec<StageSummary>,
    /// Wall time from start to the end of cleanup
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    /// Buffer counters at the end of the session
    pub stats: BufferStats,
    /// Hardware fault that ended the session, if any
    pub fault: Option<String>,
}

impl SessionSummary {
    /// Total failed blocks across stages.
    pub fn processing_errors(&self) -> u64 {
        self.stages.iter().map(|s| s.errors).sum()
    }

    /// Successful blocks of the named stage.
    pub fn blocks_processed(&self, stage: &str) -> u64 {
        self.stages
            .iter()
            .find(|s| s.stage == stage)
            .map_or(0, |s| s.blocks_processed)
    }
}

/// State shared by the control thread, the producer and the consumer.
struct SessionShared {
    state: Arc<Mutex<AcquisitionState>>,
    observers: Arc<ObserverRegistry>,
    buffer: Arc<MultiChannelBuffer>,
    /// Producer cancellation
    stop: AtomicBool,
    /// Set once no more frames will arrive
    producer_done: AtomicBool,
    frames: AtomicU64,
    fault: Mutex<Option<HardwareError>>,
}

impl SessionShared {
    /// Apply a producer-side transition (source finished or faulted). Ignored when the
    /// operator already moved the session on.
    fn end_production(&self, event: StateEvent) {
        let changed = {
            let mut state = self.state.lock();
            let from = *state;
            match from.next(event) {
                Some(to) if matches!(from, AcquisitionState::Running | AcquisitionState::Paused) => {
                    *state = to;
                    Some((from, to))
                }
                _ => None,
            }
        };
        if let Some((from, to)) = changed {
            info!(%from, %to, %event, "Acquisition state changed");
            self.observers
                .notify(&AcquisitionEvent::StateChanged { from, to });
        }
        self.producer_done.store(true, Ordering::Release);
    }

    fn record_fault(&self, error: HardwareError) {
        error!(error = %error, "Hardware fault, stopping acquisition");
        self.observers
            .notify(&AcquisitionEvent::HardwareFault(error.to_string()));
        *self.fault.lock() = Some(error);
        self.stop.store(true, Ordering::Release);
        self.end_production(StateEvent::Fault);
    }
}

/// Producer handle for drivers that deliver frames from their own thread.
///
/// There is exactly one handle per session and it cannot be cloned. It may be shared by
/// reference; concurrent [`on_frame`](Self::on_frame) calls are serialised so the ring
/// buffer still sees a single writer.
///
/// ```compile_fail
/// fn duplicate<T: Clone>(_: &T) {}
/// fn check(callback: &wave_daq::acquisition::FrameCallback) {
///     duplicate(callback);
/// }
/// ```
pub struct FrameCallback {
    shared: Arc<SessionShared>,
    writer: Mutex<()>,
}

impl std::fmt::Debug for FrameCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCallback")
            .field("frames", &self.shared.frames.load(Ordering::Relaxed))
            .field("active", &self.is_active())
            .finish()
    }
}

impl FrameCallback {
    /// Push one frame. Returns `false` if the frame overflowed or the session no
    /// longer accepts frames.
    pub fn on_frame(&self, values: &[f64]) -> bool {
        let _writer = self.writer.lock();
        if !self.is_active() {
            return false;
        }
        self.shared.frames.fetch_add(1, Ordering::Relaxed);
        self.shared.buffer.push_frame(values)
    }

    /// Report an unrecoverable driver error. Forces the session into `Stopping`.
    pub fn report_error(&self, error: HardwareError) {
        if self.is_active() {
            self.shared.record_fault(error);
        }
    }

    /// Signal that the driver has no more frames.
    pub fn finish(&self) {
        if self.is_active() {
            info!("Frame callback finished");
            self.shared.end_production(StateEvent::Stop);
        }
    }

    /// Whether frames are still accepted.
    pub fn is_active(&self) -> bool {
        !self.shared.stop.load(Ordering::Acquire)
            && !self.shared.producer_done.load(Ordering::Acquire)
            && self.shared.state.lock().is_active()
    }
}

struct ConsumerOutcome {
    stages: Vec<StageSummary>,
}

/// A configured session, with threads once started.
struct Session {
    config: AcquisitionConfig,
    shared: Arc<SessionShared>,
    stages: Vec<Box<dyn ProcessingStage>>,
    producer: Option<JoinHandle<()>>,
    consumer: Option<JoinHandle<ConsumerOutcome>>,
    started: Option<Instant>,
}

/// Lifecycle owner of one acquisition session at a time.
pub struct AcquisitionOrchestrator {
    state: Arc<Mutex<AcquisitionState>>,
    observers: Arc<ObserverRegistry>,
    session: Option<Session>,
    last_summary: Option<SessionSummary>,
}

impl std::fmt::Debug for AcquisitionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionOrchestrator")
            .field("state", &self.state())
            .field("observers", &self.observers.len())
            .field(
                "session",
                &self.session.as_ref().map(|s| s.config.session.name.as_str()),
            )
            .finish()
    }
}

impl Default for AcquisitionOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl AcquisitionOrchestrator {
    /// Idle orchestrator with no observers.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(AcquisitionState::Idle)),
            observers: Arc::new(ObserverRegistry::new()),
            session: None,
            last_summary: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> AcquisitionState {
        *self.state.lock()
    }

    /// Register a result observer. Observers persist across sessions.
    pub fn register_observer(&self, observer: Arc<dyn ResultObserver>) -> ObserverId {
        self.observers.register(observer)
    }

    /// Remove a result observer.
    pub fn unregister_observer(&self, id: ObserverId) -> bool {
        self.observers.unregister(id)
    }

    /// Buffer of the current session.
    pub fn buffer(&self) -> Option<Arc<MultiChannelBuffer>> {
        self.session.as_ref().map(|s| Arc::clone(&s.shared.buffer))
    }

    /// Configuration of the current session.
    pub fn session_config(&self) -> Option<&AcquisitionConfig> {
        self.session.as_ref().map(|s| &s.config)
    }

    /// Summary of the most recently stopped session.
    pub fn last_summary(&self) -> Option<&SessionSummary> {
        self.last_summary.as_ref()
    }

    fn transition(&self, event: StateEvent) -> AppResult<AcquisitionState> {
        let (from, to) = {
            let mut state = self.state.lock();
            let from = *state;
            let to = from.transition(event)?;
            *state = to;
            (from, to)
        };
        info!(%from, %to, %event, "Acquisition state changed");
        self.observers
            .notify(&AcquisitionEvent::StateChanged { from, to });
        Ok(to)
    }

    /// `Idle → Configuring`: validate `config`, allocate the buffer and build the stages.
    ///
    /// On failure the session returns to `Idle` and nothing is allocated.
    pub fn configure(&mut self, config: AcquisitionConfig) -> AppResult<()> {
        self.transition(StateEvent::Configure)?;
        match self.build_session(config) {
            Ok(session) => {
                info!(
                    session = %session.config.session.name,
                    channels = session.config.buffer.channels,
                    sample_rate = session.config.buffer.sample_rate,
                    capacity = session.config.buffer.capacity,
                    stages = session.stages.len(),
                    "Acquisition configured"
                );
                self.session = Some(session);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Configuration rejected");
                self.transition(StateEvent::Cancel)?;
                Err(e)
            }
        }
    }

    fn build_session(&self, config: AcquisitionConfig) -> AppResult<Session> {
        config.validate()?;
        let buffer = Arc::new(MultiChannelBuffer::with_options(
            config.buffer.channels,
            config.buffer.capacity,
            config.buffer.sample_rate,
            config.buffer.overflow_policy,
            config.consumer_count(),
        )?);

        let fs = config.buffer.sample_rate;
        let block = config.buffer.block_size;
        let mut stages: Vec<Box<dyn ProcessingStage>> = vec![Box::new(SpectralStage::new(
            fs,
            config.spectral.clone(),
            block,
        )?)];
        if let Some(wave) = &config.wave {
            stages.push(Box::new(WaveStage::new(fs, wave.clone(), block)?));
        }

        Ok(Session {
            shared: Arc::new(SessionShared {
                state: Arc::clone(&self.state),
                observers: Arc::clone(&self.observers),
                buffer,
                stop: AtomicBool::new(false),
                producer_done: AtomicBool::new(false),
                frames: AtomicU64::new(0),
                fault: Mutex::new(None),
            }),
            config,
            stages,
            producer: None,
            consumer: None,
            started: None,
        })
    }

    /// `Configuring → Idle`: release a session that was never started.
    pub fn cancel(&mut self) -> AppResult<()> {
        self.transition(StateEvent::Cancel)?;
        self.session = None;
        Ok(())
    }

    /// `Configuring → Running` with the configured frame source.
    pub fn start(&mut self) -> AppResult<()> {
        let session = self.configured_session()?;
        let config = &session.config;
        let source = build_source(
            &config.orchestrator.source,
            config.buffer.channels,
            config.buffer.sample_rate,
            &config.channel_offsets(),
        )?;
        self.start_with_source(source)
    }

    /// `Configuring → Running` polling `source` on a dedicated producer thread.
    pub fn start_with_source(&mut self, source: Box<dyn FrameSource>) -> AppResult<()> {
        let session = self.configured_session()?;
        let channels = session.config.buffer.channels;
        if source.channel_count() != channels {
            return Err(DaqError::Configuration(format!(
                "source '{}' delivers {} channels, buffer has {}",
                source.name(),
                source.channel_count(),
                channels
            )));
        }
        let expected_rate = session.config.buffer.sample_rate;
        if (source.sample_rate() - expected_rate).abs() > f64::EPSILON * expected_rate {
            warn!(
                source = source.sample_rate(),
                configured = expected_rate,
                "Source sample rate differs from configuration"
            );
        }

        self.transition(StateEvent::Start)?;
        self.spawn_consumer()?;
        if let Some(session) = self.session.as_mut() {
            let shared = Arc::clone(&session.shared);
            let poll_interval = session.config.orchestrator.poll_interval;
            let handle = thread::Builder::new()
                .name("wave-daq-producer".into())
                .spawn(move || run_producer(source, &shared, poll_interval));
            match handle {
                Ok(handle) => session.producer = Some(handle),
                Err(e) => {
                    session.shared.stop.store(true, Ordering::Release);
                    session.shared.end_production(StateEvent::Stop);
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    /// `Configuring → Running` without a producer thread. The returned callback is the
    /// producer.
    pub fn start_with_callback(&mut self) -> AppResult<FrameCallback> {
        let shared = Arc::clone(&self.configured_session()?.shared);
        self.transition(StateEvent::Start)?;
        self.spawn_consumer()?;
        info!("Acquisition started in callback mode");
        Ok(FrameCallback {
            shared,
            writer: Mutex::new(()),
        })
    }

    fn configured_session(&self) -> AppResult<&Session> {
        match (&self.session, self.state()) {
            (Some(session), AcquisitionState::Configuring) => Ok(session),
            (_, from) => Err(DaqError::InvalidTransition {
                from,
                event: StateEvent::Start,
            }),
        }
    }

    fn spawn_consumer(&mut self) -> AppResult<()> {
        let Some(session) = self.session.as_mut() else {
            return Err(DaqError::Processing("no configured session".into()));
        };
        let stages = std::mem::take(&mut session.stages);
        let shared = Arc::clone(&session.shared);
        let timing = ConsumerTiming {
            poll_interval: session.config.orchestrator.poll_interval,
            drain_timeout: session.config.orchestrator.drain_timeout,
            stats_interval: session.config.orchestrator.stats_interval,
        };
        session.started = Some(Instant::now());
        let handle = thread::Builder::new()
            .name("wave-daq-consumer".into())
            .spawn(move || run_consumer(stages, &shared, timing));
        match handle {
            Ok(handle) => {
                session.consumer = Some(handle);
                Ok(())
            }
            Err(e) => {
                session.shared.stop.store(true, Ordering::Release);
                session.shared.end_production(StateEvent::Stop);
                Err(e.into())
            }
        }
    }

    /// `Running → Paused`: stages stop dispatching; the producer keeps writing.
    pub fn pause(&mut self) -> AppResult<()> {
        self.transition(StateEvent::Pause).map(|_| ())
    }

    /// `Paused → Running`.
    pub fn resume(&mut self) -> AppResult<()> {
        self.transition(StateEvent::Resume).map(|_| ())
    }

    /// Block until the producer has finished (source exhausted or faulted) or `timeout`
    /// expires. Returns whether it finished.
    pub fn wait_until_finished(&self, timeout: Duration) -> bool {
        let Some(session) = &self.session else {
            return true;
        };
        let deadline = Instant::now() + timeout;
        let poll = session.config.orchestrator.poll_interval;
        while !session.shared.producer_done.load(Ordering::Acquire) {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(poll);
        }
        true
    }

    /// `Running/Paused → Stopping → Idle`: stop the producer, drain, join and release.
    ///
    /// Also completes a session the producer already moved to `Stopping`. Returns the
    /// session summary, or the hardware error if a fault ended the session (the summary
    /// is still available from [`last_summary`](Self::last_summary)).
    pub fn stop(&mut self) -> AppResult<SessionSummary> {
        match self.state() {
            AcquisitionState::Running | AcquisitionState::Paused => {
                self.transition(StateEvent::Stop)?;
            }
            AcquisitionState::Stopping => {}
            from => {
                return Err(DaqError::InvalidTransition {
                    from,
                    event: StateEvent::Stop,
                })
            }
        }

        let Some(mut session) = self.session.take() else {
            self.transition(StateEvent::Complete)?;
            return Err(DaqError::Processing("no active session".into()));
        };

        let shared = Arc::clone(&session.shared);
        shared.stop.store(true, Ordering::Release);

        let mut failures = Vec::new();
        match session.producer.take() {
            Some(handle) => {
                if handle.join().is_err() {
                    failures.push(DaqError::Processing("producer thread panicked".into()));
                    shared.producer_done.store(true, Ordering::Release);
                }
            }
            // Callback mode
            None => shared.producer_done.store(true, Ordering::Release),
        }

        let stages = match session.consumer.take().map(JoinHandle::join) {
            Some(Ok(outcome)) => outcome.stages,
            Some(Err(_)) => {
                failures.push(DaqError::Processing("consumer thread panicked".into()));
                Vec::new()
            }
            None => Vec::new(),
        };

        let fault = shared.fault.lock().take();
        let summary = SessionSummary {
            session: session.config.session.name.clone(),
            frames_acquired: shared.frames.load(Ordering::Relaxed),
            stages,
            duration: session.started.map_or(Duration::ZERO, |t| t.elapsed()),
            stats: shared.buffer.get_stats(),
            fault: fault.as_ref().map(ToString::to_string),
        };
        info!(
            session = %summary.session,
            frames = summary.frames_acquired,
            overflow = summary.stats.overflow_count,
            errors = summary.processing_errors(),
            "Acquisition stopped"
        );
        self.last_summary = Some(summary.clone());
        drop(session);
        self.transition(StateEvent::Complete)?;

        if let Some(fault) = fault {
            return Err(DaqError::Hardware(fault));
        }
        if !failures.is_empty() {
            return Err(DaqError::ShutdownFailed(failures));
        }
        Ok(summary)
    }
}

impl Drop for AcquisitionOrchestrator {
    fn drop(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.shared.stop.store(true, Ordering::Release);
            session.shared.producer_done.store(true, Ordering::Release);
            if let Some(handle) = session.producer.take() {
                let _ = handle.join();
            }
            if let Some(handle) = session.consumer.take() {
                let _ = handle.join();
            }
        }
    }
}

fn run_producer(mut source: Box<dyn FrameSource>, shared: &SessionShared, poll_interval: Duration) {
    if let Err(e) = source.open() {
        shared.record_fault(e);
        return;
    }
    info!(source = source.name(), "Producer started");

    let mut frame = vec![0.0; source.channel_count()];
    let mut outcome = None;
    while !shared.stop.load(Ordering::Acquire) {
        match source.poll_frame(&mut frame) {
            Ok(FramePoll::Ready) => {
                shared.frames.fetch_add(1, Ordering::Relaxed);
                shared.buffer.push_frame(&frame);
            }
            Ok(FramePoll::Pending) => thread::sleep(poll_interval),
            Ok(FramePoll::Finished) => {
                info!(
                    frames = shared.frames.load(Ordering::Relaxed),
                    "Source finished"
                );
                break;
            }
            Err(e) => {
                outcome = Some(e);
                break;
            }
        }
    }
    source.close();

    match outcome {
        Some(e) => shared.record_fault(e),
        None => {
            debug!("Producer exiting");
            shared.end_production(StateEvent::Stop);
        }
    }
}

#[derive(Clone, Copy)]
struct ConsumerTiming {
    poll_interval: Duration,
    drain_timeout: Duration,
    stats_interval: Duration,
}

fn run_consumer(
    mut stages: Vec<Box<dyn ProcessingStage>>,
    shared: &SessionShared,
    timing: ConsumerTiming,
) -> ConsumerOutcome {
    let mut summaries: Vec<StageSummary> = stages
        .iter()
        .map(|s| StageSummary {
            stage: s.name().to_string(),
            ..Default::default()
        })
        .collect();
    let mut next_stats = Instant::now() + timing.stats_interval;
    let mut drain_deadline: Option<Instant> = None;
    debug!(stages = stages.len(), "Consumer started");

    loop {
        let draining = shared.producer_done.load(Ordering::Acquire);
        if draining && drain_deadline.is_none() {
            drain_deadline = Some(Instant::now() + timing.drain_timeout);
        }
        let expired = drain_deadline.is_some_and(|d| Instant::now() >= d);

        let mut progressed = false;
        let dispatching = shared.state.lock().is_dispatching();
        if dispatching && !expired {
            for (stage, summary) in stages.iter_mut().zip(summaries.iter_mut()) {
                if let Some(block) = shared
                    .buffer
                    .pop_aligned_block_for(stage.consumer(), stage.block_size())
                {
                    progressed = true;
                    match stage.process(&block) {
                        Ok(event) => {
                            summary.blocks_processed += 1;
                            shared.observers.notify(&event);
                        }
                        Err(e) => {
                            summary.errors += 1;
                            warn!(stage = stage.name(), error = %e, "Block processing failed");
                            shared.observers.notify(&AcquisitionEvent::ProcessingError {
                                stage: stage.name(),
                                message: e.to_string(),
                            });
                        }
                    }
                }
            }
        }

        if Instant::now() >= next_stats {
            shared
                .observers
                .notify(&AcquisitionEvent::Stats(shared.buffer.get_stats()));
            next_stats = Instant::now() + timing.stats_interval;
        }

        if draining && (!progressed || expired) {
            break;
        }
        if !progressed {
            thread::sleep(timing.poll_interval);
        }
    }

    let stats = shared.buffer.get_stats();
    if drain_deadline.is_some_and(|d| Instant::now() >= d) {
        warn!("Drain timeout expired with data still buffered");
    }
    debug!(
        samples_read = stats.samples_read,
        overflow = stats.overflow_count,
        "Consumer finished"
    );
    shared.observers.notify(&AcquisitionEvent::Stats(stats));
    ConsumerOutcome { stages: summaries }
}
