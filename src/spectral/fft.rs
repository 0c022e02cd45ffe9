//! Real FFT execution with a bounded plan cache.
//!
//! Planning a transform is far more expensive than executing it, so `realfft` plans are
//! kept in an LRU cache keyed by transform length and direction. Forward transforms map
//! `N` real samples to the `N/2 + 1` one-sided bins; inverse transforms go back.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use num_complex::Complex;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

use super::processor::SpectralError;

/// Direction of a cached transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransformKind {
    /// Real input, one-sided complex output
    RealForward,
    /// One-sided complex input, real output (unnormalised)
    RealInverse,
}

/// Cache key for a transform plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlanKey {
    /// Transform length in real samples
    pub len: usize,
    /// Transform direction
    pub kind: TransformKind,
}

#[derive(Clone)]
enum CachedPlan {
    Forward(Arc<dyn RealToComplex<f64>>),
    Inverse(Arc<dyn ComplexToReal<f64>>),
}

/// Bounded least-recently-used cache of real FFT plans.
pub struct FftPlanCache {
    planner: RealFftPlanner<f64>,
    plans: LruCache<PlanKey, CachedPlan>,
    hits: u64,
    misses: u64,
}

impl std::fmt::Debug for FftPlanCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FftPlanCache")
            .field("len", &self.plans.len())
            .field("capacity", &self.plans.cap())
            .field("hits", &self.hits)
            .field("misses", &self.misses)
            .finish()
    }
}

impl FftPlanCache {
    /// Create a cache holding at most `max_entries` plans (at least one).
    pub fn new(max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            planner: RealFftPlanner::new(),
            plans: LruCache::new(capacity),
            hits: 0,
            misses: 0,
        }
    }

    fn fetch(&mut self, key: PlanKey) -> CachedPlan {
        if let Some(plan) = self.plans.get(&key) {
            self.hits += 1;
            return plan.clone();
        }

        self.misses += 1;
        let plan = match key.kind {
            TransformKind::RealForward => {
                CachedPlan::Forward(self.planner.plan_fft_forward(key.len))
            }
            TransformKind::RealInverse => {
                CachedPlan::Inverse(self.planner.plan_fft_inverse(key.len))
            }
        };
        tracing::debug!(len = key.len, kind = ?key.kind, "Planned FFT");
        self.plans.put(key, plan.clone());
        plan
    }

    /// Forward plan for `len` real samples, planning it on a miss.
    pub fn forward_plan(&mut self, len: usize) -> Arc<dyn RealToComplex<f64>> {
        match self.fetch(PlanKey {
            len,
            kind: TransformKind::RealForward,
        }) {
            CachedPlan::Forward(plan) => plan,
            // Keys carry their direction, so this arm is never cached
            CachedPlan::Inverse(_) => self.planner.plan_fft_forward(len),
        }
    }

    /// Inverse plan producing `len` real samples, planning it on a miss.
    pub fn inverse_plan(&mut self, len: usize) -> Arc<dyn ComplexToReal<f64>> {
        match self.fetch(PlanKey {
            len,
            kind: TransformKind::RealInverse,
        }) {
            CachedPlan::Inverse(plan) => plan,
            CachedPlan::Forward(_) => self.planner.plan_fft_inverse(len),
        }
    }

    /// One-sided spectrum of a real signal: `input.len() / 2 + 1` bins, unnormalised.
    pub fn real_forward(&mut self, input: &[f64]) -> Result<Vec<Complex<f64>>, SpectralError> {
        if input.is_empty() {
            return Ok(Vec::new());
        }
        let plan = self.forward_plan(input.len());
        // realfft uses the input as scratch
        let mut scratch = input.to_vec();
        let mut output = plan.make_output_vec();
        plan.process(&mut scratch, &mut output)
            .map_err(|e| SpectralError::Transform(e.to_string()))?;
        Ok(output)
    }

    /// Real signal of length `n` from its one-sided spectrum (normalised inverse).
    ///
    /// Missing bins are treated as zero. The imaginary parts of the DC and Nyquist bins
    /// are ignored.
    pub fn real_inverse(
        &mut self,
        one_sided: &[Complex<f64>],
        n: usize,
    ) -> Result<Vec<f64>, SpectralError> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let plan = self.inverse_plan(n);
        let mut spectrum = plan.make_input_vec();
        for (slot, value) in spectrum.iter_mut().zip(one_sided) {
            *slot = *value;
        }
        if let Some(dc) = spectrum.first_mut() {
            dc.im = 0.0;
        }
        if n % 2 == 0 {
            if let Some(nyquist) = spectrum.last_mut() {
                nyquist.im = 0.0;
            }
        }

        let mut output = plan.make_output_vec();
        plan.process(&mut spectrum, &mut output)
            .map_err(|e| SpectralError::Transform(e.to_string()))?;
        let scale = 1.0 / n as f64;
        Ok(output.into_iter().map(|x| x * scale).collect())
    }

    /// Cache hits since creation.
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Cache misses (plans created) since creation.
    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Plans currently cached.
    pub fn len(&self) -> usize {
        self.plans.len()
    }

    /// Whether no plans are cached.
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    /// Maximum number of cached plans.
    pub fn capacity(&self) -> usize {
        self.plans.cap().get()
    }
}

impl Default for FftPlanCache {
    fn default() -> Self {
        Self::new(16)
    }
}
