//! Snapshot of the most recent audio block, for visualization.
//!
//! The audio thread calls [`AudioSnapshot::write`] after every successful
//! block. The UI brackets its reads with the busy flag (or holds a
//! [`SnapshotGuard`], which counts itself as a reader); while the flag is
//! set, any guard is alive, or the buffer lock is contended, writes are
//! dropped rather than waited for.

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use rustfft::{num_complex::Complex, Fft, FftPlanner, Length};

#[derive(Debug, Default)]
struct SnapshotData {
    samples: Vec<f32>,
    len: usize,
}

#[derive(Debug, Default)]
pub struct AudioSnapshot {
    busy: AtomicBool,
    readers: AtomicUsize,
    data: Mutex<SnapshotData>,
}

impl AudioSnapshot {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            busy: AtomicBool::new(false),
            readers: AtomicUsize::new(0),
            data: Mutex::new(SnapshotData {
                samples: vec![0.0; capacity],
                len: 0,
            }),
        }
    }

    /// Copy `block` into the snapshot. Returns `false` when the write was
    /// dropped (reader busy, buffer contended, or empty block).
    pub fn write(&self, block: &[f32]) -> bool {
        if block.is_empty() || self.is_busy() {
            return false;
        }
        let mut data = match self.data.try_lock() {
            Ok(data) => data,
            Err(TryLockError::WouldBlock) => return false,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        if block.len() > data.samples.len() {
            data.samples.resize(block.len().next_power_of_two(), 0.0);
        }
        data.samples[..block.len()].copy_from_slice(block);
        data.len = block.len();
        true
    }

    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::Release);
    }

    /// True while the busy flag is set or any guard is alive.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire) || self.readers.load(Ordering::Acquire) > 0
    }

    /// Mark the snapshot busy and borrow its samples until the guard drops.
    pub fn acquire(&self) -> SnapshotGuard<'_> {
        self.readers.fetch_add(1, Ordering::AcqRel);
        let data = self
            .data
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        SnapshotGuard {
            data,
            readers: &self.readers,
        }
    }

    /// Samples in the last accepted block.
    pub fn len(&self) -> usize {
        self.acquire().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.acquire().data.samples.len()
    }

    /// Owned copy of the last accepted block.
    pub fn to_vec(&self) -> Vec<f32> {
        self.acquire().to_vec()
    }
}

/// Read access to the snapshot. The writer drops blocks while this is alive.
pub struct SnapshotGuard<'a> {
    data: MutexGuard<'a, SnapshotData>,
    readers: &'a AtomicUsize,
}

impl Deref for SnapshotGuard<'_> {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        &self.data.samples[..self.data.len]
    }
}

impl Drop for SnapshotGuard<'_> {
    fn drop(&mut self) {
        self.readers.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Magnitude spectrum of a snapshot.
///
/// Input is zero-padded to the next power of two `N`; the result holds the
/// `N / 2` non-negative frequency bins, scaled by `2 / N` so a full-scale
/// sine on a bin centre reads as its amplitude.
pub struct SpectrumAnalyzer {
    planner: FftPlanner<f32>,
    fft: Option<Arc<dyn Fft<f32>>>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    magnitudes: Vec<f32>,
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectrumAnalyzer {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
            fft: None,
            buffer: Vec::new(),
            scratch: Vec::new(),
            magnitudes: Vec::new(),
        }
    }

    /// FFT size used for `len` input samples.
    pub fn fft_size(len: usize) -> usize {
        len.max(1).next_power_of_two()
    }

    pub fn compute(&mut self, samples: &[f32]) -> &[f32] {
        self.magnitudes.clear();
        if samples.is_empty() {
            return &self.magnitudes;
        }

        let n = Self::fft_size(samples.len());
        let fft = match &self.fft {
            Some(fft) if fft.len() == n => fft.clone(),
            _ => {
                let fft = self.planner.plan_fft_forward(n);
                self.scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];
                self.fft = Some(fft.clone());
                fft
            }
        };

        self.buffer.clear();
        self.buffer
            .extend(samples.iter().map(|s| Complex::new(*s, 0.0)));
        self.buffer.resize(n, Complex::new(0.0, 0.0));
        fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        let scale = 2.0 / n as f32;
        self.magnitudes
            .extend(self.buffer[..n / 2].iter().map(|bin| bin.norm() * scale));
        &self.magnitudes
    }

    /// Last computed spectrum.
    pub fn magnitudes(&self) -> &[f32] {
        &self.magnitudes
    }

    /// Index and magnitude of the strongest bin.
    pub fn peak(&self) -> Option<(usize, f32)> {
        self.magnitudes
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }

    /// Centre frequency of `bin` for an FFT of `fft_size` at `sample_rate`.
    pub fn bin_frequency(bin: usize, fft_size: usize, sample_rate: u32) -> f32 {
        bin as f32 * sample_rate as f32 / fft_size.max(1) as f32
    }
}
