/// Native signal generators exposed to scripts through `require('oscillator')`
/// and `require('wavetable')`.
///
/// Phases are in radians, `[0, TAU)`, so scripts can pass phase offsets
/// computed with `math.pi` directly.

use std::f64::consts::TAU;

/// Waveform types. The discriminants are the values scripts see as
/// `oscillator.wavetype.*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine = 1,
    Square = 2,
    Triangle = 3,
    Saw = 4,
}

impl Waveform {
    pub const ALL: [Waveform; 4] = [
        Waveform::Sine,
        Waveform::Square,
        Waveform::Triangle,
        Waveform::Saw,
    ];

    pub fn from_id(id: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|w| *w as i64 == id)
    }

    pub fn name(self) -> &'static str {
        match self {
            Waveform::Sine => "sine",
            Waveform::Square => "square",
            Waveform::Triangle => "triangle",
            Waveform::Saw => "saw",
        }
    }

    /// Evaluate one cycle of the waveform at `phase` radians.
    pub fn sample(self, phase: f64) -> f64 {
        match self {
            Waveform::Sine => phase.sin(),
            Waveform::Square => {
                let s = phase.sin();
                if s > 0.0 {
                    1.0
                } else if s < 0.0 {
                    -1.0
                } else {
                    0.0
                }
            }
            Waveform::Triangle => {
                let t = phase.rem_euclid(TAU) / TAU;
                2.0 * (2.0 * (t - 0.5)).abs() - 1.0
            }
            Waveform::Saw => {
                let t = phase.rem_euclid(TAU) / TAU;
                2.0 * t - 1.0
            }
        }
    }
}

/// Phase-accumulating oscillator.
#[derive(Debug, Clone)]
pub struct Oscillator {
    waveform: Waveform,
    frequency: f64,
    amplitude: f64,
    phase: f64,
    sample_rate: f64,
    phase_increment: f64,
}

impl Oscillator {
    pub fn new(waveform: Waveform, frequency: f64, amplitude: f64, sample_rate: f64) -> Self {
        let mut osc = Self {
            waveform,
            frequency,
            amplitude,
            phase: 0.0,
            sample_rate: sample_rate.max(1.0),
            phase_increment: 0.0,
        };
        osc.update_increment();
        osc
    }

    fn update_increment(&mut self) {
        self.phase_increment = TAU * self.frequency / self.sample_rate;
    }

    fn advance(&mut self) {
        self.phase = (self.phase + self.phase_increment).rem_euclid(TAU);
    }

    pub fn waveform(&self) -> Waveform {
        self.waveform
    }

    pub fn set_waveform(&mut self, waveform: Waveform) {
        self.waveform = waveform;
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn set_frequency(&mut self, frequency: f64) {
        self.frequency = frequency;
        self.update_increment();
    }

    pub fn set_amplitude(&mut self, amplitude: f64) {
        self.amplitude = amplitude;
    }

    pub fn phase(&self) -> f64 {
        self.phase
    }

    pub fn set_phase(&mut self, phase: f64) {
        self.phase = phase.rem_euclid(TAU);
    }

    pub fn reset(&mut self) {
        self.phase = 0.0;
    }

    /// Current sample, then advance by one sample period.
    pub fn next_value(&mut self) -> f64 {
        let value = self.waveform.sample(self.phase);
        self.advance();
        value * self.amplitude
    }

    /// Sample at an arbitrary phase without touching the oscillator state.
    pub fn value_at_phase(&self, phase: f64) -> f64 {
        self.waveform.sample(phase) * self.amplitude
    }

    /// Current sample offset by `modulation` radians, then advance.
    pub fn next_modulated_value(&mut self, modulation: f64) -> f64 {
        let value = self.waveform.sample(self.phase + modulation);
        self.advance();
        value * self.amplitude
    }
}

/// Single-cycle lookup table with linear interpolation.
#[derive(Debug, Clone)]
pub struct Wavetable {
    data: Vec<f64>,
    phase: f64,
}

impl Wavetable {
    /// Build a table of `length` samples (at least 1) of one waveform cycle.
    pub fn with_waveform(waveform: Waveform, length: usize) -> Self {
        let length = length.max(1);
        let step = TAU / length as f64;
        let data = (0..length).map(|i| waveform.sample(i as f64 * step)).collect();
        Self { data, phase: 0.0 }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn reset(&mut self) {
        self.phase = 0.0;
    }

    /// Interpolated sample at the current phase, then advance the phase for
    /// `frequency` Hz at `sample_rate`.
    pub fn next_value(&mut self, frequency: f64, sample_rate: f64) -> f64 {
        let len = self.data.len();
        let position = self.phase / TAU * len as f64;
        let index = position.floor() as usize;
        let t = position - index as f64;

        if sample_rate > 0.0 {
            self.phase = (self.phase + TAU * frequency / sample_rate).rem_euclid(TAU);
        }

        let a = self.data[index % len];
        let b = self.data[(index + 1) % len];
        a + (b - a) * t
    }
}
