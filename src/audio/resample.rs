// Streaming sample-rate converter for the voice-band pipeline
//
// Output length is driven by an exact integer accumulator over the whole
// stream: after N input frames exactly floor(N * target / source) output
// frames have been produced, so per-block lengths wobble by at most one
// sample and never drift.
//
// Output frame k samples the input at k * source / target minus a fixed
// latency of one kernel half-width, which keeps every kernel tap inside the
// history + current block.

use std::f64::consts::PI;
use tracing::debug;

/// Zero crossings on each side of the windowed-sinc kernel, by quality level.
/// Quality 0 is linear interpolation.
const SINC_ZERO_CROSSINGS: [usize; 4] = [2, 4, 8, 16];

pub const MAX_QUALITY: u8 = 4;

#[derive(Debug, Clone)]
enum Kernel {
    Linear,
    Sinc { half_width: usize, cutoff: f64 },
}

impl Kernel {
    fn for_quality(quality: u8, source_rate: u32, target_rate: u32) -> Self {
        match quality.min(MAX_QUALITY) {
            0 => Kernel::Linear,
            q => {
                // Lowpass at the narrower of the two Nyquist limits; when
                // decimating the kernel widens by the same factor.
                let cutoff = (target_rate as f64 / source_rate as f64).min(1.0);
                let zero_crossings = SINC_ZERO_CROSSINGS[q as usize - 1];
                let half_width = (zero_crossings as f64 / cutoff).ceil() as usize;
                Kernel::Sinc { half_width, cutoff }
            }
        }
    }

    /// Latency in input frames
    fn delay(&self) -> usize {
        match self {
            Kernel::Linear => 1,
            Kernel::Sinc { half_width, .. } => *half_width,
        }
    }

    /// Taps needed on either side of the sampling position
    fn reach(&self) -> usize {
        match self {
            Kernel::Linear => 1,
            Kernel::Sinc { half_width, .. } => *half_width,
        }
    }

    /// Interpolate `samples` at `index + frac`
    fn sample(&self, samples: &[f32], index: i64, frac: f64) -> f32 {
        let at = |i: i64| -> f64 {
            if i < 0 {
                0.0
            } else {
                samples.get(i as usize).copied().unwrap_or(0.0) as f64
            }
        };

        match self {
            Kernel::Linear => (at(index) * (1.0 - frac) + at(index + 1) * frac) as f32,
            Kernel::Sinc { half_width, cutoff } => {
                let hw = *half_width as i64;
                let mut acc = 0.0;
                let mut weight_sum = 0.0;
                for j in (index - hw + 1)..=(index + hw) {
                    let distance = (index - j) as f64 + frac;
                    let weight = cutoff * sinc(cutoff * distance) * blackman(distance / hw as f64);
                    acc += at(j) * weight;
                    weight_sum += weight;
                }
                if weight_sum.abs() > f64::EPSILON {
                    (acc / weight_sum) as f32
                } else {
                    0.0
                }
            }
        }
    }
}

fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-12 {
        1.0
    } else {
        (PI * x).sin() / (PI * x)
    }
}

/// Blackman window over t ∈ [-1, 1]
fn blackman(t: f64) -> f64 {
    if t.abs() >= 1.0 {
        return 0.0;
    }
    0.42 + 0.5 * (PI * t).cos() + 0.08 * (2.0 * PI * t).cos()
}

/// Block-wise resampler carrying fractional position and kernel history
/// across calls.
#[derive(Debug, Clone)]
pub struct Resampler {
    source_rate: u32,
    target_rate: u32,
    channels: usize,
    block_length: usize,
    kernel: Kernel,
    history_len: usize,
    /// Trailing input frames per channel, oldest first
    history: Vec<Vec<f32>>,
    consumed: u64,
    produced: u64,
}

impl Resampler {
    /// Configure a converter from `source_rate` to `target_rate` for
    /// interleaved blocks of `block_length` frames.
    pub fn new(
        source_rate: u32,
        target_rate: u32,
        channel_count: u16,
        block_length: usize,
        quality: u8,
    ) -> Self {
        let source_rate = source_rate.max(1);
        let target_rate = target_rate.max(1);
        let kernel = Kernel::for_quality(quality, source_rate, target_rate);
        let step = (source_rate as f64 / target_rate as f64).ceil() as usize;
        let history_len = step + kernel.delay() + kernel.reach() + 2;
        let channels = channel_count.max(1) as usize;

        debug!(
            "Resampler configured: {}Hz -> {}Hz, {} channel(s), quality {}, {} history frames",
            source_rate, target_rate, channels, quality, history_len
        );

        Self {
            source_rate,
            target_rate,
            channels,
            block_length,
            kernel,
            history_len,
            history: vec![vec![0.0; history_len]; channels],
            consumed: 0,
            produced: 0,
        }
    }

    pub fn source_rate(&self) -> u32 {
        self.source_rate
    }

    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }

    /// Input frames consumed since the last reset
    pub fn frames_in(&self) -> u64 {
        self.consumed
    }

    /// Output frames produced since the last reset
    pub fn frames_out(&self) -> u64 {
        self.produced
    }

    /// Forget all history, as if freshly configured
    pub fn reset(&mut self) {
        for channel in &mut self.history {
            channel.iter_mut().for_each(|s| *s = 0.0);
        }
        self.consumed = 0;
        self.produced = 0;
    }

    /// Convert one interleaved block. A trailing partial frame is ignored.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        let frames = input.len() / self.channels;
        if frames == 0 {
            return Vec::new();
        }

        let total_in = self.consumed + frames as u64;
        let total_out =
            (total_in as u128 * self.target_rate as u128 / self.source_rate as u128) as u64;
        let count = (total_out - self.produced) as usize;

        let mut output = Vec::with_capacity(
            (count * self.channels).max(self.expected_block_output() * self.channels),
        );

        // Global input index of buffer position 0.
        let base = self.consumed as i64 - self.history_len as i64;
        let delay = self.kernel.delay() as i64;

        let buffers: Vec<Vec<f32>> = (0..self.channels)
            .map(|c| {
                let mut buffer = Vec::with_capacity(self.history_len + frames);
                buffer.extend_from_slice(&self.history[c]);
                buffer.extend(input.iter().skip(c).step_by(self.channels).take(frames));
                buffer
            })
            .collect();

        for k in self.produced..total_out {
            let position = k as u128 * self.source_rate as u128;
            let whole = (position / self.target_rate as u128) as i64;
            let frac = (position % self.target_rate as u128) as f64 / self.target_rate as f64;
            let index = whole - delay - base;
            for buffer in &buffers {
                output.push(self.kernel.sample(buffer, index, frac));
            }
        }

        for (history, buffer) in self.history.iter_mut().zip(&buffers) {
            history.clear();
            history.extend_from_slice(&buffer[buffer.len() - self.history_len..]);
        }

        self.consumed = total_in;
        self.produced = total_out;
        output
    }

    fn expected_block_output(&self) -> usize {
        (self.block_length as u64 * self.target_rate as u64 / self.source_rate as u64) as usize + 1
    }
}
