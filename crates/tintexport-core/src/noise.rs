//! Gaussian noise synthesis for unrecorded gaps
//!
//! Unit-mode recordings only store samples around threshold crossings. To
//! hand a continuous signal to a sorter, the gaps are filled with samples
//! drawn from a per-channel normal distribution whose parameters are
//! estimated from the real samples.
//!
//! Synthesized noise looks like quiet real signal, so a sorter may still find
//! threshold crossings inside synthesized epochs. The comparator reports
//! those detections separately instead of hiding them.

use rand::Rng;
use serde::Serialize;

use crate::epoch::{Epoch, EpochKind};
use crate::error::{Result, TintError};
use crate::source::Recording;

/// Normal distribution parameters of one channel
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ChannelNoise {
    pub mean: f64,
    pub std_dev: f64,
}

/// Per-channel noise parameters of one tetrode, in channel order
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct NoiseModel {
    pub channels: Vec<ChannelNoise>,
}

/// Running mean and variance (Welford)
#[derive(Debug, Default)]
struct Moments {
    count: u64,
    mean: f64,
    m2: f64,
}

impl Moments {
    fn push(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    fn finish(&self) -> ChannelNoise {
        let std_dev = if self.count > 1 {
            (self.m2 / (self.count - 1) as f64).sqrt()
        } else {
            0.0
        };
        ChannelNoise {
            mean: self.mean,
            std_dev,
        }
    }
}

/// Estimate `(mean, std_dev)` per channel from the samples inside real epochs
///
/// Only `crossing` and `continuous` epochs contribute; gaps carry no data.
pub fn estimate_noise_model(
    recording: &dyn Recording,
    channels: &[usize],
    epochs: &[Epoch],
) -> NoiseModel {
    let real: Vec<&Epoch> = epochs.iter().filter(|e| e.kind.is_real()).collect();

    let channels: Vec<ChannelNoise> = channels
        .iter()
        .map(|&channel| {
            let mut moments = Moments::default();
            for epoch in &real {
                for sample in recording.read(channel, epoch.start_sample, epoch.length_samples as usize)
                {
                    moments.push(sample as f64);
                }
            }
            moments.finish()
        })
        .collect();

    if real.is_empty() {
        tracing::warn!("No real samples to estimate noise from, gaps will be flat");
    }
    tracing::debug!(
        channels = channels.len(),
        real_epochs = real.len(),
        "noise_model_estimated"
    );

    NoiseModel { channels }
}

/// Draw one standard normal sample (Box-Muller)
fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    // 1 - U keeps the logarithm argument in (0, 1]
    let u1 = 1.0 - rng.random::<f64>();
    let u2 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

fn quantize(x: f64) -> i16 {
    x.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16
}

/// Fill a gap epoch with noise, one sample vector per model channel
///
/// On success the epoch is relabelled [`EpochKind::Synthesized`]. The caller
/// owns the random source, so a fixed seed reproduces the same samples.
pub fn synthesize<R: Rng + ?Sized>(
    gap_epoch: &mut Epoch,
    model: &NoiseModel,
    rng: &mut R,
) -> Result<Vec<Vec<i16>>> {
    if gap_epoch.kind != EpochKind::Gap {
        return Err(TintError::InvalidEpoch(format!(
            "cannot synthesize a {} epoch at sample {}",
            gap_epoch.kind, gap_epoch.start_sample
        )));
    }

    let len = gap_epoch.length_samples as usize;
    let samples = model
        .channels
        .iter()
        .map(|noise| {
            (0..len)
                .map(|_| quantize(noise.mean + noise.std_dev * standard_normal(rng)))
                .collect()
        })
        .collect();

    gap_epoch.kind = EpochKind::Synthesized;
    Ok(samples)
}
