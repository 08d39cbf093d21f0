//! Gamma ramp fitting and generation.
//!
//! A ramp is modelled as a power curve scaled by a brightness factor,
//! `v = i^g * b`, per channel. [`fit`] recovers `g` for each channel and a
//! shared `b` from a live ramp; [`generate`] produces the ramp for a given
//! curve and brightness.

use std::sync::OnceLock;

use crate::consts::*;
use crate::errors::*;

make_log_macro!(debug, "gamma");

/// Per-channel exponents. 1.0 is linear.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GammaCurve {
    pub red: f64,
    pub green: f64,
    pub blue: f64,
}

impl GammaCurve {
    pub const LINEAR: Self = Self::uniform(1.0);

    pub const fn uniform(gamma: f64) -> Self {
        Self {
            red: gamma,
            green: gamma,
            blue: gamma,
        }
    }

    /// The exponents to hand to [`generate`] so that it reproduces a ramp
    /// whose fitted exponents are `self`.
    pub fn correction(&self) -> Self {
        fn invert(gamma: f64) -> f64 {
            if gamma.is_finite() && gamma > 0.0 {
                gamma.recip()
            } else {
                1.0
            }
        }
        Self {
            red: invert(self.red),
            green: invert(self.green),
            blue: invert(self.blue),
        }
    }
}

impl Default for GammaCurve {
    fn default() -> Self {
        Self::LINEAR
    }
}

/// A 3-channel hardware lookup table of 16-bit entries.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GammaRamp {
    pub red: Vec<u16>,
    pub green: Vec<u16>,
    pub blue: Vec<u16>,
}

impl GammaRamp {
    pub fn len(&self) -> usize {
        self.red.len()
    }

    pub fn is_empty(&self) -> bool {
        self.red.is_empty()
    }

    fn channels(&self) -> [&[u16]; 3] {
        [self.red.as_slice(), self.green.as_slice(), self.blue.as_slice()]
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GammaFit {
    pub curve: GammaCurve,
    /// Overall brightness factor, 0.0-1.0.
    pub brightness: f64,
    pub percent: u32,
}

impl GammaFit {
    fn blank() -> Self {
        Self {
            curve: GammaCurve::LINEAR,
            brightness: 0.0,
            percent: 0,
        }
    }
}

/// Index of the last entry below the maximum channel value, 0 if none.
fn last_non_clamped(channel: &[u16]) -> usize {
    (1..channel.len())
        .rev()
        .find(|&i| channel[i] < MAX_CHANNEL_VALUE)
        .unwrap_or(0)
}

fn sample(channel: &[u16], index: usize) -> f64 {
    f64::from(channel[index]) / f64::from(MAX_CHANNEL_VALUE)
}

/// Approximate the curve a ramp was generated with.
///
/// Two samples are taken on the channel with the most unclamped entries, at
/// its last unclamped index and at half of that; they fix the brightness.
/// Each channel's exponent then follows from its own midpoint sample.
pub fn fit(ramp: &GammaRamp) -> Result<GammaFit> {
    let size = ramp.len();
    if size < MIN_GAMMA_SIZE || ramp.green.len() != size || ramp.blue.len() != size {
        return Err(BrightdockError::InvalidGammaSize(size));
    }
    let channels = ramp.channels();
    let lasts = channels.map(last_non_clamped);

    let mut best = 0;
    for c in 1..channels.len() {
        if lasts[c] > lasts[best] {
            best = c;
        }
    }
    let reference = channels[best];
    let last_best = lasts[best].max(1);

    let size_f = size as f64;
    let middle = last_best / 2;
    let i1 = (middle + 1) as f64 / size_f;
    let v1 = sample(reference, middle);
    let i2 = (last_best + 1) as f64 / size_f;
    let v2 = sample(reference, last_best);

    if v2 < NEAR_BLACK {
        debug!("ramp is blank");
        return Ok(GammaFit::blank());
    }

    let brightness = if last_best + 1 == size {
        v2
    } else {
        ((v2.ln() * i1.ln() - v1.ln() * i2.ln()) / (i1 / i2).ln()).exp()
    };

    let exponent = |channel: usize| {
        let last = if channel == best { last_best } else { lasts[channel] };
        let middle = last / 2;
        (sample(channels[channel], middle) / brightness).ln() / ((middle + 1) as f64 / size_f).ln()
    };
    let curve = GammaCurve {
        red: exponent(0),
        green: exponent(1),
        blue: exponent(2),
    };
    debug!(
        "red: {:.3}, green: {:.3}, blue: {:.3}, brightness: {:.3}",
        curve.red, curve.green, curve.blue, brightness
    );

    let brightness = brightness.clamp(0.0, 1.0);
    Ok(GammaFit {
        curve,
        brightness,
        percent: (100.0 * brightness).round() as u32,
    })
}

/// Number of bits values in `[0, size)` are shifted left by so that they
/// occupy the most significant bits of a 16-bit color.
pub fn table_shift(size: usize) -> u32 {
    let bits = usize::BITS - size.saturating_sub(1).leading_zeros();
    16u32.saturating_sub(bits)
}

fn generate_channel(gamma: f64, brightness: f64, size: usize, shift: u32) -> Vec<u16> {
    let gamma = if gamma == 0.0 { 1.0 } else { gamma };
    let exponent = gamma.recip();
    let top = size.saturating_sub(1).max(1) as f64;
    (0..size)
        .map(|i| {
            let value = if gamma == 1.0 && brightness == 1.0 {
                i as f64
            } else {
                ((i as f64 / top).powf(exponent) * brightness).min(1.0) * top
            };
            u16::try_from((value.round() as u32) << shift).unwrap_or(u16::MAX)
        })
        .collect()
}

/// Build the ramp for `curve` at `brightness` (0.0-1.0) with `size` entries.
///
/// Each channel is `min((i / (size - 1))^(1/g) * brightness, 1) * (size - 1)`,
/// packed into the high bits of the 16-bit entry. A linear curve at full
/// brightness is the exact identity. Hardware tables have at most 65536
/// entries; beyond that, entries saturate at `0xFFFF`.
pub fn generate(curve: &GammaCurve, brightness: f64, size: usize) -> GammaRamp {
    let brightness = brightness.clamp(0.0, 1.0);
    let shift = table_shift(size);
    GammaRamp {
        red: generate_channel(curve.red, brightness, size, shift),
        green: generate_channel(curve.green, brightness, size, shift),
        blue: generate_channel(curve.blue, brightness, size, shift),
    }
}

/// Ramps for every integer percent of one fitted curve, each generated on
/// first use.
#[derive(Debug)]
pub struct GammaTables {
    curve: GammaCurve,
    size: usize,
    levels: Vec<OnceLock<GammaRamp>>,
}

impl GammaTables {
    /// `curve` is a fitted curve, as returned by [`fit`].
    pub fn new(curve: GammaCurve, size: usize) -> Self {
        Self {
            curve,
            size,
            levels: (0..=GAMMA_STEPS).map(|_| OnceLock::new()).collect(),
        }
    }

    pub fn curve(&self) -> GammaCurve {
        self.curve
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn get(&self, percent: u32) -> &GammaRamp {
        let percent = percent.min(GAMMA_STEPS);
        self.levels[percent as usize].get_or_init(|| {
            generate(
                &self.curve.correction(),
                f64::from(percent) / f64::from(GAMMA_STEPS),
                self.size,
            )
        })
    }

    pub fn generated(&self) -> usize {
        self.levels.iter().filter(|level| level.get().is_some()).count()
    }
}
