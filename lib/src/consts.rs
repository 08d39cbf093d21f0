use std::ops::RangeInclusive;

/// Name of the RandR output property exposing a hardware backlight.
pub const BACKLIGHT_PROPERTY: &str = "Backlight";

/// An X Color is 16 bits, so a lookup table can never hold more entries than this.
pub const MAX_GAMMA_SIZE: usize = 65536;

/// Smallest table the curve fitter can sample two points from.
pub const MIN_GAMMA_SIZE: usize = 2;

/// Largest value a hardware gamma channel entry can hold.
pub const MAX_CHANNEL_VALUE: u16 = u16::MAX;

/// A sampled reference value below this is treated as a blanked screen.
pub const NEAR_BLACK: f64 = 0.0001;

/// Gamma tables are precomputed per integer percent in `0..=GAMMA_STEPS`.
pub const GAMMA_STEPS: u32 = 100;

/// Name of the synthetic "all monitors" entry in slot 0.
pub const AGGREGATE_NAME: &str = "ALL";

/// Application directory name used when looking up the config file.
pub const APP_NAME: &str = "brightdock";

/// Range of valid values for `step`
pub const STEP_RANGE: RangeInclusive<f64> = 0.001..=1.0;

/// Range of valid values for `gamma_interval_ms`
pub const GAMMA_INTERVAL_RANGE: RangeInclusive<u64> = 10..=2000;
