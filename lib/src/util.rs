use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;
use tokio::io::AsyncReadExt as _;

use crate::consts::APP_NAME;
use crate::errors::*;

macro_rules! make_log_macro {
    (@wdoll $macro_name:ident, $block_name:literal, ($dol:tt)) => {
        #[allow(unused_macros)]
        macro_rules! $macro_name {
            ($dol($args:tt)+) => {
                ::log::$macro_name!(target: $block_name, $dol($args)+);
            };
        }
    };
    ($macro_name:ident, $block_name:literal) => {
        make_log_macro!(@wdoll $macro_name, $block_name, ($));
    };
}

/// Look for `file` (with an optional `extension`) in the user's config
/// directory for this application, then in `~/.brightdock`.
pub fn find_file(file: &str, subdir: Option<&str>, extension: Option<&str>) -> Option<PathBuf> {
    let mut file = PathBuf::from(file);
    if let Some(extension) = extension {
        file.set_extension(extension);
    }

    let roots = [
        dirs::config_dir().map(|dir| dir.join(APP_NAME)),
        dirs::home_dir().map(|dir| dir.join(format!(".{APP_NAME}"))),
    ];

    roots.into_iter().flatten().find_map(|root| {
        let root = match subdir {
            Some(subdir) => root.join(subdir),
            None => root,
        };
        let candidate = root.join(&file);
        candidate.is_file().then_some(candidate)
    })
}

pub async fn deserialize_toml_file<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();

    let contents = read_file(path).await?;

    deserialize_toml_str(&contents).map_err(|err| {
        BrightdockError::Other(format!("Failed to deserialize TOML file {}: {err}", path.display()))
    })
}

pub async fn read_file(path: impl AsRef<Path>) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).await?;
    Ok(contents)
}

pub fn deserialize_toml_str<T: DeserializeOwned>(contents: &str) -> Result<T> {
    toml::from_str(contents).map_err(|err| {
        let location_msg = err
            .span()
            .map(|span| {
                let line = 1 + contents.as_bytes()[..(span.start)]
                    .iter()
                    .filter(|b| **b == b'\n')
                    .count();
                format!(" at line {line}")
            })
            .unwrap_or_default();
        BrightdockError::Other(format!("{}{}", err.message(), location_msg))
    })
}

/// Rescale a raw hardware value in `[min, max]` to 0.0-1.0.
pub fn normalise(raw: u32, min: u32, max: u32) -> f64 {
    if max <= min {
        return 0.0;
    }
    let raw = raw.clamp(min, max);
    f64::from(raw - min) / f64::from(max - min)
}

/// Map a 0.0-1.0 level back onto the raw hardware range `[min, max]`.
pub fn denormalise(level: f64, min: u32, max: u32) -> u32 {
    if max <= min {
        return min;
    }
    let span = f64::from(max - min);
    let raw = (f64::from(min) + level.clamp(0.0, 1.0) * span).round();
    (raw as u32).clamp(min, max)
}

/// Integer percentage of a 0.0-1.0 level.
pub fn to_percent(level: f64) -> u32 {
    (level.clamp(0.0, 1.0) * 100.0).round() as u32
}

/// Lock a mutex, recovering the data if a previous holder panicked.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
