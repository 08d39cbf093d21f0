#![warn(clippy::match_same_arms)]
#![warn(clippy::semicolon_if_nothing_returned)]
#![warn(clippy::unnecessary_wraps)]
#![cfg_attr(docsrs, feature(doc_cfg))]

#[macro_use]
mod util;
mod applier;
mod backend;
mod config;
mod consts;
mod engine;
mod errors;
mod gamma;
mod method;
mod monitor;
#[cfg(test)]
mod testing;
#[cfg(feature = "watch")]
mod watcher;
mod x11;

use std::sync::Arc;

pub use crate::applier::{ApplyOutcome, GammaApplier};
pub use crate::backend::{
    BackendEvent, ControllerId, DisplayBackend, Geometry, OutputId, OutputInfo, PropertyInfo,
};
pub use crate::config::{EngineConfig, MonitorConfig};
pub use crate::engine::{AGGREGATE, BrightnessEngine};
pub use crate::errors::{BrightdockError, Result};
pub use crate::gamma::{GammaCurve, GammaFit, GammaRamp, GammaTables, fit, generate};
pub use crate::method::{ControlMethod, MethodSet};
pub use crate::monitor::{Monitor, MonitorData, Registry};
#[cfg(feature = "watch")]
#[cfg_attr(docsrs, doc(cfg(feature = "watch")))]
pub use crate::watcher::watch_changes;
pub use crate::x11::X11Backend;

make_log_macro!(debug, "brightdock");

/// Used to construct [`BrightnessEngine`]
#[derive(Default)]
pub struct BrightnessEngineBuilder<'a> {
    display: Option<&'a str>,
    config: Option<EngineConfig>,
    backend: Option<Arc<dyn DisplayBackend>>,
}

impl<'a> BrightnessEngineBuilder<'a> {
    /// Create a new [`BrightnessEngineBuilder`].
    pub fn new() -> Self {
        BrightnessEngineBuilder::default()
    }

    /// X display to connect to. Defaults to `$DISPLAY`.
    pub fn with_display(mut self, display: &'a str) -> Self {
        self.display = Some(display);
        self
    }

    /// Defaults to [`EngineConfig::new()`].
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Defaults to an [`X11Backend`] on the configured display.
    pub fn with_backend(mut self, backend: Arc<dyn DisplayBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Returns the constructed [`BrightnessEngine`] instance.
    pub async fn build(self) -> Result<BrightnessEngine> {
        let config = match self.config {
            Some(config) => config,
            None => EngineConfig::new().await?,
        };
        let backend = match self.backend {
            Some(backend) => backend,
            None => {
                debug!("connecting to {:?}", self.display);
                Arc::new(X11Backend::connect(self.display)?)
            }
        };
        BrightnessEngine::new(backend, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBackend;

    #[tokio::test]
    async fn builder_uses_the_given_backend_and_config() {
        let fake = Arc::new(FakeBackend::new());
        fake.add_output(1, "eDP-1", Some(10), 256);
        fake.add_backlight(1, 0, 100, 40);
        let config = EngineConfig::from_toml("step = 0.1").unwrap();

        let engine = BrightnessEngineBuilder::new()
            .with_config(config)
            .with_backend(fake)
            .build()
            .await
            .unwrap();
        assert_eq!(engine.config().step, 0.1);
        assert_eq!(engine.monitor_count(), 2);
        assert_eq!(engine.get_percent(), 40);
    }
}
