use std::sync::Arc;

use crate::applier::GammaApplier;
use crate::backend::*;
use crate::config::{EngineConfig, MonitorConfig};
use crate::consts::*;
use crate::errors::*;
use crate::gamma::{GammaCurve, GammaTables, fit};
use crate::method::{ControlMethod, MethodSet, PerMethod};
use crate::util::*;

make_log_macro!(debug, "registry");
make_log_macro!(info, "registry");
make_log_macro!(warn, "registry");

/// State of one controller, shared by every output it drives.
pub struct MonitorData {
    pub(crate) controller: ControllerId,
    pub(crate) output: OutputId,
    pub(crate) supported: MethodSet,
    pub(crate) current_method: ControlMethod,
    pub(crate) min: PerMethod<u32>,
    pub(crate) max: PerMethod<u32>,
    pub(crate) level: PerMethod<u32>,
    pub(crate) normalised: PerMethod<f64>,
    pub(crate) gamma_size: usize,
    pub(crate) tables: Arc<GammaTables>,
    pub(crate) applier: GammaApplier,
    pub(crate) dimensions: Geometry,
}

impl MonitorData {
    fn probe(backend: &dyn DisplayBackend, output: &OutputInfo, controller: ControllerId, config: &MonitorConfig) -> Self {
        let mut supported = MethodSet::new();
        let mut min = PerMethod::default();
        let mut max = PerMethod::default();
        let mut level = PerMethod::default();

        if let Some((lo, hi, current)) = probe_backlight(backend, output) {
            supported.insert(ControlMethod::Backlight);
            min[ControlMethod::Backlight] = lo;
            max[ControlMethod::Backlight] = hi;
            level[ControlMethod::Backlight] = current.clamp(lo, hi);
        }

        let gamma_size = probe_gamma(backend, &output.name, controller).unwrap_or(0);
        if gamma_size > 0 {
            supported.insert(ControlMethod::Gamma);
            max[ControlMethod::Gamma] = GAMMA_STEPS;
        }

        let current_method = match config.method {
            Some(method) if supported.contains(method) => method,
            Some(method) => {
                warn!("{}: configured method {} is not supported", output.name, method);
                supported.preferred()
            }
            None => supported.preferred(),
        };

        let dimensions = backend.geometry(controller).unwrap_or_else(|e| {
            warn!("{}: failed to get geometry: {}", output.name, e);
            Geometry::default()
        });

        let tables = Arc::new(GammaTables::new(GammaCurve::LINEAR, gamma_size));
        let mut normalised = PerMethod::default();
        for method in supported.iter() {
            normalised[method] = normalise(level[method], min[method], max[method]);
        }

        info!(
            "{}: {:?}, using {}",
            output.name, supported, current_method
        );

        Self {
            controller,
            output: output.id,
            supported,
            current_method,
            min,
            max,
            level,
            normalised,
            gamma_size,
            applier: GammaApplier::new(controller, Arc::clone(&tables), config.gamma_interval()),
            tables,
            dimensions,
        }
    }

    /// `normalised_level[current_method]` shifted by `offset`, clamped to 0.0-1.0.
    pub fn actual_level(&self, offset: f64) -> f64 {
        (self.normalised[self.current_method] + offset).clamp(0.0, 1.0)
    }

    pub fn normalised_level(&self, method: ControlMethod) -> f64 {
        self.normalised[method]
    }

    pub fn current_method(&self) -> ControlMethod {
        self.current_method
    }

    pub fn supports(&self, method: ControlMethod) -> bool {
        self.supported.contains(method)
    }

    pub fn controller(&self) -> ControllerId {
        self.controller
    }

    pub fn dimensions(&self) -> Geometry {
        self.dimensions
    }

    pub fn gamma_curve(&self) -> GammaCurve {
        self.tables.curve()
    }

    pub(crate) fn set_normalised(&mut self, level: f64) {
        let method = self.current_method;
        self.normalised[method] = level.clamp(0.0, 1.0);
    }

    /// Push `actual_level(offset)` to the hardware through the current method.
    pub(crate) fn write(&mut self, backend: &Arc<dyn DisplayBackend>, offset: f64) {
        let method = self.current_method;
        let actual = self.actual_level(offset);
        match method {
            ControlMethod::None => {}
            ControlMethod::Backlight => {
                let raw = denormalise(actual, self.min[method], self.max[method]);
                match backend.set_output_property(self.output, BACKLIGHT_PROPERTY, raw) {
                    Ok(()) => self.level[method] = raw,
                    Err(e) => {
                        warn!("{}: failed to set backlight: {}", self.output, e);
                    }
                }
            }
            ControlMethod::Gamma => {
                let percent = to_percent(actual);
                self.level[method] = percent;
                let outcome = self.applier.request(backend, percent, &self.tables);
                debug!("{}: gamma {}%: {:?}", self.controller, percent, outcome);
            }
        }
    }

    /// Re-read the hardware state of every supported method.
    pub(crate) fn refresh(&mut self, backend: &dyn DisplayBackend) {
        if self.supports(ControlMethod::Backlight) {
            let method = ControlMethod::Backlight;
            match backend.output_property(self.output, BACKLIGHT_PROPERTY) {
                Ok(raw) => {
                    self.level[method] = raw.clamp(self.min[method], self.max[method]);
                    self.normalised[method] =
                        normalise(self.level[method], self.min[method], self.max[method]);
                }
                Err(e) => {
                    warn!("{}: failed to read backlight: {}", self.output, e);
                }
            }
        }

        if self.supports(ControlMethod::Gamma) {
            self.refresh_gamma(backend);
        }
    }

    /// Take over the level of the ramp on the hardware. The curve is only
    /// fitted again when the ramp is not the one last written from it.
    fn refresh_gamma(&mut self, backend: &dyn DisplayBackend) {
        if self.applier.is_running() {
            debug!("{}: gamma worker busy, not refitting", self.controller);
            return;
        }
        let ramp = match backend.gamma(self.controller) {
            Ok(ramp) => ramp,
            Err(e) => {
                warn!("{}: failed to read gamma: {}", self.controller, e);
                return;
            }
        };

        let percent = match self.applier.last_applied() {
            Some(percent) if ramp == *self.tables.get(percent) => percent,
            _ => match fit(&ramp) {
                Ok(fitted) => {
                    if fitted.curve != self.tables.curve() {
                        debug!("{}: new curve {:?}", self.controller, fitted.curve);
                        self.tables = Arc::new(GammaTables::new(fitted.curve, self.gamma_size));
                    }
                    self.applier.sync_applied(fitted.percent);
                    fitted.percent
                }
                Err(e) => {
                    warn!("{}: failed to fit gamma: {}", self.controller, e);
                    return;
                }
            },
        };
        self.level[ControlMethod::Gamma] = percent;
        self.normalised[ControlMethod::Gamma] = f64::from(percent) / f64::from(GAMMA_STEPS);
    }

    pub(crate) async fn stop(&mut self) {
        self.applier.stop().await;
    }
}

/// Find the backlight property and check it is a 2-value integer range.
fn probe_backlight(backend: &dyn DisplayBackend, output: &OutputInfo) -> Option<(u32, u32, u32)> {
    let info = match backend.output_property_info(output.id, BACKLIGHT_PROPERTY) {
        Ok(Some(info)) => info,
        Ok(None) => return None,
        Err(e) => {
            warn!("{}: failed to query backlight: {}", output.name, e);
            return None;
        }
    };
    let (lo, hi) = match info.values.as_slice() {
        [lo, hi] if info.range && 0 <= *lo && lo < hi => (*lo as u32, *hi as u32),
        _ => {
            warn!(
                "{}: has backlight support but its settings were not understood: {:?}",
                output.name, info
            );
            return None;
        }
    };
    match backend.output_property(output.id, BACKLIGHT_PROPERTY) {
        Ok(current) => {
            debug!("{}: backlight range ({}, {}), current {}", output.name, lo, hi, current);
            Some((lo, hi, current))
        }
        Err(e) => {
            warn!("{}: failed to read backlight: {}", output.name, e);
            None
        }
    }
}

fn probe_gamma(backend: &dyn DisplayBackend, name: &str, controller: ControllerId) -> Option<usize> {
    let size = match backend.gamma_size(controller) {
        Ok(size) => size,
        Err(e) => {
            warn!("{}: failed to get gamma size: {}", name, e);
            return None;
        }
    };
    debug!("{}: gamma size {}", name, size);
    if size < MIN_GAMMA_SIZE {
        warn!("{}: gamma size is {}", name, size);
        None
    } else if size > MAX_GAMMA_SIZE {
        warn!("{}: gamma correction table is impossibly large ({})", name, size);
        None
    } else {
        Some(size)
    }
}

/// One entry per output. Clones point at the same [`MonitorData`].
#[derive(Debug, Clone)]
pub struct Monitor {
    pub name: String,
    /// Index into the registry's data; `None` for the aggregate entry.
    pub(crate) data: Option<usize>,
    pub is_clone: bool,
}

impl Monitor {
    fn aggregate() -> Self {
        Self {
            name: AGGREGATE_NAME.to_string(),
            data: None,
            is_clone: false,
        }
    }
}

/// Every active output, behind a synthetic "all monitors" entry in slot 0.
pub struct Registry {
    monitors: Vec<Monitor>,
    data: Vec<MonitorData>,
}

impl Registry {
    pub fn empty() -> Self {
        Self {
            monitors: vec![Monitor::aggregate()],
            data: Vec::new(),
        }
    }

    pub fn build(backend: &dyn DisplayBackend, config: &EngineConfig) -> Result<Self> {
        let outputs = backend.outputs()?;
        let active = outputs
            .iter()
            .filter_map(|output| output.controller.map(|controller| (output, controller)));

        let mut registry = Self::empty();
        for (output, controller) in active {
            let shared = registry.data.iter().position(|data| {
                data.controller == controller || output.clones.contains(&data.output)
            });
            let (data, is_clone) = match shared {
                Some(index) => {
                    debug!("{} is a clone of {}", output.name, registry.data[index].output);
                    (index, true)
                }
                None => {
                    let data = MonitorData::probe(
                        backend,
                        output,
                        controller,
                        config.monitor_config(&output.name),
                    );
                    registry.data.push(data);
                    (registry.data.len() - 1, false)
                }
            };
            registry.monitors.push(Monitor {
                name: output.name.clone(),
                data: Some(data),
                is_clone,
            });
        }
        info!("found {} active output(s)", registry.monitors.len() - 1);
        Ok(registry)
    }

    /// Stop every gamma worker and wait for each to exit.
    pub async fn teardown(&mut self) {
        for data in &mut self.data {
            data.stop().await;
        }
    }

    pub fn monitors(&self) -> &[Monitor] {
        &self.monitors
    }

    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn monitor(&self, index: usize) -> Option<&Monitor> {
        self.monitors.get(index)
    }

    /// The data behind monitor `index`, `None` for the aggregate.
    pub fn data_of(&self, index: usize) -> Option<&MonitorData> {
        self.monitor(index)?.data.map(|data| &self.data[data])
    }

    pub(crate) fn data_index(&self, index: usize) -> Option<usize> {
        self.monitor(index)?.data
    }

    /// One entry per controller; clones are not repeated.
    pub fn data(&self) -> &[MonitorData] {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut [MonitorData] {
        &mut self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBackend;

    fn build(fake: &FakeBackend) -> Registry {
        Registry::build(fake, &EngineConfig::default()).unwrap()
    }

    #[test]
    fn aggregate_entry_comes_first() {
        let fake = FakeBackend::new();
        fake.add_output(1, "eDP-1", Some(10), 256);
        fake.add_output(2, "HDMI-1", None, 0);
        let registry = build(&fake);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.monitors()[0].name, AGGREGATE_NAME);
        assert!(registry.data_of(0).is_none());
        assert_eq!(registry.monitors()[1].name, "eDP-1");
    }

    #[test]
    fn backlight_is_the_default_method() {
        let fake = FakeBackend::new();
        fake.add_output(1, "eDP-1", Some(10), 256);
        fake.add_backlight(1, 0, 1000, 250);
        let registry = build(&fake);
        let data = registry.data_of(1).unwrap();
        assert!(data.supports(ControlMethod::Backlight));
        assert!(data.supports(ControlMethod::Gamma));
        assert_eq!(data.current_method(), ControlMethod::Backlight);
        assert_eq!(data.normalised_level(ControlMethod::Backlight), 0.25);
        assert_eq!(data.dimensions().width, 1920);
    }

    #[test]
    fn configured_method_wins_when_supported() {
        let fake = FakeBackend::new();
        fake.add_output(1, "eDP-1", Some(10), 256);
        fake.add_backlight(1, 0, 1000, 250);
        let config = EngineConfig::from_toml("[eDP-1]\nmethod = \"gamma\"").unwrap();
        let registry = Registry::build(&fake, &config).unwrap();
        assert_eq!(registry.data_of(1).unwrap().current_method(), ControlMethod::Gamma);
    }

    #[test]
    fn malformed_backlight_is_unsupported() {
        let fake = FakeBackend::new();
        fake.add_output(1, "eDP-1", Some(10), 256);
        fake.add_backlight_property(
            1,
            PropertyInfo {
                range: false,
                values: vec![0, 1, 2],
            },
            1,
        );
        let registry = build(&fake);
        let data = registry.data_of(1).unwrap();
        assert!(!data.supports(ControlMethod::Backlight));
        assert_eq!(data.current_method(), ControlMethod::Gamma);
    }

    #[test]
    fn backlight_failures_keep_the_last_known_level() {
        let fake = Arc::new(FakeBackend::new());
        fake.add_output(1, "eDP-1", Some(10), 0);
        fake.add_backlight(1, 0, 1000, 250);
        let mut registry = build(&fake);
        fake.remove_backlight(1);
        let backend: Arc<dyn DisplayBackend> = fake.clone();

        let data = &mut registry.data_mut()[0];
        data.refresh(backend.as_ref());
        assert_eq!(data.normalised_level(ControlMethod::Backlight), 0.25);

        data.set_normalised(0.5);
        data.write(&backend, 0.0);
        assert_eq!(data.level[ControlMethod::Backlight], 250);
    }

    #[test]
    fn unusable_gamma_sizes_are_unsupported() {
        let fake = FakeBackend::new();
        fake.add_output(1, "DP-1", Some(10), 0);
        fake.add_output(2, "DP-2", Some(11), 65537);
        fake.add_output(3, "DP-3", Some(12), 1);
        let registry = build(&fake);
        for index in 1..=3 {
            let data = registry.data_of(index).unwrap();
            assert!(!data.supports(ControlMethod::Gamma));
            assert_eq!(data.current_method(), ControlMethod::None);
        }
    }

    #[test]
    fn clones_share_data_and_are_not_probed() {
        let fake = FakeBackend::new();
        fake.add_output(1, "eDP-1", Some(10), 256);
        fake.add_output(2, "DP-1", Some(11), 256);
        fake.set_clones(2, &[1]);
        fake.add_output(3, "DP-2", Some(10), 256);
        fake.clear_calls();

        let registry = build(&fake);
        assert_eq!(registry.len(), 4);
        assert_eq!(registry.data().len(), 1);
        assert!(!registry.monitors()[1].is_clone);
        assert!(registry.monitors()[2].is_clone);
        assert!(registry.monitors()[3].is_clone);
        assert_eq!(registry.data_index(2), registry.data_index(1));
        assert_eq!(registry.data_index(3), registry.data_index(1));

        let probed: Vec<_> = fake
            .calls()
            .into_iter()
            .filter(|call| matches!(call, crate::testing::Call::GammaSize(_)))
            .collect();
        assert_eq!(probed.len(), 1);
    }
}
