use std::sync::Arc;

use regex::Regex;

use crate::backend::*;
use crate::config::EngineConfig;
use crate::errors::*;
use crate::method::ControlMethod;
use crate::monitor::{MonitorData, Registry};
use crate::util::to_percent;

make_log_macro!(debug, "engine");
make_log_macro!(info, "engine");
make_log_macro!(warn, "engine");

/// Index of the synthetic "all monitors" entry.
pub const AGGREGATE: usize = 0;

/// Per-monitor brightness state and the operations a user interface drives
/// it with.
///
/// Slot [`AGGREGATE`] stands for every monitor at once. Relative changes on
/// it accumulate in a session-wide offset that is only folded into each
/// monitor's own level by [`unready`](Self::unready).
///
/// The engine is meant to be driven from a single thread; only gamma writes
/// happen in the background.
pub struct BrightnessEngine {
    backend: Arc<dyn DisplayBackend>,
    config: EngineConfig,
    registry: Registry,
    current: usize,
    global_offset: f64,
    needs_update: bool,
}

impl BrightnessEngine {
    pub fn new(backend: Arc<dyn DisplayBackend>, config: EngineConfig) -> Result<Self> {
        let registry = Registry::build(backend.as_ref(), &config)?;
        let mut engine = Self {
            backend,
            config,
            registry,
            current: AGGREGATE,
            global_offset: 0.0,
            needs_update: true,
        };
        engine.refresh_state();
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn global_offset(&self) -> f64 {
        self.global_offset
    }

    /// Monitors that take part in aggregate operations.
    fn controlled(&self) -> impl Iterator<Item = &MonitorData> {
        self.registry
            .data()
            .iter()
            .filter(|data| data.current_method() != ControlMethod::None)
    }

    fn resolve(&self, monitor: Option<usize>) -> usize {
        monitor.unwrap_or(self.current)
    }

    fn average_level(&self) -> f64 {
        let (total, count) = self
            .controlled()
            .fold((0.0, 0usize), |(total, count), data| {
                (total + data.actual_level(self.global_offset), count + 1)
            });
        if count == 0 { 0.0 } else { total / count as f64 }
    }

    /// Level of `monitor` (the selected one if `None`), in 0.0-1.0.
    ///
    /// The aggregate reports the mean over every controller-bearing monitor,
    /// counting clones once. Monitors whose method is
    /// [`ControlMethod::None`] have no level and are left out, as they are
    /// from [`max_increase`](Self::max_increase) and
    /// [`max_decrease`](Self::max_decrease).
    pub fn get_level(&self, monitor: Option<usize>) -> f64 {
        let index = self.resolve(monitor);
        if index == AGGREGATE {
            return self.average_level();
        }
        match self.registry.data_of(index) {
            Some(data) => data.actual_level(self.global_offset),
            None => {
                debug!("no monitor {}", index);
                0.0
            }
        }
    }

    pub fn get_percent(&self) -> u32 {
        to_percent(self.get_level(None))
    }

    /// Headroom left for a uniform increase of every monitor.
    pub fn max_increase(&self) -> f64 {
        self.controlled()
            .map(|data| 1.0 - data.actual_level(self.global_offset))
            .reduce(f64::min)
            .unwrap_or(0.0)
    }

    /// Headroom left for a uniform decrease of every monitor.
    pub fn max_decrease(&self) -> f64 {
        self.controlled()
            .map(|data| data.actual_level(self.global_offset))
            .reduce(f64::min)
            .unwrap_or(0.0)
    }

    /// Set the selected monitor to `level`. Not valid on the aggregate.
    pub fn set_level(&mut self, level: f64) -> bool {
        debug_assert!((0.0..=1.0).contains(&level), "level {level} out of range");
        let Some(data) = self.registry.data_index(self.current) else {
            warn!("an absolute level can not be set on all monitors at once");
            return false;
        };
        self.registry.data_mut()[data].set_normalised(level);
        self.apply();
        true
    }

    /// Shift the selected monitor by `delta`. On the aggregate, the shift is
    /// limited so that no monitor leaves 0.0-1.0 and kept in the session
    /// offset.
    pub fn set_level_relative(&mut self, delta: f64) {
        match self.registry.data_index(self.current) {
            Some(data) => {
                let data = &mut self.registry.data_mut()[data];
                let level = data.normalised_level(data.current_method()) + delta;
                data.set_normalised(level);
            }
            None => {
                let delta = if delta > 0.0 {
                    delta.min(self.max_increase())
                } else if delta < 0.0 {
                    delta.max(-self.max_decrease())
                } else {
                    0.0
                };
                self.global_offset += delta;
                debug!("global offset {:.3}", self.global_offset);
            }
        }
        self.apply();
    }

    /// Start an adjustment session on the aggregate.
    pub fn ready(&mut self) {
        if self.current == AGGREGATE {
            self.global_offset = 0.0;
        }
    }

    /// End an adjustment session on the aggregate, folding the offset into
    /// every monitor's own level.
    pub fn unready(&mut self) {
        if self.current != AGGREGATE {
            return;
        }
        let offset = self.global_offset;
        for data in self.registry.data_mut() {
            if data.current_method() != ControlMethod::None {
                let level = data.actual_level(offset);
                data.set_normalised(level);
            }
        }
        self.global_offset = 0.0;
    }

    /// Switch the selected monitor to `method`. On the aggregate, every
    /// monitor supporting it is switched; true if any was.
    pub fn set_method(&mut self, method: ControlMethod) -> bool {
        let indices: Vec<usize> = match self.registry.data_index(self.current) {
            Some(data) => vec![data],
            None => (0..self.registry.data().len()).collect(),
        };
        let mut switched = false;
        for index in indices {
            let data = &mut self.registry.data_mut()[index];
            if data.supports(method) {
                data.current_method = method;
                switched = true;
            }
        }
        if switched {
            info!("{} selected on {}", method, self.monitor_name(None));
        }
        switched
    }

    /// Re-read levels from the hardware if something changed since last time.
    /// Returns whether anything was read.
    pub fn refresh_state(&mut self) -> bool {
        if !self.needs_update {
            return false;
        }
        self.needs_update = false;
        for data in self.registry.data_mut() {
            data.refresh(self.backend.as_ref());
        }
        true
    }

    /// Note an external change; the next [`refresh_state`](Self::refresh_state) reads the hardware.
    pub fn mark_dirty(&mut self) {
        self.needs_update = true;
    }

    /// Handle pending backend notifications and report whether the state
    /// changed since the last call.
    pub async fn is_changed(&mut self) -> bool {
        let events = match self.backend.poll_events() {
            Ok(events) => events,
            Err(e) => {
                warn!("failed to poll display events: {}", e);
                Vec::new()
            }
        };
        if events.contains(&BackendEvent::Topology) {
            if let Err(e) = self.rebuild().await {
                warn!("failed to rebuild monitor list: {}", e);
            }
            return true;
        }
        if !events.is_empty() {
            self.mark_dirty();
        }
        self.refresh_state()
    }

    /// Enumerate the monitors again after a topology change.
    ///
    /// Every gamma worker is stopped and joined before the old state is
    /// released and the backend is queried again.
    pub async fn rebuild(&mut self) -> Result<()> {
        info!("rebuilding monitor list");
        self.registry.teardown().await;
        self.registry = Registry::empty();
        self.global_offset = 0.0;
        self.registry = Registry::build(self.backend.as_ref(), &self.config)?;
        if self.current >= self.registry.len() {
            self.current = AGGREGATE;
        }
        self.needs_update = true;
        self.refresh_state();
        Ok(())
    }

    /// Wait until every gamma worker has reached its target.
    pub async fn settle(&mut self) {
        for data in self.registry.data_mut() {
            data.applier.wait().await;
        }
    }

    fn apply(&mut self) {
        let offset = self.global_offset;
        let backend = &self.backend;
        match self.registry.data_index(self.current) {
            Some(data) => self.registry.data_mut()[data].write(backend, offset),
            None => {
                for data in self.registry.data_mut() {
                    data.write(backend, offset);
                }
            }
        }
    }

    /// Move the selection by `delta`, wrapping around in both directions.
    pub fn select_monitor_relative(&mut self, delta: i32) {
        let count = self.registry.len() as i64;
        self.current = (self.current as i64 + i64::from(delta)).rem_euclid(count) as usize;
    }

    /// Select the first monitor whose name matches `pattern`.
    pub fn select_monitor_matching(&mut self, pattern: &str) -> Result<usize> {
        let regex = Regex::new(pattern)?;
        let index = self
            .registry
            .monitors()
            .iter()
            .position(|monitor| regex.is_match(&monitor.name))
            .ok_or_else(|| BrightdockError::NoMatchingMonitor(pattern.to_string()))?;
        self.current = index;
        Ok(index)
    }

    pub fn current_monitor(&self) -> usize {
        self.current
    }

    /// Number of entries, the aggregate included.
    pub fn monitor_count(&self) -> usize {
        self.registry.len()
    }

    pub fn monitor_name(&self, monitor: Option<usize>) -> &str {
        self.registry
            .monitor(self.resolve(monitor))
            .map_or("", |monitor| monitor.name.as_str())
    }

    pub fn dimensions(&self, monitor: Option<usize>) -> Option<Geometry> {
        Some(self.registry.data_of(self.resolve(monitor))?.dimensions())
    }

    /// Active method of `monitor`; `None` for the aggregate.
    pub fn method(&self, monitor: Option<usize>) -> Option<ControlMethod> {
        Some(self.registry.data_of(self.resolve(monitor))?.current_method())
    }

    /// Whether `monitor` supports `method`. The aggregate supports what any
    /// monitor supports.
    pub fn supports(&self, monitor: Option<usize>, method: ControlMethod) -> bool {
        let index = self.resolve(monitor);
        if index == AGGREGATE {
            self.registry.data().iter().any(|data| data.supports(method))
        } else {
            self.registry
                .data_of(index)
                .is_some_and(|data| data.supports(method))
        }
    }

    fn data_by_controller(&self, controller: ControllerId) -> Option<&MonitorData> {
        self.registry
            .data()
            .iter()
            .find(|data| data.controller() == controller)
    }

    pub fn level_by_controller(&self, controller: ControllerId) -> Option<f64> {
        self.data_by_controller(controller)
            .map(|data| data.actual_level(self.global_offset))
    }

    pub fn method_by_controller(&self, controller: ControllerId) -> Option<ControlMethod> {
        self.data_by_controller(controller)
            .map(MonitorData::current_method)
    }
}
