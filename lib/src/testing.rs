//! In-memory display backend for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::backend::*;
use crate::consts::BACKLIGHT_PROPERTY;
use crate::errors::*;
use crate::gamma::{GammaCurve, GammaRamp, generate};
use crate::util::lock;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Outputs,
    GetProperty(OutputId),
    SetProperty(OutputId, u32),
    GammaSize(ControllerId),
    GetGamma(ControllerId),
    SetGamma(ControllerId),
}

struct Controller {
    gamma_size: usize,
    ramp: GammaRamp,
    geometry: Geometry,
}

#[derive(Default)]
struct State {
    outputs: Vec<OutputInfo>,
    backlights: HashMap<OutputId, (PropertyInfo, u32)>,
    controllers: HashMap<ControllerId, Controller>,
    events: Vec<BackendEvent>,
    calls: Vec<Call>,
    gamma_writes: HashMap<ControllerId, Vec<GammaRamp>>,
    fail_gamma_writes: bool,
    gamma_delay: Duration,
}

#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<State>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an output, driven by `controller` if given. A controller seen for
    /// the first time gets a linear ramp of `gamma_size` entries.
    pub fn add_output(&self, id: u32, name: &str, controller: Option<u32>, gamma_size: usize) {
        let mut state = lock(&self.state);
        let controller = controller.map(ControllerId);
        if let Some(controller) = controller {
            state.controllers.entry(controller).or_insert_with(|| Controller {
                gamma_size,
                ramp: if gamma_size > 0 && gamma_size <= 65536 {
                    generate(&GammaCurve::LINEAR, 1.0, gamma_size)
                } else {
                    GammaRamp::default()
                },
                geometry: Geometry {
                    x: 1920 * controller.0 as i32,
                    y: 0,
                    width: 1920,
                    height: 1080,
                },
            });
        }
        state.outputs.push(OutputInfo {
            id: OutputId(id),
            name: name.to_string(),
            controller,
            clones: Vec::new(),
        });
    }

    pub fn set_clones(&self, id: u32, clones: &[u32]) {
        let mut state = lock(&self.state);
        if let Some(output) = state.outputs.iter_mut().find(|o| o.id == OutputId(id)) {
            output.clones = clones.iter().copied().map(OutputId).collect();
        }
    }

    pub fn remove_output(&self, id: u32) {
        lock(&self.state).outputs.retain(|o| o.id != OutputId(id));
    }

    pub fn add_backlight(&self, output: u32, min: i32, max: i32, value: u32) {
        self.add_backlight_property(
            output,
            PropertyInfo {
                range: true,
                values: vec![min, max],
            },
            value,
        );
    }

    pub fn add_backlight_property(&self, output: u32, info: PropertyInfo, value: u32) {
        lock(&self.state)
            .backlights
            .insert(OutputId(output), (info, value));
    }

    pub fn remove_backlight(&self, output: u32) {
        lock(&self.state).backlights.remove(&OutputId(output));
    }

    pub fn backlight(&self, output: u32) -> Option<u32> {
        lock(&self.state)
            .backlights
            .get(&OutputId(output))
            .map(|(_, value)| *value)
    }

    /// Change the backlight behind the engine's back.
    pub fn set_backlight(&self, output: u32, value: u32) {
        if let Some(entry) = lock(&self.state).backlights.get_mut(&OutputId(output)) {
            entry.1 = value;
        }
    }

    pub fn ramp(&self, controller: u32) -> GammaRamp {
        lock(&self.state).controllers[&ControllerId(controller)]
            .ramp
            .clone()
    }

    pub fn set_ramp(&self, controller: u32, ramp: GammaRamp) {
        if let Some(c) = lock(&self.state).controllers.get_mut(&ControllerId(controller)) {
            c.ramp = ramp;
        }
    }

    pub fn push_event(&self, event: BackendEvent) {
        lock(&self.state).events.push(event);
    }

    pub fn gamma_writes(&self, controller: ControllerId) -> Vec<GammaRamp> {
        lock(&self.state)
            .gamma_writes
            .get(&controller)
            .cloned()
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.state).calls.clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.state).calls.clear();
    }

    pub fn fail_gamma_writes(&self, fail: bool) {
        lock(&self.state).fail_gamma_writes = fail;
    }

    /// Make every gamma write take `delay`.
    pub fn set_gamma_delay(&self, delay: Duration) {
        lock(&self.state).gamma_delay = delay;
    }
}

impl DisplayBackend for FakeBackend {
    fn outputs(&self) -> Result<Vec<OutputInfo>> {
        let mut state = lock(&self.state);
        state.calls.push(Call::Outputs);
        Ok(state.outputs.clone())
    }

    fn output_property_info(&self, output: OutputId, name: &str) -> Result<Option<PropertyInfo>> {
        if name != BACKLIGHT_PROPERTY {
            return Ok(None);
        }
        Ok(lock(&self.state)
            .backlights
            .get(&output)
            .map(|(info, _)| info.clone()))
    }

    fn output_property(&self, output: OutputId, _name: &str) -> Result<u32> {
        let mut state = lock(&self.state);
        state.calls.push(Call::GetProperty(output));
        state
            .backlights
            .get(&output)
            .map(|(_, value)| *value)
            .ok_or_else(|| BrightdockError::Other(format!("{output} has no backlight")))
    }

    fn set_output_property(&self, output: OutputId, _name: &str, value: u32) -> Result<()> {
        let mut state = lock(&self.state);
        state.calls.push(Call::SetProperty(output, value));
        match state.backlights.get_mut(&output) {
            Some(entry) => {
                entry.1 = value;
                Ok(())
            }
            None => Err(BrightdockError::Other(format!("{output} has no backlight"))),
        }
    }

    fn gamma_size(&self, controller: ControllerId) -> Result<usize> {
        let mut state = lock(&self.state);
        state.calls.push(Call::GammaSize(controller));
        state
            .controllers
            .get(&controller)
            .map(|c| c.gamma_size)
            .ok_or_else(|| BrightdockError::Other(format!("no {controller}")))
    }

    fn gamma(&self, controller: ControllerId) -> Result<GammaRamp> {
        let mut state = lock(&self.state);
        state.calls.push(Call::GetGamma(controller));
        state
            .controllers
            .get(&controller)
            .map(|c| c.ramp.clone())
            .ok_or_else(|| BrightdockError::Other(format!("no {controller}")))
    }

    fn set_gamma(&self, controller: ControllerId, ramp: &GammaRamp) -> Result<()> {
        let delay = {
            let mut state = lock(&self.state);
            state.calls.push(Call::SetGamma(controller));
            if state.fail_gamma_writes {
                return Err(BrightdockError::Other("gamma write refused".into()));
            }
            state.gamma_delay
        };
        std::thread::sleep(delay);
        let mut state = lock(&self.state);
        if let Some(c) = state.controllers.get_mut(&controller) {
            c.ramp = ramp.clone();
        }
        state
            .gamma_writes
            .entry(controller)
            .or_default()
            .push(ramp.clone());
        Ok(())
    }

    fn geometry(&self, controller: ControllerId) -> Result<Geometry> {
        lock(&self.state)
            .controllers
            .get(&controller)
            .map(|c| c.geometry)
            .ok_or_else(|| BrightdockError::Other(format!("no {controller}")))
    }

    fn poll_events(&self) -> Result<Vec<BackendEvent>> {
        Ok(std::mem::take(&mut lock(&self.state).events))
    }
}

/// Poll `condition` for up to five seconds.
pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    condition()
}
