//! The capability interface the engine needs from the display server.

use std::fmt;

use crate::errors::*;
use crate::gamma::GammaRamp;

/// Opaque handle for a physical connector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OutputId(pub u32);

/// Opaque handle for the display pipeline driving one or more outputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ControllerId(pub u32);

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "output {}", self.0)
    }
}

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "controller {}", self.0)
    }
}

#[derive(Clone, Debug)]
pub struct OutputInfo {
    pub id: OutputId,
    pub name: String,
    /// `None` when the output is not currently driven.
    pub controller: Option<ControllerId>,
    /// Outputs the hardware reports as clones of this one.
    pub clones: Vec<OutputId>,
}

/// Shape of an output property as reported by the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropertyInfo {
    pub range: bool,
    pub values: Vec<i32>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Geometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendEvent {
    /// Outputs or controllers were added, removed or reconfigured.
    Topology,
    /// An output property (such as the backlight) changed.
    PropertyChanged,
}

pub trait DisplayBackend: Send + Sync {
    fn outputs(&self) -> Result<Vec<OutputInfo>>;

    /// `Ok(None)` when the output has no property called `name`.
    fn output_property_info(&self, output: OutputId, name: &str) -> Result<Option<PropertyInfo>>;

    fn output_property(&self, output: OutputId, name: &str) -> Result<u32>;

    fn set_output_property(&self, output: OutputId, name: &str, value: u32) -> Result<()>;

    fn gamma_size(&self, controller: ControllerId) -> Result<usize>;

    fn gamma(&self, controller: ControllerId) -> Result<GammaRamp>;

    /// Program `ramp` and make sure it reached the server.
    fn set_gamma(&self, controller: ControllerId, ramp: &GammaRamp) -> Result<()>;

    fn geometry(&self, controller: ControllerId) -> Result<Geometry>;

    /// Drain pending change notifications without blocking.
    fn poll_events(&self) -> Result<Vec<BackendEvent>>;
}
