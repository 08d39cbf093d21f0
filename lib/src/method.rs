use std::fmt;
use std::ops::{Index, IndexMut};

use serde::Deserialize;

/// How a monitor's brightness is driven.
#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ControlMethod {
    #[default]
    None,
    Backlight,
    Gamma,
}

impl ControlMethod {
    pub const ALL: [ControlMethod; 3] = [Self::None, Self::Backlight, Self::Gamma];

    fn index(self) -> usize {
        match self {
            Self::None => 0,
            Self::Backlight => 1,
            Self::Gamma => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Backlight => "Backlight",
            Self::Gamma => "Gamma",
        }
    }
}

impl fmt::Display for ControlMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The set of methods some hardware offers. `None` is always a member.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct MethodSet(u8);

impl MethodSet {
    pub fn new() -> Self {
        Self(1 << ControlMethod::None.index())
    }

    pub fn insert(&mut self, method: ControlMethod) {
        self.0 |= 1 << method.index();
    }

    pub fn contains(self, method: ControlMethod) -> bool {
        self.0 & (1 << method.index()) != 0
    }

    pub fn iter(self) -> impl Iterator<Item = ControlMethod> {
        ControlMethod::ALL
            .into_iter()
            .filter(move |method| self.contains(*method))
    }

    /// Backlight if available, else gamma, else nothing.
    pub fn preferred(self) -> ControlMethod {
        [ControlMethod::Backlight, ControlMethod::Gamma]
            .into_iter()
            .find(|method| self.contains(*method))
            .unwrap_or(ControlMethod::None)
    }
}

impl Default for MethodSet {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MethodSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// One value per [`ControlMethod`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PerMethod<T>([T; 3]);

impl<T> Index<ControlMethod> for PerMethod<T> {
    type Output = T;

    fn index(&self, method: ControlMethod) -> &T {
        &self.0[method.index()]
    }
}

impl<T> IndexMut<ControlMethod> for PerMethod<T> {
    fn index_mut(&mut self, method: ControlMethod) -> &mut T {
        &mut self.0[method.index()]
    }
}
