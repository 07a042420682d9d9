use std::fmt;

use serde::{Deserialize, Serialize};

/// Discrete visual complexity setting. Always within `1..=4`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ComplexityLevel(u8);

impl ComplexityLevel {
    pub const MIN: Self = Self(1);
    pub const MAX: Self = Self(4);

    /// Returns `None` when `value` is outside `1..=4`.
    pub fn new(value: u8) -> Option<Self> {
        (Self::MIN.0..=Self::MAX.0)
            .contains(&value)
            .then_some(Self(value))
    }

    /// Clamp an arbitrary integer into range.
    pub fn clamped(value: i64) -> Self {
        Self(value.clamp(i64::from(Self::MIN.0), i64::from(Self::MAX.0)) as u8)
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// One step down, saturating at [`Self::MIN`].
    pub fn step_down(self) -> Self {
        Self(self.0.saturating_sub(1).max(Self::MIN.0))
    }

    /// One step up, saturating at [`Self::MAX`].
    pub fn step_up(self) -> Self {
        Self((self.0 + 1).min(Self::MAX.0))
    }
}

impl Default for ComplexityLevel {
    fn default() -> Self {
        Self::MIN
    }
}

impl TryFrom<u8> for ComplexityLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("complexity level {value} outside 1..=4"))
    }
}

impl From<ComplexityLevel> for u8 {
    fn from(level: ComplexityLevel) -> Self {
        level.0
    }
}

impl fmt::Display for ComplexityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
