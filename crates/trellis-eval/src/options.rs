//! Engine configuration.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub use crate::reachability::ClosureStrategy;

/// Join planner switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PlannerOptions {
    /// Apply `var = value` constraints as soon as the variable is visible.
    pub prioritize_constant_filtering: bool,
    /// Use functional dependencies when ranking joins and trimming variables.
    pub functional_dependencies: bool,
}

impl Default for PlannerOptions {
    fn default() -> Self {
        Self {
            prioritize_constant_filtering: true,
            functional_dependencies: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EngineOptions {
    pub planner: PlannerOptions,
    pub closure: ClosureStrategy,
}
