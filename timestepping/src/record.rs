use std::error::Error;

use serde::{Deserialize, Serialize};

use crate::implicit::ImplicitIterativeSettings;
use crate::integrators::NewmarkParameters;
use crate::timestepper::{TimestepperKind, TimestepperSettings};

/// Self-describing record of the configuration of a timestepper.
///
/// Only scalar configuration is recorded. Transient state (time, state vectors, multipliers
/// and iteration counters) is deliberately left out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestepperRecord<T> {
    pub version: u32,
    pub kind: TimestepperKind,
    pub settings: TimestepperSettings<T>,
    /// Present for the schemes that carry the Newton convergence controller.
    #[serde(default)]
    pub iterative: Option<ImplicitIterativeSettings<T>>,
    /// Present for Newmark.
    #[serde(default)]
    pub newmark: Option<NewmarkParameters<T>>,
}

impl<T> TimestepperRecord<T> {
    pub const CURRENT_VERSION: u32 = 1;

    /// Checks that this record can be applied to a timestepper of the given kind.
    pub fn check_compatible(&self, kind: TimestepperKind) -> Result<(), Box<dyn Error>> {
        if self.version > Self::CURRENT_VERSION {
            return Err(Box::from(format!(
                "unsupported timestepper record version {} (latest supported version is {})",
                self.version,
                Self::CURRENT_VERSION
            )));
        }
        if self.kind != kind {
            return Err(Box::from(format!(
                "timestepper record of kind {} cannot be applied to a timestepper of kind {}",
                self.kind, kind
            )));
        }
        Ok(())
    }
}
