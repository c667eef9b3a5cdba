#![allow(clippy::excessive_precision)]
#![allow(clippy::too_many_arguments)]

/// Traits to model the systems that can be advanced by this crate's timesteppers.
pub mod integrable;
/// Implementations of the explicit and implicit integration schemes.
pub mod integrators;

/// Convergence control shared by the iterative implicit schemes.
pub mod implicit;
/// Versioned persistence records of timestepper configuration.
pub mod record;
/// State vectors owned by timesteppers.
pub mod state;
/// The timestepper capability and its configuration.
pub mod timestepper;

pub use implicit::{ImplicitIterative, ImplicitIterativeSettings};
pub use integrators::{create_first_order, create_second_order, restore_first_order, restore_second_order};
pub use integrable::{CorrectionFactors, FirstOrderView, Integrable, IntegrableIIorder, IntoFirstOrder};
pub use record::TimestepperRecord;
pub use state::{FirstOrderState, SecondOrderState, State, StateDelta};
pub use timestepper::{Order, QcClamping, Timestepper, TimestepperCore, TimestepperKind, TimestepperSettings};
