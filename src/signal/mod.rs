//! Traffic signal state machine.
//!
//! - [`phase`]: phase durations, cycle order, signal aspects
//! - [`intersection`]: record types and the built-in seed list
//! - [`clock`]: per-record tick and the owned [`PhaseClock`] scheduler
//! - [`control`]: operator actions and emergency overrides

pub mod clock;
pub mod control;
pub mod intersection;
pub mod phase;

pub use clock::{PhaseClock, TickOutcome, tick};
pub use control::{ControlAction, ControlPolicy, EmergencyAction, TransitionRule};
pub use intersection::{Intersection, IntersectionId, IntersectionRecord, Mode, Status};
pub use phase::{SignalAspects, SignalColor, phase_duration};
