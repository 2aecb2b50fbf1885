//! Operator control surface.
//!
//! Per-intersection actions (pause toggle, reset, manual toggle) and
//! bulk emergency overrides. Every operation is immediate and
//! last-writer-wins; the only guard is that emergency overrides skip
//! intersections under maintenance.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::intersection::{IntersectionRecord, Mode, Status};
use super::phase::{first_green, first_red, phase_duration};

/// Action names accepted by [`ControlAction::parse`], used for typo hints.
const ACTION_NAMES: [&str; 5] = ["pause", "resume", "reset", "manual", "toggle-manual"];

/// Emergency names accepted by [`EmergencyAction::parse`].
const EMERGENCY_NAMES: [&str; 4] = ["all-stop", "priority", "priority-clear", "resume"];

/// A per-intersection operator action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ControlAction {
    /// Toggles active and paused.
    Pause,
    /// Restarts the cycle at the first green phase.
    Reset,
    /// Flips manual and automatic mode.
    ToggleManual,
}

impl ControlAction {
    /// Parses an action name. Unknown names yield `None`, which callers
    /// treat as a no-op.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "pause" | "resume" | "toggle" => Some(Self::Pause),
            "reset" => Some(Self::Reset),
            "manual" | "toggle-manual" => Some(Self::ToggleManual),
            _ => None,
        }
    }

    /// Canonical action name, also used as a metrics label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::Reset => "reset",
            Self::ToggleManual => "manual",
        }
    }
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bulk override applied to every intersection not under maintenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmergencyAction {
    /// Force the red phase on every approach.
    AllStop,
    /// Force the first green phase to clear a priority route.
    PriorityClear,
    /// Restart normal cycling from green and un-pause.
    Resume,
}

impl EmergencyAction {
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "all-stop" | "allstop" | "stop" => Some(Self::AllStop),
            "priority" | "priority-clear" => Some(Self::PriorityClear),
            "resume" => Some(Self::Resume),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AllStop => "all-stop",
            Self::PriorityClear => "priority-clear",
            Self::Resume => "resume",
        }
    }
}

impl fmt::Display for EmergencyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Suggests the closest known action name for a typo.
///
/// Returns a match only when its Damerau-Levenshtein distance is at most 3.
#[must_use]
pub fn suggest_action(input: &str) -> Option<&'static str> {
    suggest(input, &ACTION_NAMES)
}

/// Suggests the closest known emergency name for a typo.
#[must_use]
pub fn suggest_emergency(input: &str) -> Option<&'static str> {
    suggest(input, &EMERGENCY_NAMES)
}

fn suggest(input: &str, names: &[&'static str]) -> Option<&'static str> {
    let input = input.to_ascii_lowercase();
    names
        .iter()
        .map(|name| (*name, strsim::damerau_levenshtein(&input, name)))
        .filter(|(_, dist)| *dist <= 3)
        .min_by_key(|(_, dist)| *dist)
        .map(|(name, _)| name)
}

// ============================================================================
// Transition rules
// ============================================================================

/// Named coupling rules between control actions and record fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionRule {
    /// Toggling manual mode forces the intersection to `active`, un-pausing
    /// it even if an operator had paused it.
    ManualToggleResumes,
}

impl TransitionRule {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ManualToggleResumes => "manual_toggle_resumes",
        }
    }
}

/// Which transition rules are in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlPolicy {
    /// Enables [`TransitionRule::ManualToggleResumes`].
    pub manual_toggle_resumes: bool,
}

impl Default for ControlPolicy {
    fn default() -> Self {
        Self {
            manual_toggle_resumes: true,
        }
    }
}

impl ControlPolicy {
    #[must_use]
    pub const fn enabled(&self, rule: TransitionRule) -> bool {
        match rule {
            TransitionRule::ManualToggleResumes => self.manual_toggle_resumes,
        }
    }
}

// ============================================================================
// Application
// ============================================================================

/// Applies an operator action to one record.
///
/// Returns `true` if any field changed.
pub fn apply_action(
    record: &mut IntersectionRecord,
    action: ControlAction,
    policy: &ControlPolicy,
) -> bool {
    let before = record.clone();
    match action {
        ControlAction::Pause => {
            record.status = if record.status == Status::Active {
                Status::Paused
            } else {
                Status::Active
            };
        }
        ControlAction::Reset => {
            force_phase(record, first_green(&record.phases).to_string());
        }
        ControlAction::ToggleManual => {
            record.mode = if record.mode == Mode::Manual {
                Mode::Automatic
            } else {
                Mode::Manual
            };
            if policy.enabled(TransitionRule::ManualToggleResumes) {
                record.status = Status::Active;
            }
        }
    }
    *record != before
}

/// Applies an emergency override to one record.
///
/// Records under maintenance are left untouched and `false` is returned;
/// otherwise `true` is returned, whether or not any field changed.
pub fn apply_emergency(record: &mut IntersectionRecord, action: EmergencyAction) -> bool {
    if record.status == Status::Maintenance {
        return false;
    }
    match action {
        EmergencyAction::AllStop => {
            force_phase(record, first_red(&record.phases).to_string());
        }
        EmergencyAction::PriorityClear => {
            force_phase(record, first_green(&record.phases).to_string());
        }
        EmergencyAction::Resume => {
            force_phase(record, first_green(&record.phases).to_string());
            record.status = Status::Active;
        }
    }
    true
}

fn force_phase(record: &mut IntersectionRecord, phase: String) {
    record.time_remaining = phase_duration(&phase);
    record.current_phase = phase;
}
