//! Phase table and signal aspect helpers.
//!
//! A phase name such as `green-ns` encodes the colour shown to one
//! direction of travel. Durations are a pure function of the colour
//! substring; the crossing direction is held red.

use serde::Serialize;

/// Green phase duration in seconds.
pub const GREEN_SECS: u32 = 45;

/// Yellow (amber) phase duration in seconds.
pub const YELLOW_SECS: u32 = 8;

/// Duration for red and any unrecognised phase, in seconds.
pub const DEFAULT_SECS: u32 = 30;

/// Canonical six-phase cycle shared by every seeded intersection.
pub const DEFAULT_PHASES: [&str; 6] = [
    "green-ns",
    "yellow-ns",
    "red-ns",
    "green-ew",
    "yellow-ew",
    "red-ew",
];

const GREEN_NS: &str = "green-ns";
const RED_NS: &str = "red-ns";

/// Returns the fixed duration of a phase.
///
/// Total over all strings: anything that is neither green nor yellow
/// (red, flashing-red, unknown) falls into the 30 second bucket.
#[must_use]
pub fn phase_duration(phase: &str) -> u32 {
    if phase.contains("green") {
        GREEN_SECS
    } else if phase.contains("yellow") {
        YELLOW_SECS
    } else {
        DEFAULT_SECS
    }
}

/// Returns the canonical phase list as owned strings.
#[must_use]
pub fn default_phases() -> Vec<String> {
    DEFAULT_PHASES.iter().map(ToString::to_string).collect()
}

/// Returns the first green phase of `phases`.
///
/// Falls back to the head of the list so the result stays a member of it;
/// `green-ns` is returned only for an empty list.
#[must_use]
pub fn first_green(phases: &[String]) -> &str {
    phases
        .iter()
        .find(|p| p.contains("green"))
        .or_else(|| phases.first())
        .map_or(GREEN_NS, String::as_str)
}

/// Returns the first north-south red phase of `phases`, then any red
/// phase, then the head of the list. `red-ns` is returned only for an
/// empty list.
#[must_use]
pub fn first_red(phases: &[String]) -> &str {
    phases
        .iter()
        .find(|p| p.contains("red") && p.contains("ns"))
        .or_else(|| phases.iter().find(|p| p.contains("red")))
        .or_else(|| phases.first())
        .map_or(RED_NS, String::as_str)
}

/// Returns the phase that follows `current` in `phases`, wrapping around.
///
/// A current phase missing from the list restarts the cycle at index 0.
/// Returns `None` only for an empty list.
#[must_use]
pub fn next_phase<'a>(phases: &'a [String], current: &str) -> Option<&'a str> {
    if phases.is_empty() {
        return None;
    }
    let next = phases
        .iter()
        .position(|p| p == current)
        .map_or(0, |idx| (idx + 1) % phases.len());
    Some(phases[next].as_str())
}

// ============================================================================
// Aspects
// ============================================================================

/// Lamp colour shown to one direction of travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalColor {
    Green,
    Yellow,
    Red,
    /// No lamp recognised in the phase name.
    Dark,
}

impl SignalColor {
    /// Classifies a phase name by its colour substring.
    #[must_use]
    pub fn of(phase: &str) -> Self {
        if phase.contains("green") {
            Self::Green
        } else if phase.contains("yellow") {
            Self::Yellow
        } else if phase.contains("red") {
            Self::Red
        } else {
            Self::Dark
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Green => "green",
            Self::Yellow => "yellow",
            Self::Red => "red",
            Self::Dark => "dark",
        }
    }
}

/// Colours shown to both approaches of an intersection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalAspects {
    pub north_south: SignalColor,
    pub east_west: SignalColor,
}

impl SignalAspects {
    /// Derives both aspects from the current phase.
    ///
    /// The direction named by the phase (`ns` or `ew`) shows the phase
    /// colour and the crossing direction shows red. A phase naming no
    /// direction applies its colour to both.
    #[must_use]
    pub fn from_phase(phase: &str) -> Self {
        let color = SignalColor::of(phase);
        if phase.contains("ew") {
            Self {
                north_south: SignalColor::Red,
                east_west: color,
            }
        } else if phase.contains("ns") {
            Self {
                north_south: color,
                east_west: SignalColor::Red,
            }
        } else {
            Self {
                north_south: color,
                east_west: color,
            }
        }
    }

    /// Returns `true` when neither approach shows green or yellow.
    #[must_use]
    pub fn all_red(&self) -> bool {
        self.north_south == SignalColor::Red && self.east_west == SignalColor::Red
    }
}
