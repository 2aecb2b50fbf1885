//! Intersection records.
//!
//! [`IntersectionRecord`] is the unit stored locally and in the shared
//! store; its serialized form is the shared store's wire schema
//! (`currentPhase`, `timeRemaining`, lowercase enums).

use std::fmt;

use serde::{Deserialize, Serialize};

use super::phase::default_phases;
use crate::error::RecordError;

/// Unique key of an intersection.
///
/// Identifiers are strings because the shared store addresses records by
/// path segment.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntersectionId(pub String);

impl IntersectionId {
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IntersectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IntersectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Operating status of an intersection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Cycling under the phase clock.
    Active,
    /// Frozen by an operator; the clock skips it.
    Paused,
    /// Out of service; skipped by the clock and by emergency overrides.
    Maintenance,
}

impl Status {
    /// All statuses, in display order.
    pub const ALL: [Self; 3] = [Self::Active, Self::Paused, Self::Maintenance];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operating mode of an intersection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Automatic,
    Manual,
    /// Preferential treatment for a route (transit, emergency vehicles).
    Priority,
}

impl Mode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Automatic => "automatic",
            Self::Manual => "manual",
            Self::Priority => "priority",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable runtime state of one intersection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntersectionRecord {
    /// Human-readable name, e.g. `Main St & 1st Ave`.
    pub name: String,
    pub status: Status,
    pub mode: Mode,
    /// Always a member of `phases` for an accepted record.
    pub current_phase: String,
    /// Seconds left in the current phase.
    pub time_remaining: u32,
    /// Ordered phase cycle.
    #[serde(default = "default_phases")]
    pub phases: Vec<String>,
}

impl IntersectionRecord {
    /// Checks the record invariants required before it may enter a store.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant: empty name, empty phase list,
    /// or a current phase outside the phase list.
    pub fn validate(&self) -> Result<(), RecordError> {
        if self.name.trim().is_empty() {
            return Err(RecordError::EmptyName);
        }
        if self.phases.is_empty() {
            return Err(RecordError::EmptyPhases);
        }
        if !self.phases.iter().any(|p| p == &self.current_phase) {
            return Err(RecordError::PhaseNotInList {
                phase: self.current_phase.clone(),
            });
        }
        Ok(())
    }

    /// Returns `true` when the clock should advance this record.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == Status::Active
    }
}

/// An intersection record together with its key.
///
/// Serializes flat: `{ "id": "1", "name": ..., "currentPhase": ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intersection {
    pub id: IntersectionId,
    #[serde(flatten)]
    pub record: IntersectionRecord,
}

impl Intersection {
    #[must_use]
    pub fn new(id: impl Into<String>, record: IntersectionRecord) -> Self {
        Self {
            id: IntersectionId::new(id),
            record,
        }
    }
}

fn seeded(
    id: &str,
    name: &str,
    status: Status,
    phase: &str,
    remaining: u32,
    mode: Mode,
) -> Intersection {
    Intersection::new(
        id,
        IntersectionRecord {
            name: name.to_string(),
            status,
            mode,
            current_phase: phase.to_string(),
            time_remaining: remaining,
            phases: default_phases(),
        },
    )
}

/// Built-in seed list used when no shared store or config seed is given.
#[must_use]
pub fn seed_intersections() -> Vec<Intersection> {
    vec![
        seeded("1", "Main St & 1st Ave", Status::Active, "green-ns", 45, Mode::Automatic),
        seeded("2", "Broadway & Oak St", Status::Active, "red-ns", 12, Mode::Automatic),
        seeded(
            "3",
            "Central Ave & Pine St",
            Status::Maintenance,
            "red-ns",
            0,
            Mode::Manual,
        ),
        seeded("4", "Harbor Rd & 3rd St", Status::Active, "yellow-ew", 8, Mode::Priority),
    ]
}
