//! Structured event stream.
//!
//! Discrete, typed events emitted while a controller session runs.
//! Events are serialized as newline-delimited JSON (JSONL) with a
//! monotonically increasing sequence number.

use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

// ---------------------------------------------------------------------------
// Event variants
// ---------------------------------------------------------------------------

/// A discrete event emitted during a controller session.
///
/// Tagged with `"type"` when serialized so consumers can dispatch on the
/// event kind.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    /// The session loaded its records and started the clock.
    ControllerStarted {
        timestamp: DateTime<Utc>,
        /// Random per-session identifier.
        session_id: String,
        /// Backend kind (`"memory"` or `"realtime"`).
        backend: String,
        /// Number of intersections loaded.
        intersections: usize,
        /// Clock period in milliseconds.
        tick_interval_ms: u64,
    },

    /// The session stopped.
    ControllerStopped {
        timestamp: DateTime<Utc>,
        /// Human-readable stop reason.
        reason: String,
        /// Ticks processed during the session.
        ticks: u64,
    },

    /// The clock moved an intersection to its next phase.
    PhaseAdvanced {
        timestamp: DateTime<Utc>,
        intersection: String,
        from: String,
        to: String,
        /// Seconds allotted to the new phase.
        time_remaining: u32,
    },

    /// An operator action was received for one intersection.
    ControlApplied {
        timestamp: DateTime<Utc>,
        intersection: String,
        /// Action name as received.
        action: String,
        /// Whether the record changed.
        applied: bool,
    },

    /// An emergency override was applied to every eligible intersection.
    EmergencyApplied {
        timestamp: DateTime<Utc>,
        kind: String,
        affected: usize,
        /// Intersections left alone because they are under maintenance.
        skipped: usize,
    },

    /// A change from the shared store was merged locally.
    RemoteUpdateApplied {
        timestamp: DateTime<Utc>,
        /// Affected intersection, or `None` for a full snapshot.
        intersection: Option<String>,
        /// `snapshot`, `record` or `field`.
        kind: String,
    },

    /// A write to the shared store failed after all retries.
    SyncFailed {
        timestamp: DateTime<Utc>,
        intersection: String,
        attempts: u32,
        error: String,
    },
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct EventEnvelope {
    sequence: u64,
    #[serde(flatten)]
    event: Event,
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

/// Thread-safe, buffered JSONL event writer.
///
/// Each [`emit`](Self::emit) increments the sequence counter, writes one
/// JSON line and flushes. Serialization and I/O failures are dropped:
/// emitting an event never fails the caller.
pub struct EventEmitter {
    writer: Mutex<BufWriter<Box<dyn Write + Send>>>,
    sequence: AtomicU64,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl EventEmitter {
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
            sequence: AtomicU64::new(0),
        }
    }

    /// Creates an emitter that discards all events.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(Box::new(std::io::sink()))
    }

    /// Creates an emitter that writes to a file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be created.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::new(Box::new(file)))
    }

    /// Emits an event as a single JSONL line.
    pub fn emit(&self, event: Event) {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let envelope = EventEnvelope {
            sequence: seq,
            event,
        };

        if let Ok(mut w) = self.writer.lock() {
            if let Ok(line) = serde_json::to_string(&envelope) {
                let _ = writeln!(w, "{line}");
                let _ = w.flush();
            }
        }
    }

    /// Returns the number of events emitted so far.
    #[must_use]
    pub fn event_count(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}
