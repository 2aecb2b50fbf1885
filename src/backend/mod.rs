//! Sync backends.
//!
//! A controller session talks to exactly one [`SyncBackend`]:
//!
//! - [`MemoryBackend`]: in-process seed list, no remote peers
//! - [`RealtimeBackend`]: a Firebase-style realtime database over REST,
//!   with change notifications streamed as Server-Sent Events
//!
//! The backend provides the initial snapshot, receives every local write,
//! and optionally streams remote changes back.

pub mod memory;
pub mod realtime;
pub mod sse;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::StoreError;
use crate::signal::{Intersection, IntersectionId, IntersectionRecord};

pub use memory::MemoryBackend;
pub use realtime::RealtimeBackend;

/// Result alias for backend operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Which backend a session uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-memory seed list.
    #[default]
    Memory,
    /// Remote realtime database.
    Realtime,
}

impl BackendKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Realtime => "realtime",
        }
    }
}

/// A change pushed by the shared store.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteChange {
    /// The whole collection, e.g. on (re)connect.
    Snapshot(Vec<Intersection>),
    /// One full record.
    Record {
        id: IntersectionId,
        record: IntersectionRecord,
    },
    /// One field of an existing record.
    Field {
        id: IntersectionId,
        field: String,
        value: serde_json::Value,
    },
    /// A record was deleted remotely.
    Removed { id: IntersectionId },
}

/// Storage and notification backend for intersection records.
#[async_trait]
pub trait SyncBackend: Send + Sync + std::fmt::Debug {
    /// Backend kind, for logs and events.
    fn kind(&self) -> BackendKind;

    /// Reads the full collection.
    ///
    /// Records that fail to decode are skipped, not reported as errors.
    async fn load(&self) -> Result<Vec<Intersection>>;

    /// Writes one full record.
    async fn write(&self, item: &Intersection) -> Result<()>;

    /// Starts streaming remote changes until `cancel` fires.
    ///
    /// Returns `None` for backends without remote peers.
    async fn subscribe(
        &self,
        cancel: CancellationToken,
    ) -> Result<Option<mpsc::Receiver<RemoteChange>>>;
}
