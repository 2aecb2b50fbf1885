//! Realtime database backend.
//!
//! Speaks the REST protocol of Firebase-style realtime databases:
//!
//! - `GET  {url}/{path}.json` reads the collection
//! - `PUT  {url}/{path}/{id}.json` writes one full record
//! - `GET  {url}/{path}.json` with `Accept: text/event-stream` streams
//!   `put` / `patch` events carrying `{"path": ..., "data": ...}`
//!
//! The stream is reopened after it drops; the store sends a full `put` at
//! `/` on every connect, which resynchronizes the local store.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::sse::{SseEvent, SseParser};
use super::{BackendKind, RemoteChange, Result, SyncBackend};
use crate::error::StoreError;
use crate::signal::{Intersection, IntersectionId, IntersectionRecord};

/// Capacity of the remote change channel.
const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Default delay before reopening a dropped change stream.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Connection settings for [`RealtimeBackend`].
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Database root, e.g. `https://example-rtdb.firebaseio.com`.
    pub url: String,
    /// Collection path under the root, e.g. `intersections`.
    pub path: String,
    /// Delay before reopening a dropped change stream.
    pub reconnect_delay: Duration,
}

/// Backend for a remote realtime database.
#[derive(Debug, Clone)]
pub struct RealtimeBackend {
    client: reqwest::Client,
    base: String,
    path: String,
    reconnect_delay: Duration,
}

impl RealtimeBackend {
    #[must_use]
    pub fn new(config: RealtimeConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: config.url.trim_end_matches('/').to_string(),
            path: config.path.trim_matches('/').to_string(),
            reconnect_delay: config.reconnect_delay,
        }
    }

    /// URL of the whole collection.
    #[must_use]
    pub fn collection_url(&self) -> String {
        if self.path.is_empty() {
            format!("{}/.json", self.base)
        } else {
            format!("{}/{}.json", self.base, self.path)
        }
    }

    /// URL of one record.
    #[must_use]
    pub fn record_url(&self, id: &IntersectionId) -> String {
        if self.path.is_empty() {
            format!("{}/{}.json", self.base, id)
        } else {
            format!("{}/{}/{}.json", self.base, self.path, id)
        }
    }

    async fn open_stream(&self) -> Result<reqwest::Response> {
        let url = self.collection_url();
        let resp = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        check_status(resp, &url)
    }

    /// Reads one stream until it ends. Returns `Ok(true)` when the store
    /// asked us to stop listening (`cancel` / `auth_revoked`).
    async fn pump(
        &self,
        resp: reqwest::Response,
        tx: &mpsc::Sender<RemoteChange>,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let mut stream = resp.bytes_stream();
        let mut parser = SseParser::new();
        loop {
            let chunk = tokio::select! {
                () = cancel.cancelled() => return Ok(true),
                next = stream.next() => match next {
                    Some(chunk) => chunk?,
                    None => return Ok(false),
                },
            };
            for event in parser.feed(&chunk)? {
                match interpret(&event) {
                    Ok(Interpreted::Changes(changes)) => {
                        for change in changes {
                            if tx.send(change).await.is_err() {
                                return Ok(true);
                            }
                        }
                    }
                    Ok(Interpreted::Ignore) => {}
                    Ok(Interpreted::Stop(reason)) => {
                        warn!(reason = %reason, "realtime store closed the change stream");
                        return Ok(true);
                    }
                    Err(e) => warn!(event = %event.event, error = %e, "dropping malformed change event"),
                }
            }
        }
    }
}

fn check_status(resp: reqwest::Response, url: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        Err(StoreError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl SyncBackend for RealtimeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Realtime
    }

    async fn load(&self) -> Result<Vec<Intersection>> {
        let url = self.collection_url();
        let resp = check_status(self.client.get(&url).send().await?, &url)?;
        let body: Value = resp
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        let loaded = decode_collection(body);
        debug!(url = %url, count = loaded.len(), "loaded intersections from realtime store");
        Ok(loaded)
    }

    async fn write(&self, item: &Intersection) -> Result<()> {
        let url = self.record_url(&item.id);
        let resp = self.client.put(&url).json(&item.record).send().await?;
        check_status(resp, &url)?;
        trace!(intersection = %item.id, "record written");
        Ok(())
    }

    async fn subscribe(
        &self,
        cancel: CancellationToken,
    ) -> Result<Option<mpsc::Receiver<RemoteChange>>> {
        // Open the first stream eagerly so connection errors surface to the caller.
        let first = self.open_stream().await?;
        info!(url = %self.collection_url(), "subscribed to realtime store");

        let (tx, rx) = mpsc::channel(CHANGE_CHANNEL_CAPACITY);
        let backend = self.clone();
        tokio::spawn(async move {
            let mut resp = Some(first);
            loop {
                let current = match resp.take() {
                    Some(r) => r,
                    None => match backend.open_stream().await {
                        Ok(r) => {
                            info!("realtime change stream reopened");
                            r
                        }
                        Err(e) => {
                            warn!(error = %e, "failed to reopen realtime change stream");
                            if wait_or_cancel(&cancel, backend.reconnect_delay).await {
                                break;
                            }
                            continue;
                        }
                    },
                };
                match backend.pump(current, &tx, &cancel).await {
                    Ok(true) => break,
                    Ok(false) => debug!("realtime change stream ended"),
                    Err(e) => warn!(error = %e, "realtime change stream failed"),
                }
                if wait_or_cancel(&cancel, backend.reconnect_delay).await {
                    break;
                }
            }
            debug!("realtime subscription task finished");
        });
        Ok(Some(rx))
    }
}

/// Sleeps for `delay`; returns `true` if cancelled first.
async fn wait_or_cancel(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        () = cancel.cancelled() => true,
        () = tokio::time::sleep(delay) => false,
    }
}

// ============================================================================
// Payload decoding
// ============================================================================

#[derive(Debug, Deserialize)]
struct EventPayload {
    path: String,
    data: Value,
}

/// What a single stream event means for the store.
#[derive(Debug, PartialEq)]
enum Interpreted {
    Changes(Vec<RemoteChange>),
    Ignore,
    Stop(String),
}

fn interpret(event: &SseEvent) -> std::result::Result<Interpreted, StoreError> {
    match event.event.as_str() {
        "put" => {
            let payload = parse_payload(&event.data)?;
            Ok(Interpreted::Changes(
                change_at(&payload.path, payload.data).into_iter().collect(),
            ))
        }
        "patch" => {
            let payload = parse_payload(&event.data)?;
            let Value::Object(children) = payload.data else {
                return Err(StoreError::Decode("patch data must be an object".into()));
            };
            let base = payload.path.trim_end_matches('/');
            Ok(Interpreted::Changes(
                children
                    .into_iter()
                    .filter_map(|(key, value)| change_at(&format!("{base}/{key}"), value))
                    .collect(),
            ))
        }
        "keep-alive" => Ok(Interpreted::Ignore),
        "cancel" | "auth_revoked" => Ok(Interpreted::Stop(event.event.clone())),
        other => {
            debug!(event = other, "ignoring unknown stream event");
            Ok(Interpreted::Ignore)
        }
    }
}

fn parse_payload(data: &str) -> std::result::Result<EventPayload, StoreError> {
    serde_json::from_str(data).map_err(|e| StoreError::Decode(e.to_string()))
}

/// Maps a value written at `path` (relative to the collection) to a change.
fn change_at(path: &str, data: Value) -> Option<RemoteChange> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        [] => {
            if data.is_null() {
                debug!("collection cleared remotely; keeping local records");
                return None;
            }
            Some(RemoteChange::Snapshot(decode_collection(data)))
        }
        [id] => {
            let id = IntersectionId::new(*id);
            if data.is_null() {
                return Some(RemoteChange::Removed { id });
            }
            match serde_json::from_value::<IntersectionRecord>(data) {
                Ok(record) => Some(RemoteChange::Record { id, record }),
                Err(e) => {
                    warn!(intersection = %id, error = %e, "skipping undecodable record");
                    None
                }
            }
        }
        [id, field] => Some(RemoteChange::Field {
            id: IntersectionId::new(*id),
            field: (*field).to_string(),
            value: data,
        }),
        _ => {
            debug!(path, "ignoring nested field update");
            None
        }
    }
}

/// Decodes a collection value into records.
///
/// The store returns an object keyed by id, or an array when every key is
/// a small integer (index = id, holes are `null`). Undecodable entries are
/// logged and skipped.
#[must_use]
pub fn decode_collection(value: Value) -> Vec<Intersection> {
    let entries: Vec<(String, Value)> = match value {
        Value::Null => return Vec::new(),
        Value::Object(map) => map.into_iter().collect(),
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .filter(|(_, v)| !v.is_null())
            .map(|(i, v)| (i.to_string(), v))
            .collect(),
        other => {
            warn!(kind = json_kind(&other), "collection is not an object; ignoring");
            return Vec::new();
        }
    };

    entries
        .into_iter()
        .filter_map(|(id, v)| match serde_json::from_value::<IntersectionRecord>(v) {
            Ok(record) => Some(Intersection {
                id: IntersectionId::new(id),
                record,
            }),
            Err(e) => {
                warn!(intersection = %id, error = %e, "skipping undecodable record");
                None
            }
        })
        .collect()
}

const fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
