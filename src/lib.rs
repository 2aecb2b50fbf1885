//! `signalctl` - Traffic signal phase controller
//!
//! This library provides the phase state machine, the intersection store,
//! sync backends for a shared realtime database and the HTTP control
//! surface used by the `signalctl` binary.

pub mod api;
pub mod backend;
pub mod cli;
pub mod config;
pub mod controller;
pub mod error;
pub mod observability;
pub mod signal;
pub mod store;
