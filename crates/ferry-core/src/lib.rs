//! Resumable object-storage migration.
//!
//! ```text
//!   Catalog (MySQL / SQLite)        source ObjectStore
//!          │                               │
//!          ▼                               ▼
//!   TransferEngine ── ObjectMover ── RetryPolicy ──▶ destination ObjectStore
//!          │
//!          ▼
//!   CheckpointStore (atomic JSON)  ◀── report::summarize (status)
//! ```
//!
//! [`verify::Verifier`] samples the catalog and checks the destination.

pub mod catalog;
pub mod checkpoint;
pub mod config;
pub mod duration;
pub mod endpoints;
pub mod engine;
pub mod error;
pub mod io;
pub mod locator;
pub mod mover;
pub mod paths;
pub mod report;
pub mod retry;
pub mod store;
pub mod verify;

pub use error::{FerryError, Result};
