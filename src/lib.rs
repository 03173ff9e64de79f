//! Fire-safety equipment inspection and hazard lifecycle engine
//!
//! This crate implements the transactional core of a fire-safety
//! inspection platform: inspection records move from an empty draft
//! through incremental image capture to a one-time finalization, any
//! abnormal finding opens a hazard ticket that flows report -> handle ->
//! audit -> close (or rolls back to re-handling on a rejected audit),
//! and equipment health is derived from the set of currently open
//! tickets. Uploaded image files shared between records are reference
//! counted before any physical deletion.
//!
//! HTTP routing, authentication and request validation live in the
//! `firesafe-web-server` crate; this library consumes a resolved
//! [`models::Principal`] and validated payloads, and returns plain data
//! or a tagged [`error::EngineError`].

// Core error handling
pub mod error;

// Capability resolution shared by all lifecycle services
pub mod authorization;

// Row, enum and payload types
pub mod models;

// Database integration and lifecycle services
pub mod database;

pub use error::{EngineError, EngineResult};
