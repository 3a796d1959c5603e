//! # Room DJ service (rdj-room)
//!
//! Keeps every viewer of a shared room playing the same track at the same
//! offset, and advances through a moderated request queue on its own when the
//! current track runs out.
//!
//! - `store`: versioned state store with change notifications (memory, SQLite)
//! - `scheduler`: per-room autonomous advancement
//! - `queue`: request queue with per-submitter quota and ordering strategies
//! - `intake`: request validation, metadata lookup and enqueue
//! - `control`: privileged play/pause/seek/set-track/stop/skip
//! - `viewer`: client-side sync loop and read model
//! - `api`: HTTP and SSE surface

pub mod api;
pub mod auth;
pub mod config;
pub mod control;
pub mod error;
pub mod intake;
pub mod queue;
pub mod rooms;
pub mod scheduler;
pub mod store;
pub mod viewer;

pub use error::{Error, Result};
