//! Render job scheduler and supervisor.
//!
//! Jobs are admitted over HTTP, queued in SQLite and started one at a time
//! by a FIFO scheduler once the concurrency limit and free GPU memory allow.
//! Each started job gets a runner that owns the engine process until it
//! exits, while the engine reports its own progress back through webhooks.

pub mod app_state;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
