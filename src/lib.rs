//! Purpose: Durable, fixed-capacity, file-backed circular queue for opaque byte records.
//! Exports: `api` (queue handle, options, locking, resize, validation, errors) and `info_json`.
//! Role: Library crate; producers `put` records, consumers `get` then `task_complete` them.
//! Invariants: One queue file holds one FIFO stream; record ids are never reused.
//! Invariants: Cross-handle safety relies on callers locking around compound operations.
pub mod api;
mod core;
pub mod info_json;

pub use api::{Error, ErrorKind, Queue, QueueOptions, Record};
