//! Purpose: Define the stable public Rust API boundary for pqueue.
//! Exports: Queue handle, options, records, locking guard, resize outcome, errors, validation.
//! Role: Public, additive-only surface; hides internal storage modules.
//! Invariants: This module is the only public path to storage primitives.
//! Invariants: Internal modules remain private and are not directly exposed.

mod validation;

pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::format::{HEADER_SIZE, QUEUE_FORMAT_VERSION};
pub use crate::core::lock::QueueGuard;
pub use crate::core::queue::{Bounds, Durability, Queue, QueueInfo, QueueOptions, Record};
pub use crate::core::resize::ResizeOutcome;
pub use crate::core::slot::LEN_PREFIX_SIZE;
pub use validation::{ValidationIssue, ValidationReport, ValidationStatus};
