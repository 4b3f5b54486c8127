// Core modules implementing the queue file format, slot framing, allocation, locking, and resize.
pub mod error;
pub mod format;
pub mod lock;
pub mod plan;
pub mod queue;
pub mod resize;
pub mod slot;
