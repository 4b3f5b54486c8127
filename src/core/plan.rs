//! Purpose: Plan put/complete transitions of the circular slot window without performing any I/O.
//! Exports: `plan_put`, `plan_complete`, `slot_offset`, `PutPlan`.
//! Role: Pure Circular Allocator used by `queue` to apply deterministic writes to storage.
//! Invariants: No side effects; output depends only on the header and the arguments.
//! Invariants: At most one record is evicted per put.
//! Invariants: `last_id - first_id <= record_count` holds after every plan.
use crate::core::error::{Error, ErrorKind};
use crate::core::format::{HEADER_SIZE, QueueHeader};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PutPlan {
    pub id: u64,
    pub slot_offset: u64,
    pub evicted: Option<u64>,
    pub next_header: QueueHeader,
}

/// Byte offset of the slot holding `id`.
pub fn slot_offset(header: &QueueHeader, id: u64) -> Result<u64, Error> {
    if header.record_count == 0 {
        return Err(Error::new(ErrorKind::Corrupt).with_message("record count is zero"));
    }
    (id % header.record_count)
        .checked_mul(header.record_size)
        .and_then(|offset| offset.checked_add(HEADER_SIZE as u64))
        .ok_or_else(|| {
            Error::new(ErrorKind::Corrupt)
                .with_message("slot offset overflows")
                .with_id(id)
        })
}

pub fn plan_put(header: QueueHeader) -> Result<PutPlan, Error> {
    let id = header.last_id;
    let slot_offset = slot_offset(&header, id)?;
    let mut first_id = header.first_id;
    let mut evicted = None;

    // Writing into the oldest live slot: that record is gone.
    if id % header.record_count == first_id % header.record_count && id > first_id {
        evicted = Some(first_id);
        first_id += 1;
    }

    let last_id = id.checked_add(1).ok_or_else(|| {
        Error::new(ErrorKind::Internal)
            .with_message("record identifier space exhausted")
            .with_id(id)
    })?;

    Ok(PutPlan {
        id,
        slot_offset,
        evicted,
        next_header: header.with_ids(first_id, last_id),
    })
}

pub fn plan_complete(header: QueueHeader, id: u64) -> Result<QueueHeader, Error> {
    if header.first_id >= header.last_id {
        return Err(Error::new(ErrorKind::Consistency)
            .with_message("queue is empty; nothing to acknowledge")
            .with_id(id));
    }
    if id != header.first_id {
        return Err(Error::new(ErrorKind::Consistency)
            .with_message(format!(
                "acknowledged id is not the head record (head is {})",
                header.first_id
            ))
            .with_id(id)
            .with_hint("Hold the queue lock across get and task_complete."));
    }
    Ok(header.with_ids(header.first_id + 1, header.last_id))
}
