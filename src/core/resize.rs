//! Purpose: Rebuild a queue file with new geometry, carrying pending records forward.
//! Exports: `ResizeOutcome` and `Queue::resize`.
//! Role: Resize/Migration; stages a complete file beside the old one, then renames it over.
//! Invariants: The original file is untouched until the staged file is written and synced.
//! Invariants: Carried records keep their order; records too large for new slots are dropped.
//! Invariants: Other handles keep the replaced file; `Queue::is_replaced` reports it.
use std::path::Path;

use tempfile::TempPath;
use tracing::{debug, info};

use crate::core::error::{Error, ErrorKind};
use crate::core::queue::{Durability, Queue, QueueOptions, staging_file};
use crate::core::slot;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ResizeOutcome {
    /// Records written into the new file, including ones later evicted.
    pub copied: u64,
    /// Records discarded because they exceed the new slot payload capacity.
    pub dropped_oversized: u64,
    /// Records evicted because the new capacity is below the pending count.
    pub evicted: u64,
}

impl Queue {
    /// Migrates this queue to `record_count` slots of `record_size` bytes.
    ///
    /// Takes the queue lock for the whole migration. On success this handle
    /// points at the new file; on failure the original file is left intact.
    pub fn resize(
        &mut self,
        record_count: u64,
        record_size: u64,
    ) -> Result<ResizeOutcome, Error> {
        let durability = self.durability;
        let options =
            QueueOptions::new(record_count, record_size).with_durability(Durability::Fast);
        options.validate().map_err(|err| err.with_path(&self.path))?;

        let mut current = self.locked()?;
        let (mut staged, temp_path, outcome) = stage(&mut current, options)?;

        staged
            .file
            .sync_all()
            .map_err(|err| Error::io(&staged.path, err))?;
        temp_path.persist(&current.path).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to replace queue file")
                .with_path(&current.path)
                .with_source(err.error)
        })?;
        staged.path = current.path.clone();
        staged.durability = durability;
        sync_parent_dir(&staged.path);
        drop(current);

        // Dropping the old handle releases whatever lock remains on it.
        let _old = std::mem::replace(self, staged);
        info!(
            path = %self.path.display(),
            record_count,
            record_size,
            copied = outcome.copied,
            dropped_oversized = outcome.dropped_oversized,
            evicted = outcome.evicted,
            "resized queue"
        );
        Ok(outcome)
    }
}

fn stage(
    source: &mut Queue,
    options: QueueOptions,
) -> Result<(Queue, TempPath, ResizeOutcome), Error> {
    let (file, temp_path) = staging_file(&source.path, "resize")?;
    let mut staged = Queue::init(temp_path.to_path_buf(), file, options)?;

    let capacity = slot::payload_capacity(options.record_size);
    let state = source.read_state()?;
    let mut outcome = ResizeOutcome::default();
    for id in state.first_id..state.last_id {
        let payload = source.read_slot(&state, id)?;
        if payload.len() as u64 > capacity {
            debug!(
                id,
                len = payload.len(),
                capacity,
                "record does not fit resized slots; dropping"
            );
            outcome.dropped_oversized += 1;
            continue;
        }
        let plan = staged.append(&payload)?;
        outcome.copied += 1;
        if plan.evicted.is_some() {
            outcome.evicted += 1;
        }
    }
    Ok((staged, temp_path, outcome))
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Err(err) = std::fs::File::open(parent).and_then(|dir| dir.sync_all()) {
            debug!(
                path = %parent.display(),
                error = %err,
                "directory sync after resize failed"
            );
        }
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::ResizeOutcome;
    use crate::core::error::ErrorKind;
    use crate::core::queue::{Durability, Queue, QueueOptions};

    fn open(path: &std::path::Path, record_count: u64, record_size: u64) -> Queue {
        Queue::open(
            path,
            QueueOptions::new(record_count, record_size).with_durability(Durability::Fast),
        )
        .expect("open")
    }

    fn drain(queue: &mut Queue) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(record) = queue.get().expect("get") {
            queue.task_complete(record.id).expect("complete");
            out.push(record.payload);
        }
        out
    }

    #[test]
    fn shrinking_slots_drops_records_that_no_longer_fit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("q.pq");
        let mut queue = open(&path, 5, 16);
        queue.put(b"xxxxxxxx").expect("put");
        queue.put(b"yy").expect("put");
        queue.put(b"zzz").expect("put");

        let outcome = queue.resize(5, 8).expect("resize");
        assert_eq!(
            outcome,
            ResizeOutcome {
                copied: 2,
                dropped_oversized: 1,
                evicted: 0
            }
        );
        assert_eq!(queue.record_size(), 8);
        assert_eq!(drain(&mut queue), vec![b"yy".to_vec(), b"zzz".to_vec()]);
    }

    #[test]
    fn shrinking_capacity_keeps_the_newest_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("q.pq");
        let mut queue = open(&path, 5, 8);
        for record in [b"1", b"2", b"3", b"4"] {
            queue.put(record).expect("put");
        }

        let outcome = queue.resize(2, 8).expect("resize");
        assert_eq!(outcome.copied, 4);
        assert_eq!(outcome.evicted, 2);
        assert_eq!(drain(&mut queue), vec![b"3".to_vec(), b"4".to_vec()]);
    }

    #[test]
    fn resized_file_replaces_the_original_on_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("q.pq");
        let mut queue = open(&path, 2, 8);
        queue.put(b"a").expect("put");
        queue.task_complete(0).expect("complete");
        queue.put(b"b").expect("put");
        queue.resize(4, 12).expect("resize");
        queue.put(b"c").expect("put");
        queue.close().expect("close");

        let mut reopened = open(&path, 1, 4);
        assert_eq!(reopened.record_count(), 4);
        assert_eq!(reopened.record_size(), 12);
        assert_eq!(drain(&mut reopened), vec![b"b".to_vec(), b"c".to_vec()]);

        let entries = std::fs::read_dir(dir.path()).expect("read_dir").count();
        assert_eq!(entries, 1, "staging file should not remain");
    }

    #[test]
    fn other_handles_notice_the_replaced_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("q.pq");
        let mut resizer = open(&path, 3, 8);
        let mut bystander = open(&path, 3, 8);
        resizer.put(b"a").expect("put");
        assert!(!bystander.is_replaced().expect("is_replaced"));

        // Same geometry, so the file length gives nothing away.
        resizer.resize(3, 8).expect("resize");
        assert!(!resizer.is_replaced().expect("is_replaced"));
        assert!(bystander.is_replaced().expect("is_replaced"));

        let err = bystander.locked().map(|_| ()).expect_err("stale handle");
        assert_eq!(err.kind(), ErrorKind::Consistency);
    }

    #[test]
    fn invalid_geometry_leaves_queue_untouched() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("q.pq");
        let mut queue = open(&path, 3, 8);
        queue.put(b"keep").expect("put");

        let err = queue.resize(0, 8).expect_err("zero capacity");
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert_eq!(queue.record_count(), 3);
        assert_eq!(drain(&mut queue), vec![b"keep".to_vec()]);
    }
}
