// Multi-handle lock smoke tests for put/get/complete serialization.
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;

use pqueue::api::{Durability, Error, ErrorKind, Queue, QueueOptions};

fn open(path: &Path) -> Queue {
    Queue::open(
        path,
        QueueOptions::new(512, 32).with_durability(Durability::Fast),
    )
    .expect("open")
}

#[test]
fn concurrent_puts_are_serialized() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("lock.pq");
    open(&path).close().expect("create");

    let workers = 8;
    let per_worker = 25;
    let barrier = Arc::new(Barrier::new(workers));
    let mut handles = Vec::new();
    for worker in 0..workers {
        let path = path.clone();
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            let mut queue = open(&path);
            barrier.wait();
            for i in 0..per_worker {
                let mut guard = queue.locked().expect("lock");
                guard
                    .put(format!("w{worker}-{i}").as_bytes())
                    .expect("put");
            }
        }));
    }
    for handle in handles {
        handle.join().expect("join");
    }

    let mut queue = open(&path);
    let bounds = queue.bounds().expect("bounds");
    assert_eq!(bounds.first_id, 0);
    assert_eq!(bounds.last_id, (workers * per_worker) as u64);
    assert!(queue.validate().expect("validate").is_ok());
}

#[test]
fn concurrent_consumers_each_record_once() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("drain.pq");
    let total = 200u64;
    let mut producer = open(&path);
    for i in 0..total {
        producer.put(&i.to_be_bytes()).expect("put");
    }
    producer.close().expect("close");

    let mut handles = Vec::new();
    for _ in 0..4 {
        let path = path.clone();
        handles.push(thread::spawn(move || -> Result<Vec<u64>, Error> {
            let mut queue = open(&path);
            let mut seen = Vec::new();
            loop {
                let mut guard = queue.locked()?;
                let Some(record) = guard.get()? else {
                    break;
                };
                guard.task_complete(record.id)?;
                seen.push(record.id);
            }
            Ok(seen)
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        let seen = handle.join().expect("join").expect("consumer");
        assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
        all.extend(seen);
    }
    all.sort_unstable();
    assert_eq!(all, (0..total).collect::<Vec<_>>());
}

#[test]
fn try_lock_reports_busy_while_another_handle_holds_it() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("busy.pq");
    let holder = open(&path);
    let contender = open(&path);

    holder.lock().expect("lock");
    let err = contender.try_lock().expect_err("busy");
    assert_eq!(err.kind(), ErrorKind::Busy);

    holder.unlock().expect("unlock");
    contender.try_lock().expect("lock after release");
    contender.unlock().expect("unlock");
}

#[test]
fn guard_releases_lock_on_error_paths() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("guard.pq");
    let mut queue = open(&path);
    let other = open(&path);
    queue.put(b"only").expect("put");

    let result: Result<(), Error> = (|| {
        let mut guard = queue.locked()?;
        guard.task_complete(42)?;
        Ok(())
    })();
    assert_eq!(result.expect_err("wrong id").kind(), ErrorKind::Consistency);

    other.try_lock().expect("lock released by guard");
    other.unlock().expect("unlock");
}

#[test]
fn concurrent_first_open_sees_a_complete_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let openers = 4;
    for round in 0..50 {
        let dir = temp.path().join(format!("round-{round}"));
        let path = dir.join("fresh.pq");
        let barrier = Arc::new(Barrier::new(openers));
        let mut handles = Vec::new();
        for _ in 0..openers {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || -> Result<(u64, u64), Error> {
                let options = QueueOptions::new(1024, 1024).with_durability(Durability::Fast);
                barrier.wait();
                let queue = Queue::open(&path, options)?;
                Ok((queue.record_count(), queue.record_size()))
            }));
        }
        for handle in handles {
            let geometry = handle.join().expect("join").expect("open");
            assert_eq!(geometry, (1024, 1024));
        }
        let entries = std::fs::read_dir(&dir).expect("read_dir").count();
        assert_eq!(entries, 1, "round {round} left staging files behind");
    }
}

#[test]
fn lock_waiter_is_refused_after_the_file_is_replaced() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("resized.pq");
    let mut resizer = open(&path);
    resizer.put(b"carried").expect("put");
    resizer.lock().expect("lock");

    let barrier = Arc::new(Barrier::new(2));
    let waiter = {
        let barrier = Arc::clone(&barrier);
        let queue = open(&path);
        thread::spawn(move || {
            barrier.wait();
            queue.lock().map(|()| queue)
        })
    };
    barrier.wait();
    // Same geometry: only the file identity changes.
    resizer.resize(512, 32).expect("resize");

    let err = waiter.join().expect("join").map(|_| ()).expect_err("stale handle");
    assert_eq!(err.kind(), ErrorKind::Consistency);

    let mut reopened = open(&path);
    reopened.try_lock().expect("lock released");
    reopened.unlock().expect("unlock");
    assert_eq!(
        reopened.get().expect("get").map(|record| record.payload),
        Some(b"carried".to_vec())
    );
}
