// Queue file creation/opening, slot I/O, and the put/get/task_complete cycle.
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tempfile::{Builder, TempPath};
use tracing::{debug, warn};

use crate::core::error::{Error, ErrorKind};
use crate::core::format::{self, QueueHeader};
use crate::core::lock::{self, QueueGuard};
use crate::core::plan::{self, PutPlan};
use crate::core::slot::{self, LEN_PREFIX_SIZE};

/// How hard a header update pushes toward stable storage.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Durability {
    /// Leave write-back to the operating system.
    Fast,
    /// `fdatasync` after every header write.
    #[default]
    Flush,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct QueueOptions {
    pub record_count: u64,
    /// Bytes per slot, including the 4-byte length prefix.
    pub record_size: u64,
    pub durability: Durability,
}

impl QueueOptions {
    pub fn new(record_count: u64, record_size: u64) -> Self {
        Self {
            record_count,
            record_size,
            durability: Durability::default(),
        }
    }

    /// Sizes slots so that records of up to `max_record_len` bytes fit.
    pub fn for_payload(record_count: u64, max_record_len: u64) -> Self {
        Self::new(
            record_count,
            max_record_len.saturating_add(LEN_PREFIX_SIZE as u64),
        )
    }

    pub fn with_durability(mut self, durability: Durability) -> Self {
        self.durability = durability;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.record_count == 0 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("record_count must be at least 1"));
        }
        if self.record_size < LEN_PREFIX_SIZE as u64 {
            return Err(Error::new(ErrorKind::Usage).with_message(format!(
                "record_size must be at least {LEN_PREFIX_SIZE} (the length prefix)"
            )));
        }
        if QueueHeader::new(self.record_count, self.record_size)
            .file_len()
            .is_none()
        {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("queue geometry overflows u64"));
        }
        Ok(())
    }
}

/// A record read from the head of the queue.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Record {
    pub id: u64,
    pub payload: Vec<u8>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Bounds {
    pub first_id: u64,
    pub last_id: u64,
}

impl Bounds {
    pub fn pending(&self) -> u64 {
        self.last_id.saturating_sub(self.first_id)
    }

    pub fn is_empty(&self) -> bool {
        self.first_id >= self.last_id
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct QueueInfo {
    pub path: PathBuf,
    pub version: u32,
    pub record_count: u64,
    pub record_size: u64,
    pub file_size: u64,
    pub bounds: Bounds,
}

/// A fixed-capacity circular queue of byte records backed by one file.
///
/// Operations are synchronous and not internally synchronized. When several
/// instances share a path, wrap compound sequences in [`Queue::locked`] (or
/// `lock`/`unlock`).
#[derive(Debug)]
pub struct Queue {
    pub(crate) path: PathBuf,
    pub(crate) file: File,
    pub(crate) header: QueueHeader,
    pub(crate) durability: Durability,
}

impl Queue {
    /// Opens the queue at `path`, creating it with `options` if it does not exist.
    ///
    /// An existing file's own header is authoritative; `options` geometry is
    /// only used for creation.
    pub fn open(path: impl AsRef<Path>, options: QueueOptions) -> Result<Self, Error> {
        let path = std::path::absolute(path.as_ref())
            .map_err(|err| Error::io(path.as_ref(), err))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| Error::io(parent, err))?;
        }

        match fs::metadata(&path) {
            Ok(_) => Self::open_existing(path, options),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Self::create(path, options),
            Err(err) => Err(Error::io(path, err)),
        }
    }

    /// Builds the file beside `path` and links it in only once fully laid out.
    fn create(path: PathBuf, options: QueueOptions) -> Result<Self, Error> {
        options.validate().map_err(|err| err.with_path(&path))?;
        let (file, temp_path) = staging_file(&path, "create")?;
        let mut queue = Self::init(temp_path.to_path_buf(), file, options)?;

        match temp_path.persist_noclobber(&path) {
            Ok(()) => {
                debug!(
                    path = %path.display(),
                    record_count = options.record_count,
                    record_size = options.record_size,
                    "created queue file"
                );
                queue.path = path;
                Ok(queue)
            }
            Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => {
                // Another opener won the race; its file is complete.
                drop(queue);
                Self::open_existing(path, options)
            }
            Err(err) => Err(Error::new(ErrorKind::Io)
                .with_message("failed to publish queue file")
                .with_path(&path)
                .with_source(err.error)),
        }
    }

    /// Lays out a fresh header and slot region in `file`.
    pub(crate) fn init(path: PathBuf, file: File, options: QueueOptions) -> Result<Self, Error> {
        let header = QueueHeader::new(options.record_count, options.record_size);
        let file_len = header.file_len().ok_or_else(|| {
            Error::new(ErrorKind::Usage).with_message("queue geometry overflows u64")
        })?;
        format::write_header(&file, &header, &path)?;
        file.set_len(file_len).map_err(|err| Error::io(&path, err))?;
        file.sync_all().map_err(|err| Error::io(&path, err))?;
        Ok(Self {
            path,
            file,
            header,
            durability: options.durability,
        })
    }

    fn open_existing(path: PathBuf, options: QueueOptions) -> Result<Self, Error> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|err| Error::io(&path, err))?;
        let actual_size = file
            .metadata()
            .map(|meta| meta.len())
            .map_err(|err| Error::io(&path, err))?;

        let header = format::read_header(&file, &path)?;
        header
            .validate(actual_size)
            .map_err(|err| err.with_path(&path))?;

        if header.record_count != options.record_count
            || header.record_size != options.record_size
        {
            warn!(
                path = %path.display(),
                requested_count = options.record_count,
                requested_size = options.record_size,
                record_count = header.record_count,
                record_size = header.record_size,
                "existing queue geometry differs from requested; using the file's header"
            );
        }
        debug!(
            path = %path.display(),
            first_id = header.first_id,
            last_id = header.last_id,
            "opened queue file"
        );

        Ok(Self {
            path,
            file,
            header,
            durability: options.durability,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record_count(&self) -> u64 {
        self.header.record_count
    }

    /// Slot size in bytes, including the length prefix.
    pub fn record_size(&self) -> u64 {
        self.header.record_size
    }

    /// Largest record `put` accepts.
    pub fn max_record_len(&self) -> u64 {
        slot::payload_capacity(self.header.record_size)
    }

    pub fn durability(&self) -> Durability {
        self.durability
    }

    /// Appends `record`, evicting the oldest pending record if the queue is full.
    ///
    /// Returns the identifier assigned to the record.
    pub fn put(&mut self, record: &[u8]) -> Result<u64, Error> {
        self.append(record).map(|plan| plan.id)
    }

    pub(crate) fn append(&mut self, record: &[u8]) -> Result<PutPlan, Error> {
        let frame = slot::encode(record, self.header.record_size)
            .map_err(|err| err.with_path(&self.path))?;
        let state = self.read_state()?;
        let plan = plan::plan_put(state).map_err(|err| err.with_path(&self.path))?;

        self.write_at(plan.slot_offset, &frame)?;
        if let Some(evicted) = plan.evicted {
            debug!(
                path = %self.path.display(),
                evicted,
                id = plan.id,
                "queue full; dropped oldest record"
            );
        }
        self.commit(&plan.next_header)?;
        Ok(plan)
    }

    /// Returns the oldest pending record without consuming it.
    pub fn get(&mut self) -> Result<Option<Record>, Error> {
        let state = self.read_state()?;
        if state.first_id >= state.last_id {
            return Ok(None);
        }
        let payload = self.read_slot(&state, state.first_id)?;
        Ok(Some(Record {
            id: state.first_id,
            payload,
        }))
    }

    /// Acknowledges the head record `id`, removing it from the queue.
    pub fn task_complete(&mut self, id: u64) -> Result<(), Error> {
        let state = self.read_state()?;
        let next =
            plan::plan_complete(state, id).map_err(|err| err.with_path(&self.path))?;
        self.commit(&next)
    }

    pub fn bounds(&mut self) -> Result<Bounds, Error> {
        let state = self.read_state()?;
        Ok(Bounds {
            first_id: state.first_id,
            last_id: state.last_id,
        })
    }

    pub fn len(&mut self) -> Result<u64, Error> {
        self.bounds().map(|bounds| bounds.pending())
    }

    pub fn is_empty(&mut self) -> Result<bool, Error> {
        self.bounds().map(|bounds| bounds.is_empty())
    }

    pub fn info(&mut self) -> Result<QueueInfo, Error> {
        let bounds = self.bounds()?;
        Ok(QueueInfo {
            path: self.path.clone(),
            version: self.header.version,
            record_count: self.header.record_count,
            record_size: self.header.record_size,
            file_size: self.file_len()?,
            bounds,
        })
    }

    /// Blocks until this handle holds the exclusive advisory lock.
    ///
    /// Fails with `ErrorKind::Consistency` (and releases the lock) when the
    /// file was replaced or removed while waiting; the caller must reopen.
    pub fn lock(&self) -> Result<(), Error> {
        lock::lock_file(&self.file, &self.path)?;
        self.ensure_current()
    }

    /// Like [`Queue::lock`] but fails with `ErrorKind::Busy` instead of waiting.
    pub fn try_lock(&self) -> Result<(), Error> {
        lock::try_lock_file(&self.file, &self.path)?;
        self.ensure_current()
    }

    fn ensure_current(&self) -> Result<(), Error> {
        let replaced = match self.is_replaced() {
            Ok(replaced) => replaced,
            Err(err) => {
                let _ = self.unlock();
                return Err(err);
            }
        };
        if !replaced {
            return Ok(());
        }
        self.unlock()?;
        Err(Error::new(ErrorKind::Consistency)
            .with_message("queue file was replaced while this handle was open")
            .with_hint("Reopen the queue to pick up the current file.")
            .with_path(&self.path))
    }

    pub fn unlock(&self) -> Result<(), Error> {
        lock::unlock_file(&self.file, &self.path)
    }

    /// Locks the queue for the lifetime of the returned guard.
    pub fn locked(&mut self) -> Result<QueueGuard<'_>, Error> {
        self.lock()?;
        Ok(QueueGuard::new(self))
    }

    pub fn try_locked(&mut self) -> Result<QueueGuard<'_>, Error> {
        self.try_lock()?;
        Ok(QueueGuard::new(self))
    }

    /// Syncs outstanding writes and closes the file.
    pub fn close(self) -> Result<(), Error> {
        if self.durability == Durability::Flush {
            self.file
                .sync_all()
                .map_err(|err| Error::io(&self.path, err))?;
        }
        debug!(path = %self.path.display(), "closed queue file");
        Ok(())
    }

    /// Whether the file at this handle's path is no longer the file it holds open.
    ///
    /// True after another handle resized (replaced) or removed the queue;
    /// writes through this handle then land in an unlinked file.
    pub fn is_replaced(&self) -> Result<bool, Error> {
        let current = match fs::metadata(&self.path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(true),
            Err(err) => return Err(Error::io(&self.path, err)),
        };
        let held = self
            .file
            .metadata()
            .map_err(|err| Error::io(&self.path, err))?;
        Ok(!same_file(&held, &current))
    }

    /// Deletes a queue file. Open handles keep working on the unlinked file.
    pub fn remove(path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        fs::remove_file(path).map_err(|err| Error::io(path, err))
    }

    /// Current header: geometry from this instance, ids from disk.
    pub(crate) fn read_state(&mut self) -> Result<QueueHeader, Error> {
        let disk = format::read_header(&self.file, &self.path)?;
        let state = self.header.with_ids(disk.first_id, disk.last_id);
        if state.first_id > state.last_id || state.pending() > state.record_count {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_message(format!(
                    "invalid record window [{}, {})",
                    state.first_id, state.last_id
                ))
                .with_path(&self.path));
        }
        Ok(state)
    }

    /// Header exactly as stored, without merging instance geometry.
    pub(crate) fn read_disk_header(&mut self) -> Result<QueueHeader, Error> {
        format::read_header(&self.file, &self.path)
    }

    pub(crate) fn file_len(&self) -> Result<u64, Error> {
        self.file
            .metadata()
            .map(|meta| meta.len())
            .map_err(|err| Error::io(&self.path, err))
    }

    /// Reads and checks the length prefix of the slot for `id`.
    pub(crate) fn read_slot_len(&mut self, state: &QueueHeader, id: u64) -> Result<u32, Error> {
        let offset =
            plan::slot_offset(state, id).map_err(|err| err.with_path(&self.path))?;
        let mut prefix = [0u8; LEN_PREFIX_SIZE];
        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset))
            .map_err(|err| Error::io(&self.path, err).with_offset(offset))?;
        file.read_exact(&mut prefix)
            .map_err(|err| Error::io(&self.path, err).with_offset(offset).with_id(id))?;
        let len = slot::decode_length(prefix);
        slot::validate_length(len, state.record_size)
            .map_err(|err| err.with_path(&self.path).with_id(id).with_offset(offset))?;
        Ok(len)
    }

    pub(crate) fn read_slot(&mut self, state: &QueueHeader, id: u64) -> Result<Vec<u8>, Error> {
        let len = self.read_slot_len(state, id)?;
        let mut payload = vec![0u8; len as usize];
        let mut file = &self.file;
        file.read_exact(&mut payload)
            .map_err(|err| Error::io(&self.path, err).with_id(id))?;
        Ok(payload)
    }

    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<(), Error> {
        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset))
            .map_err(|err| Error::io(&self.path, err).with_offset(offset))?;
        file.write_all(bytes)
            .map_err(|err| Error::io(&self.path, err).with_offset(offset))?;
        Ok(())
    }

    fn commit(&mut self, next: &QueueHeader) -> Result<(), Error> {
        format::write_header(&self.file, next, &self.path)?;
        if self.durability == Durability::Flush {
            self.file
                .sync_data()
                .map_err(|err| Error::io(&self.path, err))?;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn same_file(a: &fs::Metadata, b: &fs::Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

#[cfg(not(unix))]
fn same_file(_a: &fs::Metadata, _b: &fs::Metadata) -> bool {
    true
}

/// Creates an unlinked-on-drop staging file in the directory of `path`.
pub(crate) fn staging_file(path: &Path, tag: &str) -> Result<(File, TempPath), Error> {
    let dir = path.parent().ok_or_else(|| {
        Error::new(ErrorKind::Usage)
            .with_message("queue path has no parent")
            .with_path(path)
    })?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "queue".to_string());
    let prefix = format!(".{name}.{tag}-");
    let named = Builder::new()
        .prefix(&prefix)
        .tempfile_in(dir)
        .map_err(|err| Error::io(dir, err))?;
    Ok(named.into_parts())
}
